// 文件: frame_clock/mod.rs
// 作用: 帧时钟，决定每个输出何时开始生成下一帧，使其赶上预测的 vblank
// 关键概念:
//   - 调度: 根据上次呈现时间、刷新间隔和测得的渲染延迟计算唤醒时间
//   - 在途帧: 已派发但尚未收到呈现反馈的帧，最多两个（三缓冲）
//   - 抑制: inhibit 期间所有调度请求被锁存，解除后重放

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::time::Duration;

use anyhow::ensure;
use arrayvec::ArrayVec;

use crate::clock::Clock;
use crate::config::FrameClockConfig;
use crate::utils::id::IdCounter;
use crate::utils::{from_us, refresh_interval_us, to_us};

pub mod deadline;
pub mod estimator;
pub mod listener;
pub mod state;
pub mod timeline;
pub mod wakeup;

use deadline::{Deadline, DeadlineParams, DispatchTiming, RenderTimeBreakdown};
use estimator::{LatencyEstimates, LatencySample};
pub use listener::{FlipHints, Frame, FrameInfo, FrameListener, FrameResult};
pub use state::{ClockEvent, InvariantViolation, State, Urgency};
pub use timeline::{Timeline, TimelineId, Timelines};
pub use wakeup::{CalloopWakeup, ClockRoute, Wakeup};

static CLOCK_ID_COUNTER: IdCounter = IdCounter::new();

/// Identifies a frame clock in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockId(u64);

impl ClockId {
    fn next() -> ClockId {
        ClockId(CLOCK_ID_COUNTER.next())
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Paces frames for one display output.
///
/// Single-threaded: every method runs to completion on the event loop thread that also owns the
/// rendering backend.
pub struct FrameClock {
    id: ClockId,
    config: FrameClockConfig,
    // 时间源，测试中可以冻结
    time: Clock,
    // 负责真正生成帧的一方（后端）
    listener: Box<dyn FrameListener>,
    // 唤醒定时器
    wakeup: Box<dyn Wakeup>,

    // 刷新率 (Hz) 和换算出的刷新间隔 (µs)
    refresh_rate: f64,
    refresh_interval_us: i64,
    vblank_duration_us: i64,

    state: State,
    // 已派发的帧数，也是下一帧的序号
    frame_count: u64,
    // 已设置唤醒时的唤醒时间
    next_update_time_us: Option<i64>,
    // 上一次派发的时间和迟到量
    last_dispatch: Option<DispatchTiming>,
    /// Dispatch times of frames awaiting feedback, oldest first.
    in_flight: ArrayVec<i64, 2>,

    last_presentation_time_us: Option<i64>,
    /// Prediction for the most recently scheduled frame; `None` when invalid.
    next_presentation_time_us: Option<i64>,
    last_flip: Option<(i64, FlipHints)>,

    // 三种延迟的滑动窗口最大值
    estimates: LatencyEstimates,
    // 上一帧的反馈是否带有完整测量
    got_measurements_last_frame: bool,

    // 嵌套的 inhibit 次数
    inhibit_count: u32,
    // 被推迟的调度请求，Now 优先于 Normal
    pending_reschedule: Option<Urgency>,

    timelines: Timelines,
    // 销毁时按注册顺序调用
    destroy_observers: Vec<Box<dyn FnOnce()>>,
    // 累计的非法事件次数
    invariant_violations: u64,
}

impl FrameClock {
    pub fn new(
        refresh_rate: f64,
        vblank_duration: Duration,
        listener: Box<dyn FrameListener>,
        wakeup: Box<dyn Wakeup>,
        config: FrameClockConfig,
    ) -> anyhow::Result<Self> {
        ensure!(
            refresh_rate.is_finite() && refresh_rate > 0.,
            "refresh rate must be positive, got {refresh_rate}"
        );
        // 刷新间隔四舍五入到微秒后不能为零
        ensure!(
            refresh_interval_us(refresh_rate) >= 1,
            "refresh rate {refresh_rate} is too high"
        );

        let id = ClockId::next();
        debug!(
            clock = id.get(),
            refresh_rate,
            ?vblank_duration,
            ?config,
            "creating frame clock"
        );

        Ok(Self {
            id,
            config,
            time: Clock::default(),
            listener,
            wakeup,
            refresh_rate,
            refresh_interval_us: refresh_interval_us(refresh_rate),
            vblank_duration_us: to_us(vblank_duration),
            state: State::Init,
            frame_count: 0,
            next_update_time_us: None,
            last_dispatch: None,
            in_flight: ArrayVec::new(),
            last_presentation_time_us: None,
            next_presentation_time_us: None,
            last_flip: None,
            estimates: LatencyEstimates::default(),
            got_measurements_last_frame: false,
            inhibit_count: 0,
            pending_reschedule: None,
            timelines: Timelines::new(),
            destroy_observers: Vec::new(),
            invariant_violations: 0,
        })
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.time = clock;
        self
    }

    /// Requests a frame at the next suitable deadline.
    pub fn schedule_update(&mut self) {
        // 抑制期间只记录请求
        if self.inhibit_count > 0 {
            self.latch(Urgency::Normal);
            return;
        }

        let now = self.now_us();
        match self.state {
            // 第一帧没有任何历史，立即派发
            State::Init => {
                self.next_presentation_time_us = None;
                self.arm(now, State::Scheduled);
            }
            State::Idle => {
                let deadline = self.compute_deadline(now);
                self.next_presentation_time_us = deadline.presentation_time;
                self.arm(deadline.update_time, State::Scheduled);
            }
            // 已经有唤醒在等待
            State::Scheduled | State::DispatchedOneAndScheduled => (),
            // 三缓冲允许时提前调度第二帧，否则等待反馈
            State::DispatchedOne => {
                if self.triple_buffering_allowed() {
                    let deadline = self.compute_deadline(now);
                    self.next_presentation_time_us = deadline.presentation_time;
                    self.arm(deadline.update_time, State::DispatchedOneAndScheduled);
                } else {
                    self.latch(Urgency::Normal);
                }
            }
            // 两帧都在途，反馈到来后再调度
            State::DispatchedTwo => self.latch(Urgency::Normal),
        }
    }

    /// Requests a frame as soon as possible.
    pub fn schedule_update_now(&mut self) {
        if self.inhibit_count > 0 {
            self.latch(Urgency::Now);
            return;
        }

        let now = self.now_us();
        match self.state {
            // 立即唤醒，预测的呈现时间作废
            State::Init | State::Idle => {
                self.next_presentation_time_us = None;
                self.arm(now, State::Scheduled);
            }
            State::Scheduled | State::DispatchedOneAndScheduled => (),
            // 紧急请求不受三缓冲开关和直接扫描输出的限制
            State::DispatchedOne => {
                self.next_presentation_time_us = None;
                self.arm(now, State::DispatchedOneAndScheduled);
            }
            State::DispatchedTwo => self.latch(Urgency::Now),
        }
    }

    /// Suppresses scheduling until the matching [`FrameClock::uninhibit`].
    pub fn inhibit(&mut self) {
        self.inhibit_count += 1;

        // 只有最外层的 inhibit 会取消唤醒
        if self.inhibit_count == 1 {
            let (state, dropped_wakeup) = self.state.inhibited();
            // 被取消的唤醒转成锁存请求
            if dropped_wakeup {
                self.latch(Urgency::Normal);
            }
            trace!(clock = self.id.get(), from = ?self.state, to = ?state, "inhibited");
            self.state = state;
            self.next_update_time_us = None;
            self.wakeup.disarm();
        }
    }

    pub fn uninhibit(&mut self) -> Result<(), InvariantViolation> {
        if self.inhibit_count == 0 {
            return Err(self.violation(InvariantViolation {
                event: ClockEvent::Uninhibit,
                state: self.state,
            }));
        }

        self.inhibit_count -= 1;
        // 最外层解除后重放锁存的请求
        if self.inhibit_count == 0 {
            trace!(clock = self.id.get(), "uninhibited");
            self.maybe_reschedule();
        }
        Ok(())
    }

    /// Entry point for [`Wakeup`] implementations: the armed deadline has been reached.
    pub fn on_wakeup(&mut self) -> Result<(), InvariantViolation> {
        // 定时器已触发，先让唤醒端忘掉它
        self.wakeup.fired();
        self.dispatch()
    }

    /// Produces one frame.
    pub fn dispatch(&mut self) -> Result<(), InvariantViolation> {
        let _span = tracy_client::span!("FrameClock::dispatch");
        let _guard = trace_span!("dispatch", clock = self.id.get()).entered();

        // 只有已调度的状态才能派发
        let state = self.state.dispatched().map_err(|err| self.violation(err))?;
        self.state = state;
        self.next_update_time_us = None;
        self.wakeup.disarm();

        // 记录派发时间，供下一次派发节奏和测量使用
        let now = self.now_us();
        let timing = DispatchTiming::following(self.last_dispatch, now, self.refresh_interval_us);
        self.last_dispatch = Some(timing);
        if self.in_flight.try_push(now).is_err() {
            warn!("more frames in flight than dispatch states allow");
        }

        let index = self.frame_count;
        self.frame_count += 1;

        let frame = Frame {
            index,
            dispatch_time: from_us(now),
            target_presentation_time: self.next_presentation_time_us.map(from_us),
            refresh_interval: from_us(self.refresh_interval_us),
        };
        trace!(
            index,
            lateness = timing.lateness,
            target = ?frame.target_presentation_time,
            ?state,
            "dispatching"
        );

        // 先通知监听者，再推进时间线，最后生成帧
        self.listener.before_frame(&frame);

        // 时间线优先使用预测的呈现时间，使动画与屏幕上的时刻对齐
        let frame_time = frame
            .target_presentation_time
            .unwrap_or(frame.dispatch_time);
        self.timelines.advance(frame_time);

        match self.listener.produce_frame(&frame) {
            // 等待呈现反馈
            FrameResult::PendingPresented => Ok(()),
            // 没有内容要显示，这一帧立即退役
            FrameResult::Idle => {
                trace!(index, "listener produced no frame");
                self.retire(ClockEvent::IdleFrame)
            }
        }
    }

    /// Feedback for the oldest in-flight frame.
    pub fn notify_presented(&mut self, info: FrameInfo) -> Result<(), InvariantViolation> {
        let _span = tracy_client::span!("FrameClock::notify_presented");

        let next = self
            .state
            .retired(ClockEvent::Presented)
            .map_err(|err| self.violation(err))?;

        // 零值时间戳表示没有呈现时间
        let presentation_time = info
            .presentation_time
            .filter(|time| !time.is_zero())
            .map(to_us);
        if presentation_time.is_some() {
            self.last_presentation_time_us = presentation_time;
        }

        // 只有 swap 时间和 GPU 耗时都在时才算一次完整测量
        match (info.cpu_time_before_swap, info.gpu_rendering_duration) {
            (Some(swap), Some(gpu)) => {
                let swap = to_us(swap);
                let sample = self.measure(swap, to_us(gpu), presentation_time);
                trace!(
                    clock = self.id.get(),
                    dispatch_to_swap = sample.dispatch_to_swap,
                    swap_to_rendering_done = sample.swap_to_rendering_done,
                    swap_to_flip = sample.swap_to_flip,
                    "frame timings"
                );
                self.estimates.record(sample);
                self.got_measurements_last_frame = true;
            }
            _ => self.got_measurements_last_frame = false,
        }

        // 不大于 1 Hz 的值视为未知
        if info.refresh_rate > 1. {
            self.set_refresh_rate(info.refresh_rate);
        }

        self.retire_to(next, ClockEvent::Presented);
        Ok(())
    }

    /// Like [`FrameClock::notify_presented`], for frames that never reached the display.
    pub fn notify_ready(&mut self) -> Result<(), InvariantViolation> {
        self.retire(ClockEvent::Ready)
    }

    /// Records the most recent buffer flip.
    pub fn record_flip(&mut self, time: Duration, hints: FlipHints) {
        trace!(clock = self.id.get(), ?time, ?hints, "flip");
        self.last_flip = Some((to_us(time), hints));
    }

    /// Registers a timeline; the first one also requests a frame.
    pub fn add_timeline(&mut self, timeline: Rc<RefCell<dyn Timeline>>) -> TimelineId {
        let was_empty = self.timelines.is_empty();
        let id = self.timelines.insert(timeline);
        if was_empty {
            self.schedule_update();
        }
        id
    }

    pub fn remove_timeline(&mut self, id: TimelineId) -> bool {
        self.timelines.remove(id)
    }

    /// Shared handle to the registered timelines.
    ///
    /// Only [`FrameClock::add_timeline`] requests a frame. Members inserted through the handle
    /// keep the clock running once it dispatches again, so an idle clock needs its own
    /// [`FrameClock::schedule_update`].
    pub fn timelines(&self) -> Timelines {
        self.timelines.clone()
    }

    /// Switches variable refresh rate mode.
    pub fn set_vrr(&mut self, vrr: bool) {
        if self.config.vrr == vrr {
            return;
        }

        debug!(clock = self.id.get(), vrr, "changing VRR mode");
        self.config.vrr = vrr;
        // 刷新模式改变后旧的呈现相位不再可信
        self.last_presentation_time_us = None;
        self.next_presentation_time_us = None;
    }

    /// Runs `f` when the clock is destroyed.
    pub fn connect_destroy(&mut self, f: impl FnOnce() + 'static) {
        self.destroy_observers.push(Box::new(f));
    }

    /// Tears the clock down: notifies observers, then releases the wakeup.
    pub fn destroy(mut self) {
        debug!(clock = self.id.get(), frames = self.frame_count, "destroying frame clock");

        // 观察者先于唤醒端收到通知
        for observer in mem::take(&mut self.destroy_observers) {
            observer();
        }
        self.wakeup.disarm();
    }

    pub fn id(&self) -> ClockId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn refresh_rate(&self) -> f64 {
        self.refresh_rate
    }

    pub fn refresh_interval(&self) -> Duration {
        from_us(self.refresh_interval_us)
    }

    pub fn vblank_duration(&self) -> Duration {
        from_us(self.vblank_duration_us)
    }

    pub fn config(&self) -> &FrameClockConfig {
        &self.config
    }

    pub fn vrr(&self) -> bool {
        self.config.vrr
    }

    pub fn next_update_time(&self) -> Option<Duration> {
        self.next_update_time_us.map(from_us)
    }

    /// Predicted presentation of the most recently scheduled frame, if valid.
    pub fn next_presentation_time(&self) -> Option<Duration> {
        self.next_presentation_time_us.map(from_us)
    }

    pub fn last_presentation_time(&self) -> Option<Duration> {
        self.last_presentation_time_us.map(from_us)
    }

    pub fn inhibit_count(&self) -> u32 {
        self.inhibit_count
    }

    pub fn pending_reschedule(&self) -> Option<Urgency> {
        self.pending_reschedule
    }

    pub fn got_measurements_last_frame(&self) -> bool {
        self.got_measurements_last_frame
    }

    /// Number of events rejected since creation.
    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations
    }

    /// How long before the target vblank the next dispatch would happen in the current state.
    pub fn max_render_time(&self) -> Duration {
        from_us(self.render_time_breakdown().total)
    }

    /// Human readable breakdown of [`FrameClock::max_render_time`].
    pub fn max_render_time_debug_info(&self) -> String {
        self.render_time_breakdown().describe()
    }

    fn render_time_breakdown(&self) -> RenderTimeBreakdown {
        deadline::render_time_breakdown(&self.deadline_params(self.now_us()))
    }

    fn now_us(&self) -> i64 {
        to_us(self.time.now())
    }

    // 普通调度请求能否在一帧在途时再派发一帧
    fn triple_buffering_allowed(&self) -> bool {
        // 直接扫描输出时缓冲区直接交给显示器，不能再排一帧
        let direct_scanout = self
            .last_flip
            .is_some_and(|(_, hints)| hints.contains(FlipHints::DIRECT_SCANOUT_ATTEMPTED));
        !self.config.disable_triple_buffering && !direct_scanout
    }

    fn deadline_params(&self, now: i64) -> DeadlineParams<'_> {
        // 太旧的预测不参与提前呈现修正
        let previous_presentation_time = self.next_presentation_time_us.filter(|previous| {
            self.config
                .prediction_staleness_limit_us
                .map_or(true, |limit| now - previous <= limit as i64)
        });

        DeadlineParams {
            now,
            state: self.state,
            refresh_interval: self.refresh_interval_us,
            vblank_duration: self.vblank_duration_us,
            max_render_time_constant: self.config.max_render_time_constant_us as i64,
            last_presentation_time: self.last_presentation_time_us,
            last_dispatch: self.last_dispatch,
            previous_presentation_time,
            estimates: &self.estimates,
            got_measurements_last_frame: self.got_measurements_last_frame,
            triple_buffering: !self.config.disable_triple_buffering,
            vrr: self.config.vrr,
        }
    }

    fn compute_deadline(&self, now: i64) -> Deadline {
        let _span = tracy_client::span!("FrameClock::compute_deadline");

        let deadline = deadline::next_deadline(&self.deadline_params(now));
        trace!(
            clock = self.id.get(),
            now,
            update_time = deadline.update_time,
            presentation_time = ?deadline.presentation_time,
            "computed deadline"
        );
        deadline
    }

    fn measure(&self, swap: i64, gpu: i64, presentation_time: Option<i64>) -> LatencySample {
        // 反馈对应最早的在途帧
        let dispatch = self
            .in_flight
            .first()
            .copied()
            .or(self.last_dispatch.map(|timing| timing.time))
            .unwrap_or(swap);

        // 翻转早于 swap 说明属于上一帧，改用呈现时间
        let flip = self
            .last_flip
            .map(|(time, _)| time)
            .filter(|time| *time >= swap)
            .or(presentation_time)
            .unwrap_or(swap);

        LatencySample {
            dispatch_to_swap: swap - dispatch,
            swap_to_rendering_done: gpu,
            swap_to_flip: flip - swap,
        }
    }

    fn set_refresh_rate(&mut self, refresh_rate: f64) {
        if self.refresh_rate == refresh_rate {
            return;
        }

        let interval = refresh_interval_us(refresh_rate);
        // 刷新间隔为零时无法对齐相位
        if !refresh_rate.is_finite() || interval < 1 {
            warn!(
                clock = self.id.get(),
                refresh_rate,
                "ignoring refresh rate without a usable interval"
            );
            return;
        }
        debug!(
            clock = self.id.get(),
            from = self.refresh_rate,
            to = refresh_rate,
            interval,
            "refresh rate changed"
        );
        self.refresh_rate = refresh_rate;
        self.refresh_interval_us = interval;
    }

    fn arm(&mut self, update_time: i64, state: State) {
        trace!(clock = self.id.get(), from = ?self.state, to = ?state, update_time, "scheduled");
        self.state = state;
        self.next_update_time_us = Some(update_time);
        self.wakeup.arm(from_us(update_time));
    }

    // 合并推迟的请求，只保留最紧急的一个
    fn latch(&mut self, urgency: Urgency) {
        trace!(clock = self.id.get(), ?urgency, state = ?self.state, "deferring reschedule");
        self.pending_reschedule = self.pending_reschedule.max(Some(urgency));
    }

    fn retire(&mut self, event: ClockEvent) -> Result<(), InvariantViolation> {
        let next = self.state.retired(event).map_err(|err| self.violation(err))?;
        self.retire_to(next, event);
        Ok(())
    }

    fn retire_to(&mut self, next: State, event: ClockEvent) {
        trace!(clock = self.id.get(), from = ?self.state, to = ?next, ?event, "frame retired");
        self.state = next;
        if event == ClockEvent::IdleFrame {
            // 空闲帧是刚刚派发的那一帧，更早的帧仍在等待反馈
            self.in_flight.pop();
        } else if !self.in_flight.is_empty() {
            // 呈现和就绪反馈按派发顺序到达
            self.in_flight.remove(0);
        }
        self.maybe_reschedule();
    }

    // 有锁存请求或注册了时间线时继续调度
    fn maybe_reschedule(&mut self) {
        if self.pending_reschedule.is_none() && self.timelines.is_empty() {
            return;
        }

        match self.pending_reschedule.take() {
            Some(Urgency::Now) => self.schedule_update_now(),
            Some(Urgency::Normal) | None => self.schedule_update(),
        }
    }

    // 记录非法事件，状态保持不变
    fn violation(&mut self, err: InvariantViolation) -> InvariantViolation {
        self.invariant_violations += 1;
        error!(clock = self.id.get(), "frame clock invariant violated: {err}");
        err
    }
}

impl fmt::Debug for FrameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameClock")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("refresh_rate", &self.refresh_rate)
            .field("frame_count", &self.frame_count)
            .field("inhibit_count", &self.inhibit_count)
            .field("pending_reschedule", &self.pending_reschedule)
            .field("timelines", &self.timelines)
            .finish_non_exhaustive()
    }
}
