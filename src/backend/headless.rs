//! 作用：无头模拟后端实现
//! 说明：不进行实际渲染，按固定相位的 vblank 节奏模拟交换、GPU 渲染和翻页
//! 特性：
//!   - 渲染耗时可带随机抖动
//!   - 可以按概率返回空闲帧（没有损坏区域）
//!   - 呈现反馈通过事件循环上的定时器稍后送回帧时钟，绝不在 produce_frame 内部回调

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use calloop::timer::{TimeoutAction, Timer};
use calloop::LoopHandle;

use super::{OutputId, PresentationStats};
use crate::clock::Clock;
use crate::frame_clock::{
    ClockRoute, FlipHints, Frame, FrameInfo, FrameListener, FrameResult,
};
use crate::utils::{from_us, refresh_interval_us, to_us};

/// Behaviour of the simulated display and renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadlessParams {
    /// Display refresh rate, in Hz.
    pub refresh_rate: f64,
    /// CPU time from dispatch to buffer swap.
    pub render_cost: Duration,
    /// GPU time after the swap.
    pub gpu_cost: Duration,
    /// Upper bound of the random extra CPU time per frame.
    pub jitter: Duration,
    /// Probability that a dispatch has nothing to draw.
    pub idle_chance: f64,
    /// Report every flip as a direct scanout attempt.
    pub direct_scanout: bool,
}

impl Default for HeadlessParams {
    fn default() -> Self {
        Self {
            refresh_rate: 60.,
            render_cost: Duration::from_millis(3),
            gpu_cost: Duration::from_millis(2),
            jitter: Duration::ZERO,
            idle_chance: 0.,
            direct_scanout: false,
        }
    }
}

// 结构：无头后端
// 作用：模拟显示设备行为的虚拟输出，同时充当帧时钟的监听器
pub struct Headless<D: 'static> {
    output: OutputId,
    event_loop: LoopHandle<'static, D>,
    route: ClockRoute<D>,
    clock: Clock,
    params: HeadlessParams,
    rng: fastrand::Rng,
    /// Simulated vblanks happen at `vblank_epoch + k * refresh_interval`.
    vblank_epoch_us: i64,
    refresh_interval_us: i64,
    /// Latest presentation handed out, in-flight frames included.
    last_presentation_us: Option<i64>,
    stats: Rc<RefCell<PresentationStats>>,
}

impl<D: 'static> Headless<D> {
    pub fn new(
        event_loop: LoopHandle<'static, D>,
        route: ClockRoute<D>,
        params: HeadlessParams,
    ) -> Self {
        let clock = Clock::default();
        let output = OutputId::next();
        debug!(output = output.get(), ?params, "creating headless output");

        Self {
            output,
            event_loop,
            route,
            vblank_epoch_us: to_us(clock.now()),
            refresh_interval_us: refresh_interval_us(params.refresh_rate),
            clock,
            params,
            rng: fastrand::Rng::new(),
            last_presentation_us: None,
            stats: Rc::default(),
        }
    }

    /// Uses a different time source; the vblank grid restarts at its current time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.vblank_epoch_us = to_us(clock.now());
        self.clock = clock;
        self
    }

    /// Makes the simulated jitter and idle frames reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    /// Shared handle to the presentation counters.
    pub fn stats(&self) -> Rc<RefCell<PresentationStats>> {
        self.stats.clone()
    }

    /// First simulated vblank at or after `time`.
    fn vblank_at_or_after(&self, time: i64) -> i64 {
        let interval = self.refresh_interval_us;
        let since_epoch = (time - self.vblank_epoch_us).max(0);
        let vblanks = (since_epoch + interval - 1) / interval;
        self.vblank_epoch_us + vblanks * interval
    }

    fn jitter_us(&mut self) -> i64 {
        let max = to_us(self.params.jitter);
        if max == 0 {
            0
        } else {
            self.rng.i64(0..=max)
        }
    }

    fn submit(&mut self, frame: &Frame) {
        let swap = to_us(frame.dispatch_time) + to_us(self.params.render_cost) + self.jitter_us();
        let gpu = to_us(self.params.gpu_cost);

        // 同一个 vblank 只能翻一次页
        let mut presentation = self.vblank_at_or_after(swap + gpu);
        if let Some(last) = self.last_presentation_us {
            presentation = presentation.max(last + self.refresh_interval_us);
        }
        self.last_presentation_us = Some(presentation);

        let info = FrameInfo::presented_at(from_us(presentation), self.params.refresh_rate)
            .with_measurements(from_us(swap), from_us(gpu));
        let hints = if self.params.direct_scanout {
            FlipHints::DIRECT_SCANOUT_ATTEMPTED
        } else {
            FlipHints::empty()
        };
        let target = frame.target_presentation_time.map(to_us);

        trace!(
            output = self.output.get(),
            index = frame.index,
            swap,
            presentation,
            ?target,
            "submitted frame"
        );

        let deadline = Instant::now() + from_us(presentation).saturating_sub(self.clock.now());
        let route = self.route.clone();
        let stats = self.stats.clone();
        let output = self.output;
        let res = self
            .event_loop
            .insert_source(Timer::from_deadline(deadline), move |_, _, data| {
                record_presentation(&mut stats.borrow_mut(), presentation, target);

                let Some(frame_clock) = route(data) else {
                    trace!(output = output.get(), "frame clock is gone, dropping feedback");
                    return TimeoutAction::Drop;
                };
                frame_clock.record_flip(from_us(presentation), hints);
                // 违反不变量时帧时钟已经记录了错误日志
                let _ = frame_clock.notify_presented(info);
                TimeoutAction::Drop
            });

        if let Err(err) = res {
            warn!("error scheduling presentation feedback: {:?}", err.error);
        }
    }
}

fn record_presentation(stats: &mut PresentationStats, presentation: i64, target: Option<i64>) {
    stats.presented += 1;

    let Some(target) = target else {
        stats.unpredicted += 1;
        return;
    };

    let lateness = presentation - target;
    if lateness > 0 {
        stats.late += 1;
    } else if lateness == 0 {
        stats.on_target += 1;
    }
    stats.max_lateness_us = stats.max_lateness_us.max(lateness.unsigned_abs());
}

impl<D: 'static> FrameListener for Headless<D> {
    fn before_frame(&mut self, frame: &Frame) {
        let _span = tracy_client::span!("Headless::before_frame");
        trace!(output = self.output.get(), index = frame.index, "before frame");
    }

    fn produce_frame(&mut self, frame: &Frame) -> FrameResult {
        let _span = tracy_client::span!("Headless::produce_frame");

        if self.params.idle_chance > 0. && self.rng.f64() < self.params.idle_chance {
            trace!(output = self.output.get(), index = frame.index, "no damage");
            self.stats.borrow_mut().idle += 1;
            return FrameResult::Idle;
        }

        self.submit(frame);
        FrameResult::PendingPresented
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_counters() {
        let mut stats = PresentationStats::default();
        record_presentation(&mut stats, 100, Some(100));
        record_presentation(&mut stats, 300, Some(200));
        record_presentation(&mut stats, 50, Some(80));
        record_presentation(&mut stats, 400, None);

        assert_eq!(
            stats,
            PresentationStats {
                presented: 4,
                idle: 0,
                on_target: 1,
                late: 1,
                unpredicted: 1,
                max_lateness_us: 100,
            }
        );
        assert_eq!(stats.completed(), 4);
    }
}
