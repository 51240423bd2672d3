use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use calloop::EventLoop;

use super::fixture::RecordingTimeline;
use crate::backend::{Headless, HeadlessParams, PresentationStats};
use crate::config::FrameClockConfig;
use crate::frame_clock::{
    CalloopWakeup, ClockRoute, Frame, FrameClock, FrameListener, FrameResult, State,
};

struct LoopState {
    clock: Option<FrameClock>,
}

impl LoopState {
    fn clock(&mut self) -> &mut FrameClock {
        self.clock.as_mut().unwrap()
    }
}

fn route_clock(state: &mut LoopState) -> Option<&mut FrameClock> {
    state.clock.as_mut()
}

struct CountingListener(Rc<RefCell<u64>>);

impl FrameListener for CountingListener {
    fn produce_frame(&mut self, _frame: &Frame) -> FrameResult {
        *self.0.borrow_mut() += 1;
        FrameResult::PendingPresented
    }
}

/// Runs the event loop until `done` holds, giving up after a couple of seconds.
fn dispatch_until(
    event_loop: &mut EventLoop<'static, LoopState>,
    state: &mut LoopState,
    done: impl Fn(&mut LoopState) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done(state) {
        if Instant::now() > deadline {
            return false;
        }
        event_loop
            .dispatch(Some(Duration::from_millis(10)), state)
            .unwrap();
    }
    true
}

fn counting_clock(event_loop: &EventLoop<'static, LoopState>) -> (LoopState, Rc<RefCell<u64>>) {
    let frames = Rc::new(RefCell::new(0));
    let route: ClockRoute<LoopState> = Rc::new(route_clock);
    let wakeup = CalloopWakeup::new(event_loop.handle(), route);
    let clock = FrameClock::new(
        60.,
        Duration::from_micros(500),
        Box::new(CountingListener(frames.clone())),
        Box::new(wakeup),
        FrameClockConfig::default(),
    )
    .unwrap();
    (LoopState { clock: Some(clock) }, frames)
}

fn headless_clock(
    event_loop: &EventLoop<'static, LoopState>,
    params: HeadlessParams,
) -> (LoopState, Rc<RefCell<PresentationStats>>) {
    let route: ClockRoute<LoopState> = Rc::new(route_clock);
    let headless = Headless::new(event_loop.handle(), route.clone(), params).with_seed(1);
    let stats = headless.stats();
    let wakeup = CalloopWakeup::new(event_loop.handle(), route);
    let clock = FrameClock::new(
        params.refresh_rate,
        Duration::from_micros(100),
        Box::new(headless),
        Box::new(wakeup),
        FrameClockConfig::default(),
    )
    .unwrap();
    (LoopState { clock: Some(clock) }, stats)
}

#[test]
fn calloop_wakeup_dispatches_clock() {
    let mut event_loop = EventLoop::try_new().unwrap();
    let (mut state, frames) = counting_clock(&event_loop);

    state.clock().schedule_update();
    assert!(dispatch_until(&mut event_loop, &mut state, |state| {
        state.clock().frame_count() == 1
    }));

    assert_eq!(state.clock().state(), State::DispatchedOne);
    assert_eq!(*frames.borrow(), 1);
}

#[test]
fn inhibit_removes_armed_timer() {
    let mut event_loop = EventLoop::try_new().unwrap();
    let (mut state, frames) = counting_clock(&event_loop);

    state.clock().schedule_update();
    state.clock().inhibit();
    event_loop
        .dispatch(Some(Duration::from_millis(30)), &mut state)
        .unwrap();
    assert_eq!(state.clock().state(), State::Idle);
    assert_eq!(*frames.borrow(), 0);

    state.clock().uninhibit().unwrap();
    assert!(dispatch_until(&mut event_loop, &mut state, |state| {
        state.clock().frame_count() == 1
    }));
    assert_eq!(*frames.borrow(), 1);
}

#[test]
fn headless_output_presents_frames() {
    let mut event_loop = EventLoop::try_new().unwrap();
    let params = HeadlessParams {
        refresh_rate: 240.,
        render_cost: Duration::from_micros(500),
        gpu_cost: Duration::from_micros(500),
        jitter: Duration::from_micros(200),
        ..HeadlessParams::default()
    };
    let (mut state, stats) = headless_clock(&event_loop, params);

    let timeline = Rc::new(RefCell::new(RecordingTimeline::default()));
    state.clock().add_timeline(timeline.clone());

    assert!(dispatch_until(&mut event_loop, &mut state, |_| {
        stats.borrow().presented >= 10
    }));

    let clock = state.clock();
    assert_eq!(clock.invariant_violations(), 0);
    assert!(clock.got_measurements_last_frame());
    assert!(clock.last_presentation_time().is_some());
    assert_relative_eq!(clock.refresh_rate(), 240.);
    assert_eq!(
        timeline.borrow().frame_times.len() as u64,
        clock.frame_count()
    );

    let stats = stats.borrow();
    assert_eq!(stats.idle, 0);
    assert!(stats.unpredicted < stats.presented);

    state.clock.take().unwrap().destroy();
}

#[test]
fn headless_idle_frames_keep_cadence() {
    let mut event_loop = EventLoop::try_new().unwrap();
    let params = HeadlessParams {
        refresh_rate: 240.,
        idle_chance: 1.,
        ..HeadlessParams::default()
    };
    let (mut state, stats) = headless_clock(&event_loop, params);

    let timeline = Rc::new(RefCell::new(RecordingTimeline::default()));
    state.clock().add_timeline(timeline);

    assert!(dispatch_until(&mut event_loop, &mut state, |_| {
        stats.borrow().idle >= 3
    }));

    // 空闲帧立即退役，时间线让时钟继续按节奏调度
    assert_eq!(stats.borrow().presented, 0);
    assert_eq!(state.clock().state(), State::Scheduled);
    assert_eq!(state.clock().last_presentation_time(), None);
}
