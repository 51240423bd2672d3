use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use proptest_derive::Arbitrary;

use super::fixture::*;
use crate::frame_clock::{FlipHints, FrameInfo, FrameResult, State, Urgency};
use crate::utils::from_us;

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Start {
    Init,
    Idle,
    Scheduled,
    DispatchedOne,
    DispatchedOneAndScheduled,
    DispatchedTwo,
}

fn reach(f: &mut Fixture, start: Start) {
    let expected = match start {
        Start::Init => State::Init,
        Start::Idle => {
            f.warm_up(START + 5000);
            State::Idle
        }
        Start::Scheduled => {
            f.clock.schedule_update();
            State::Scheduled
        }
        Start::DispatchedOne => {
            f.clock.schedule_update();
            f.fire();
            State::DispatchedOne
        }
        Start::DispatchedOneAndScheduled => {
            f.clock.schedule_update();
            f.fire();
            f.clock.schedule_update();
            State::DispatchedOneAndScheduled
        }
        Start::DispatchedTwo => {
            f.clock.schedule_update();
            f.fire();
            f.clock.schedule_update();
            f.fire();
            State::DispatchedTwo
        }
    };
    assert_eq!(f.state(), expected);
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Request {
    Normal,
    Now,
}

impl Request {
    fn urgency(self) -> Urgency {
        match self {
            Request::Normal => Urgency::Normal,
            Request::Now => Urgency::Now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
enum Retirement {
    Presented,
    Ready,
    IdleFrame,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Op {
    ScheduleUpdate,
    ScheduleUpdateNow,
    Fire,
    Dispatch,
    Present,
    Ready,
    Inhibit,
    Uninhibit,
    DirectScanoutFlip,
    Advance(#[proptest(strategy = "1u16..20_000")] u16),
}

proptest! {
    #[test]
    fn inhibited_requests_replay_once(
        start: Start,
        requests in prop::collection::vec(any::<Request>(), 0..8),
        depth in 1u32..4,
    ) {
        let mut f = Fixture::new();
        reach(&mut f, start);
        let dropped_wakeup = f.state().is_scheduled();

        for _ in 0..depth {
            f.clock.inhibit();
        }
        let arms = f.arms();
        prop_assert_eq!(f.armed(), None);

        for request in &requests {
            f.advance(100);
            match request {
                Request::Normal => f.clock.schedule_update(),
                Request::Now => f.clock.schedule_update_now(),
            }
        }
        for _ in 1..depth {
            f.clock.uninhibit().unwrap();
        }
        prop_assert_eq!(f.arms(), arms);
        prop_assert_eq!(f.armed(), None);

        let expected = requests
            .iter()
            .map(|request| request.urgency())
            .max()
            .max(dropped_wakeup.then_some(Urgency::Normal));
        prop_assert_eq!(f.clock.pending_reschedule(), expected);

        let inhibited_state = f.state();
        f.clock.uninhibit().unwrap();
        prop_assert_eq!(f.clock.inhibit_count(), 0);

        match expected {
            None => {
                prop_assert_eq!(f.arms(), arms);
                prop_assert_eq!(f.state(), inhibited_state);
            }
            Some(urgency) if inhibited_state == State::DispatchedTwo => {
                prop_assert_eq!(f.arms(), arms);
                prop_assert_eq!(f.clock.pending_reschedule(), Some(urgency));
            }
            Some(urgency) => {
                prop_assert_eq!(f.arms(), arms + 1);
                prop_assert_eq!(f.clock.pending_reschedule(), None);
                prop_assert!(f.state().is_scheduled());
                if urgency == Urgency::Now {
                    prop_assert_eq!(f.armed(), Some(f.now()));
                }
            }
        }
    }

    #[test]
    fn idle_frames_fold_like_feedback(second_frame: bool, timeline: bool, retirement: Retirement) {
        let run = |retirement: Retirement| {
            let mut f = Fixture::new();
            if timeline {
                f.clock.add_timeline(Rc::new(RefCell::new(RecordingTimeline::default())));
            } else {
                f.clock.schedule_update();
            }
            if second_frame {
                f.fire();
                f.clock.schedule_update();
            }

            if retirement == Retirement::IdleFrame {
                f.set_frame_result(FrameResult::Idle);
            }
            f.fire();
            match retirement {
                Retirement::Presented => {
                    let info = FrameInfo {
                        presentation_time: None,
                        refresh_rate: 0.,
                        cpu_time_before_swap: None,
                        gpu_rendering_duration: None,
                    };
                    f.clock.notify_presented(info).unwrap();
                }
                Retirement::Ready => f.clock.notify_ready().unwrap(),
                Retirement::IdleFrame => (),
            }

            (
                f.state(),
                f.armed(),
                f.clock.frame_count(),
                f.clock.pending_reschedule(),
                f.clock.invariant_violations(),
            )
        };

        prop_assert_eq!(run(Retirement::IdleFrame), run(retirement));
    }

    #[test]
    fn random_operations_keep_invariants(ops in prop::collection::vec(any::<Op>(), 0..64)) {
        let mut f = Fixture::new();
        let mut violations = 0;

        for op in ops {
            let state = f.state();
            let inhibited = f.clock.inhibit_count() > 0;

            match op {
                Op::ScheduleUpdate => f.clock.schedule_update(),
                Op::ScheduleUpdateNow => f.clock.schedule_update_now(),
                Op::Fire => {
                    if f.armed().is_some() {
                        f.fire();
                    }
                }
                Op::Dispatch => {
                    let res = f.clock.dispatch();
                    prop_assert_eq!(res.is_ok(), state.is_scheduled());
                    violations += u64::from(res.is_err());
                }
                Op::Present => {
                    let now = f.now();
                    let res = f.clock.notify_presented(FrameInfo::presented_at(from_us(now), 60.));
                    prop_assert_eq!(res.is_ok(), state.in_flight() > 0);
                    violations += u64::from(res.is_err());
                }
                Op::Ready => {
                    let res = f.clock.notify_ready();
                    prop_assert_eq!(res.is_ok(), state.in_flight() > 0);
                    violations += u64::from(res.is_err());
                }
                Op::Inhibit => f.clock.inhibit(),
                Op::Uninhibit => {
                    let res = f.clock.uninhibit();
                    prop_assert_eq!(res.is_ok(), inhibited);
                    violations += u64::from(res.is_err());
                }
                Op::DirectScanoutFlip => {
                    let now = f.time.now();
                    f.clock.record_flip(now, FlipHints::DIRECT_SCANOUT_ATTEMPTED);
                }
                Op::Advance(us) => f.advance(i64::from(us)),
            }

            prop_assert_eq!(f.clock.invariant_violations(), violations);
            if f.clock.inhibit_count() > 0 {
                prop_assert_eq!(f.armed(), None);
                prop_assert!(!f.state().is_scheduled());
            } else {
                prop_assert_eq!(f.armed().is_some(), f.state().is_scheduled());
            }
        }
    }
}
