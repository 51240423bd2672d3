//! Dispatch states and the transitions that do not need the deadline calculator.

use std::error::Error;
use std::fmt;

use serde::Serialize;

/// Lifecycle of one output's frame clock.
///
/// The two "dispatched" states count frames in flight to the display. A third frame in flight is
/// never allowed: schedule requests in [`State::DispatchedTwo`] are deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum State {
    /// Nothing was ever scheduled.
    Init,
    Idle,
    Scheduled,
    DispatchedOne,
    DispatchedOneAndScheduled,
    DispatchedTwo,
}

/// Priority of a deferred reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Urgency {
    /// Wake up at the computed deadline.
    Normal,
    /// Wake up as soon as possible.
    Now,
}

/// External events the state machine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockEvent {
    Dispatch,
    Presented,
    Ready,
    IdleFrame,
    Uninhibit,
}

/// An event arrived in a state that cannot accept it.
///
/// This is a programming error somewhere in the caller; the clock leaves its state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvariantViolation {
    pub event: ClockEvent,
    pub state: State,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected {:?} in state {:?}", self.event, self.state)
    }
}

impl Error for InvariantViolation {}

impl State {
    /// Number of frames dispatched and still awaiting presentation feedback.
    pub fn in_flight(self) -> u32 {
        match self {
            // 已调度但还没派发的帧不算在途
            State::Init | State::Idle | State::Scheduled => 0,
            State::DispatchedOne | State::DispatchedOneAndScheduled => 1,
            State::DispatchedTwo => 2,
        }
    }

    /// Whether a wakeup is currently wanted.
    pub fn is_scheduled(self) -> bool {
        matches!(self, State::Scheduled | State::DispatchedOneAndScheduled)
    }

    /// State after the wakeup fires.
    pub fn dispatched(self) -> Result<State, InvariantViolation> {
        match self {
            State::Scheduled => Ok(State::DispatchedOne),
            State::DispatchedOneAndScheduled => Ok(State::DispatchedTwo),
            // 没有唤醒在等待，不应该派发
            State::Init | State::Idle | State::DispatchedOne | State::DispatchedTwo => {
                Err(InvariantViolation {
                    event: ClockEvent::Dispatch,
                    state: self,
                })
            }
        }
    }

    /// State after the oldest in-flight frame is presented, reported ready, or turns out idle.
    pub fn retired(self, event: ClockEvent) -> Result<State, InvariantViolation> {
        match self {
            State::DispatchedOne => Ok(State::Idle),
            State::DispatchedOneAndScheduled => Ok(State::Scheduled),
            State::DispatchedTwo => Ok(State::DispatchedOne),
            // 没有在途帧可以退役
            State::Init | State::Idle | State::Scheduled => {
                Err(InvariantViolation { event, state: self })
            }
        }
    }

    /// State after the first inhibit, and whether a pending wakeup had to be dropped.
    pub fn inhibited(self) -> (State, bool) {
        match self {
            // 取消唤醒，在途帧不受影响
            State::Scheduled => (State::Idle, true),
            State::DispatchedOneAndScheduled => (State::DispatchedOne, true),
            State::Init | State::Idle | State::DispatchedOne | State::DispatchedTwo => {
                (self, false)
            }
        }
    }
}
