//! Turning "next update time" into a timer on an event loop, and the timer back into a dispatch.

use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};

use super::FrameClock;
use crate::clock::Clock;

/// A single re-armable wakeup owned by one frame clock.
pub trait Wakeup {
    /// Requests a dispatch at `deadline` (monotonic time), replacing any earlier request.
    ///
    /// A deadline in the past fires as soon as possible.
    fn arm(&mut self, deadline: Duration);

    /// Cancels the pending request, if any.
    fn disarm(&mut self);

    /// Called by the clock when the armed wakeup has fired and is being handled.
    fn fired(&mut self) {}
}

/// Finds the frame clock a wakeup belongs to in the event loop data.
pub type ClockRoute<D> = Rc<dyn Fn(&mut D) -> Option<&mut FrameClock>>;

/// [`Wakeup`] backed by a calloop timer source.
pub struct CalloopWakeup<D: 'static> {
    event_loop: LoopHandle<'static, D>,
    route: ClockRoute<D>,
    clock: Clock,
    token: Option<RegistrationToken>,
}

impl<D: 'static> CalloopWakeup<D> {
    pub fn new(event_loop: LoopHandle<'static, D>, route: ClockRoute<D>) -> Self {
        Self {
            event_loop,
            route,
            clock: Clock::default(),
            token: None,
        }
    }

    /// Uses a different time source to translate deadlines into timer instants.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_armed(&self) -> bool {
        self.token.is_some()
    }
}

impl<D: 'static> Wakeup for CalloopWakeup<D> {
    fn arm(&mut self, deadline: Duration) {
        // 同一时刻只保留一个定时器
        self.disarm();

        // 单调时间换算成 calloop 使用的 Instant
        let now = self.clock.now();
        let instant = Instant::now() + deadline.saturating_sub(now);
        let timer = Timer::from_deadline(instant);

        // 回调里通过 route 从事件循环数据找回帧时钟
        let route = self.route.clone();
        let res = self.event_loop.insert_source(timer, move |_, _, data| {
            if let Some(frame_clock) = route(data) {
                // 违反不变量时帧时钟已经记录了错误日志
                let _ = frame_clock.on_wakeup();
            } else {
                trace!("frame clock is gone, dropping wakeup");
            }
            TimeoutAction::Drop
        });

        match res {
            Ok(token) => self.token = Some(token),
            Err(err) => warn!("error arming frame clock timer: {:?}", err.error),
        }
    }

    fn disarm(&mut self) {
        if let Some(token) = self.token.take() {
            self.event_loop.remove(token);
        }
    }

    fn fired(&mut self) {
        // 触发中的定时器由 TimeoutAction::Drop 移除，这里只需忘记令牌
        self.token = None;
    }
}

impl<D: 'static> Drop for CalloopWakeup<D> {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl<D: 'static> fmt::Debug for CalloopWakeup<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalloopWakeup")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
