// clock.rs
// 此文件定义了帧时钟使用的时间源。
// 生产环境中直接读取单调时钟；测试中可以冻结时间并手动推进，使截止时间计算可重复。

use std::cell::RefCell; // Rust内部可变性容器：允许在不可变引用下修改内部数据
use std::rc::Rc; // 引用计数智能指针：实现多所有权共享
use std::time::Duration;

use crate::utils::get_monotonic_time;

/// Shareable monotonic time source that can be frozen.
///
/// A live clock reads `CLOCK_MONOTONIC` on every call. A frozen clock returns the time it was
/// last set to until it is advanced, set again, or cleared back to live.
#[derive(Debug, Default, Clone)]
pub struct Clock {
    inner: Rc<RefCell<Option<Duration>>>, // None 表示实时读取
}

impl Clock {
    /// Creates a frozen clock with the given time.
    pub fn with_time(time: Duration) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Some(time))),
        }
    }

    /// Returns the current time.
    pub fn now(&self) -> Duration {
        self.inner.borrow().unwrap_or_else(get_monotonic_time)
    }

    /// Returns whether the clock is frozen.
    pub fn is_frozen(&self) -> bool {
        self.inner.borrow().is_some()
    }

    /// Freezes the clock at the given time.
    pub fn set(&mut self, time: Duration) {
        *self.inner.borrow_mut() = Some(time);
    }

    /// Advances a frozen clock; freezes a live one at `now + delta`.
    pub fn advance(&mut self, delta: Duration) {
        let now = self.now();
        self.set(now.saturating_add(delta));
    }

    /// Returns to reading the monotonic clock.
    pub fn clear(&mut self) {
        *self.inner.borrow_mut() = None;
    }
}

// 实现相等比较（基于Rc指针相等）
impl PartialEq for Clock {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Clock {}
