// 文件: utils/id.rs
// 作用: 原子ID生成器，为帧时钟和动画时间线分配进程内唯一标识符
// 应用场景:
//   - 每个输出的帧时钟 ClockId（出现在 tracing span 中）
//   - 时间线 TimelineId（用于 remove_timeline）
//   - 模拟输出的 OutputId

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter that returns unique IDs.
pub struct IdCounter {
    value: AtomicU64,
}

impl IdCounter {
    pub const fn new() -> Self {
        Self {
            // Start from 1 to reduce the possibility of confusion with zero timestamps in logs.
            value: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        // Relaxed: 只需要唯一性，不需要与其他内存操作排序
        self.value.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}
