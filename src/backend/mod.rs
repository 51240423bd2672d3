//! 作用：显示后端抽象层
//! 说明：帧时钟不关心真实的显示设备，这里提供的是按固定 vblank 节奏模拟呈现反馈的后端
//! 功能：
//!   - 为输出分配唯一ID
//!   - 统计呈现结果（准时/迟到/空闲）

use serde::Serialize;

use crate::utils::id::IdCounter;

pub mod headless; // 无头模拟后端
pub use headless::{Headless, HeadlessParams};

// 静态ID计数器
// 作用：全局唯一的输出ID生成器
static OUTPUT_ID_COUNTER: IdCounter = IdCounter::new();

// 结构：输出标识符
// 作用：唯一标识模拟输出设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OutputId(u64);

impl OutputId {
    pub fn next() -> OutputId {
        OutputId(OUTPUT_ID_COUNTER.next())
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Outcome counters for one output.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PresentationStats {
    /// Frames that reached the display.
    pub presented: u64,
    /// Dispatches where the listener had nothing to show.
    pub idle: u64,
    /// Presented frames that hit the predicted vblank exactly.
    pub on_target: u64,
    /// Presented frames that landed after the predicted vblank.
    pub late: u64,
    /// Presented frames dispatched without a prediction.
    pub unpredicted: u64,
    /// Worst distance between predicted and actual presentation, in microseconds.
    pub max_lateness_us: u64,
}

impl PresentationStats {
    /// Total number of dispatches that completed.
    pub fn completed(&self) -> u64 {
        self.presented + self.idle
    }
}
