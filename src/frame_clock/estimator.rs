//! Sliding-window latency estimates.
//!
//! Recency is approximate: there are no timestamps, only the fixed window length.

/// Number of samples kept per window.
pub const ESTIMATE_QUEUE_LENGTH: usize = 16;

/// Fixed-size ring of the most recent samples, in microseconds.
///
/// Slots start at zero, so an under-filled window biases [`EstimateQueue::max`] toward zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimateQueue {
    // 环形缓冲区
    values: [i64; ESTIMATE_QUEUE_LENGTH],
    // 下一个要覆盖的槽位
    next_index: usize,
}

impl EstimateQueue {
    pub const fn new() -> Self {
        Self {
            values: [0; ESTIMATE_QUEUE_LENGTH],
            next_index: 0,
        }
    }

    /// Overwrites the oldest sample.
    pub fn record(&mut self, value: i64) {
        self.values[self.next_index] = value;
        // 到末尾后回到开头
        self.next_index = (self.next_index + 1) % ESTIMATE_QUEUE_LENGTH;
    }

    /// Maximum over the whole window.
    pub fn max(&self) -> i64 {
        // 窗口长度固定且非零，fold 从第一个槽位开始即可
        self.values.iter().copied().fold(self.values[0], i64::max)
    }
}

impl Default for EstimateQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The three latency windows feeding the max render time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatencyEstimates {
    // 派发到 swap 的 CPU 时间
    pub dispatch_to_swap: EstimateQueue,
    // swap 之后 GPU 还需要的渲染时间
    pub swap_to_rendering_done: EstimateQueue,
    // swap 到翻转（或呈现）的排队时间
    pub swap_to_flip: EstimateQueue,
}

/// One frame's worth of measurements, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    pub dispatch_to_swap: i64,
    pub swap_to_rendering_done: i64,
    pub swap_to_flip: i64,
}

impl LatencyEstimates {
    pub fn record(&mut self, sample: LatencySample) {
        self.dispatch_to_swap.record(sample.dispatch_to_swap);
        self.swap_to_rendering_done
            .record(sample.swap_to_rendering_done);
        self.swap_to_flip.record(sample.swap_to_flip);
    }
}
