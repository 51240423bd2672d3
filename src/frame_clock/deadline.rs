//! Deadline arithmetic: when to wake up, and which vblank the frame is aimed at.
//!
//! Everything here is pure and works on signed microseconds of the monotonic clock.

use std::fmt::{self, Write as _};

use super::estimator::LatencyEstimates;
use super::state::State;

/// Fraction of the refresh interval assumed as render time when nothing was measured.
pub const SYNC_DELAY_FALLBACK_FRACTION: f64 = 0.875;

/// When and how late the previous dispatch happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTiming {
    pub time: i64,
    /// Always in `[0, refresh_interval / 4)`.
    pub lateness: i64,
}

impl DispatchTiming {
    /// The dispatch time the cadence of the previous dispatch would have wanted next.
    pub fn ideal_next(self, refresh_interval: i64) -> i64 {
        self.time - self.lateness + refresh_interval
    }

    /// Timing of a dispatch happening at `now` following `previous`.
    ///
    /// Lateness outside `[0, refresh_interval / 4)` is a cadence reset rather than drift and is
    /// recorded as zero.
    pub fn following(previous: Option<Self>, now: i64, refresh_interval: i64) -> Self {
        let lateness = previous
            .map(|prev| now - prev.ideal_next(refresh_interval))
            .filter(|lateness| (0..refresh_interval / 4).contains(lateness))
            .unwrap_or(0);

        Self {
            time: now,
            lateness,
        }
    }
}

/// Inputs of a deadline computation.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineParams<'a> {
    pub now: i64,
    pub state: State,
    pub refresh_interval: i64,
    pub vblank_duration: i64,
    pub max_render_time_constant: i64,
    pub last_presentation_time: Option<i64>,
    pub last_dispatch: Option<DispatchTiming>,
    /// Still-valid prediction made for the previous frame.
    pub previous_presentation_time: Option<i64>,
    pub estimates: &'a LatencyEstimates,
    pub got_measurements_last_frame: bool,
    pub triple_buffering: bool,
    pub vrr: bool,
}

/// Result of a deadline computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// When the frame clock should dispatch.
    pub update_time: i64,
    /// Predicted presentation of the frame produced by that dispatch, if predictable.
    pub presentation_time: Option<i64>,
}

/// How the max render time was put together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTimeBreakdown {
    pub total: i64,
    pub measured: bool,
    pub dispatch_to_swap: i64,
    pub swap_to_rendering_done: i64,
    pub swap_to_flip: i64,
    /// Swap-to-flip after subtracting the queue latency already covered by pipelining.
    pub swap_to_flip_adjusted: i64,
    pub vblank_duration: i64,
    pub constant: i64,
}

/// Computes how long before a presentation the frame clock has to dispatch.
pub fn max_render_time(params: &DeadlineParams<'_>) -> i64 {
    render_time_breakdown(params).total
}

pub fn render_time_breakdown(params: &DeadlineParams<'_>) -> RenderTimeBreakdown {
    let refresh_interval = params.refresh_interval;
    let estimates = params.estimates;
    let in_flight = i64::from(params.state.in_flight());

    let dispatch_to_swap = estimates.dispatch_to_swap.max();
    let swap_to_rendering_done = estimates.swap_to_rendering_done.max();
    let swap_to_flip = estimates.swap_to_flip.max();
    // 在途帧已经抵消了一部分排队延迟
    let swap_to_flip_adjusted = (swap_to_flip - refresh_interval * in_flight).max(0);

    let total = if params.got_measurements_last_frame {
        let total = dispatch_to_swap
            + swap_to_rendering_done.max(swap_to_flip_adjusted)
            + params.vblank_duration
            + params.max_render_time_constant;
        total.clamp(0, 2 * refresh_interval)
    } else {
        let mut total = (refresh_interval as f64 * SYNC_DELAY_FALLBACK_FRACTION) as i64;
        // 已有一帧在途时，下一帧瞄准的是再下一个 vblank
        if in_flight == 1 && params.triple_buffering {
            total += refresh_interval;
        }
        total
    };

    RenderTimeBreakdown {
        total,
        measured: params.got_measurements_last_frame,
        dispatch_to_swap,
        swap_to_rendering_done,
        swap_to_flip,
        swap_to_flip_adjusted,
        vblank_duration: params.vblank_duration,
        constant: params.max_render_time_constant,
    }
}

/// Computes the next wakeup and the presentation it aims for.
pub fn next_deadline(params: &DeadlineParams<'_>) -> Deadline {
    let now = params.now;
    let refresh_interval = params.refresh_interval;

    let Some(last_presentation_time) = params.last_presentation_time else {
        // Nothing was ever presented: keep the dispatch cadence, or go right away the first time.
        let update_time = params
            .last_dispatch
            .map_or(now, |last| last.ideal_next(refresh_interval));
        return Deadline {
            update_time,
            presentation_time: None,
        };
    };

    let max_render = max_render_time(params);
    // 至少留出半个刷新间隔给渲染
    let min_render = (refresh_interval / 2).min(max_render);
    // 在途帧已经占用了后面的 vblank
    let frames_ahead = i64::from(params.state.in_flight()) + 1;

    if params.vrr {
        // With VRR the display follows us; only the maximum refresh rate limits the cadence.
        let earliest = last_presentation_time + frames_ahead * refresh_interval - max_render;
        return Deadline {
            update_time: earliest.max(now),
            presentation_time: None,
        };
    }

    // The common case is the vblank right after the ones already claimed by in-flight frames.
    let mut next_presentation_time = last_presentation_time + frames_ahead * refresh_interval;

    // The last presentation may be more than a frame ago: idle output, or a busy GPU.
    if next_presentation_time < now {
        next_presentation_time = realign(last_presentation_time, now, refresh_interval);
    }

    if let Some(previous) = params.previous_presentation_time {
        // An early presented event makes us aim at the vblank the previous frame already got.
        let since_previous = next_presentation_time - previous;
        if since_previous > 0 && since_previous < refresh_interval / 2 {
            trace!(
                previous,
                next_presentation_time,
                "early presentation, skipping one refresh interval"
            );
            next_presentation_time = previous + refresh_interval;
        }
    }

    // 离目标太近就改瞄下一个 vblank
    while next_presentation_time < now + min_render {
        next_presentation_time += refresh_interval;
    }

    Deadline {
        update_time: next_presentation_time - max_render,
        presentation_time: Some(next_presentation_time),
    }
}

/// Returns the first presentation slot after `now` that keeps the phase of `last_presentation`.
///
/// ```text
///     last_presentation
///    /       stale prediction
///   /       /   now
///  /       /   /    realigned
/// |-------|---o---|-------|--> possible presentation times
/// ```
pub fn realign(last_presentation: i64, now: i64, refresh_interval: i64) -> i64 {
    // 帧时钟保证刷新间隔至少 1 µs
    debug_assert!(refresh_interval > 0);

    // 两个时间点在各自刷新周期内的相位
    let presentation_phase = last_presentation.rem_euclid(refresh_interval);
    let current_phase = now.rem_euclid(refresh_interval);

    // 找到包含 now 且与呈现相位对齐的周期起点
    let mut interval_start = now - current_phase;
    if current_phase < presentation_phase {
        interval_start -= refresh_interval;
    }

    interval_start + presentation_phase + refresh_interval
}

impl RenderTimeBreakdown {
    /// Multi-line human readable description.
    pub fn describe(&self) -> String {
        let mut s = String::new();
        // 写入 String 不会失败
        let _ = self.write_to(&mut s);
        s
    }

    fn write_to(&self, s: &mut String) -> fmt::Result {
        write!(s, "max render time: {} µs", self.total)?;
        if !self.measured {
            write!(s, " (no measurements last frame, using fallback)")?;
        }
        writeln!(s)?;
        writeln!(s, "dispatch to swap: {} µs", self.dispatch_to_swap)?;
        writeln!(s, "swap to rendering done: {} µs", self.swap_to_rendering_done)?;
        writeln!(
            s,
            "swap to flip: {} µs ({} µs after queue latency)",
            self.swap_to_flip, self.swap_to_flip_adjusted
        )?;
        writeln!(s, "vblank duration: {} µs", self.vblank_duration)?;
        write!(s, "constant: {} µs", self.constant)
    }
}
