//! The boundary between the frame clock and whoever renders and presents frames.

use std::time::Duration;

use bitflags::bitflags;

/// A dispatched frame, as seen by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Value of the frame counter for this dispatch, starting at zero.
    pub index: u64,
    pub dispatch_time: Duration,
    /// The vblank this frame is aimed at, when the clock could predict it.
    pub target_presentation_time: Option<Duration>,
    pub refresh_interval: Duration,
}

/// Outcome of [`FrameListener::produce_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameResult {
    /// A frame was submitted; presentation feedback will follow.
    PendingPresented,
    /// Nothing was submitted this cycle.
    Idle,
}

/// Produces frames when the frame clock dispatches.
///
/// Both hooks run on the event loop thread, once per dispatch, `before_frame` first. The listener
/// must not feed presentation back into the clock from inside these hooks.
pub trait FrameListener {
    /// Advisory notification right before timelines advance.
    fn before_frame(&mut self, _frame: &Frame) {}

    /// Renders and submits the frame, if there is anything to show.
    fn produce_frame(&mut self, frame: &Frame) -> FrameResult;
}

bitflags! {
    /// Hints the backend attaches to a buffer flip.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FlipHints: u32 {
        /// The frame went to scanout without composition; pipelining another frame is unsafe.
        const DIRECT_SCANOUT_ATTEMPTED = 1 << 0;
    }
}

/// Presentation feedback for the oldest in-flight frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// When the frame hit the screen.
    pub presentation_time: Option<Duration>,
    /// Refresh rate the display reported, in Hz.
    pub refresh_rate: f64,
    /// CPU timestamp right before the buffer swap.
    pub cpu_time_before_swap: Option<Duration>,
    /// How long the GPU took to finish rendering after the swap.
    pub gpu_rendering_duration: Option<Duration>,
}

impl FrameInfo {
    /// Feedback carrying only a presentation timestamp.
    pub fn presented_at(presentation_time: Duration, refresh_rate: f64) -> Self {
        Self {
            presentation_time: Some(presentation_time),
            refresh_rate,
            cpu_time_before_swap: None,
            gpu_rendering_duration: None,
        }
    }

    /// Adds render timing measurements.
    pub fn with_measurements(
        mut self,
        cpu_time_before_swap: Duration,
        gpu_rendering_duration: Duration,
    ) -> Self {
        self.cpu_time_before_swap = Some(cpu_time_before_swap);
        self.gpu_rendering_duration = Some(gpu_rendering_duration);
        self
    }
}
