//! Animation timelines driven by the frame clock.
//!
//! What a timeline does with the frame time is up to it; the clock only advances every
//! registered timeline once per dispatch.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::utils::id::IdCounter;

static TIMELINE_ID_COUNTER: IdCounter = IdCounter::new();

/// Something that advances once per frame.
pub trait Timeline {
    /// Advances to the given frame time.
    fn advance(&mut self, frame_time: Duration);
}

/// Identifies a registered timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimelineId(u64);

impl TimelineId {
    fn next() -> TimelineId {
        TimelineId(TIMELINE_ID_COUNTER.next())
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

type Entry = (TimelineId, Rc<RefCell<dyn Timeline>>);

/// Shared, ordered set of timelines.
///
/// Clones share the same set, so a timeline may hold a handle and add or remove members while
/// it is being advanced.
#[derive(Clone, Default)]
pub struct Timelines {
    entries: Rc<RefCell<Vec<Entry>>>,
}

impl Timelines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a timeline.
    ///
    /// Does not request a frame; see [`FrameClock::timelines`](super::FrameClock::timelines).
    pub fn insert(&self, timeline: Rc<RefCell<dyn Timeline>>) -> TimelineId {
        let id = TimelineId::next();
        self.entries.borrow_mut().push((id, timeline));
        id
    }

    /// Removes a timeline, returning whether it was registered.
    pub fn remove(&self, id: TimelineId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let len = entries.len();
        entries.retain(|(x, _)| *x != id);
        entries.len() != len
    }

    pub fn contains(&self, id: TimelineId) -> bool {
        self.entries.borrow().iter().any(|(x, _)| *x == id)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Advances every timeline registered when the pass starts.
    ///
    /// Iterates over a snapshot holding its own references. Timelines removed during the pass
    /// are skipped; timelines added during the pass first advance on the next frame.
    pub fn advance(&self, frame_time: Duration) {
        let snapshot: Vec<Entry> = self.entries.borrow().clone();

        for (id, timeline) in snapshot {
            if !self.contains(id) {
                continue;
            }

            match timeline.try_borrow_mut() {
                Ok(mut timeline) => timeline.advance(frame_time),
                // Only possible if a timeline advances the set from inside its own advance.
                Err(_) => warn!(timeline = id.get(), "timeline is already advancing, skipping"),
            }
        }
    }
}

impl fmt::Debug for Timelines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<_> = self.entries.borrow().iter().map(|(id, _)| id.0).collect();
        f.debug_struct("Timelines").field("ids", &ids).finish()
    }
}
