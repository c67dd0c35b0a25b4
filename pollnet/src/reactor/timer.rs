use crate::utils::Handle;

use std::cmp::Ordering;
use std::time::Instant;

/// A one-shot timer armed with [`Bridge::sleep`](crate::Bridge::sleep).
///
/// The timer lives in the arena until its single completion is
/// dispatched, either on expiry or on cancellation.
pub(crate) struct Timer {
    /// Correlation id echoed in the completion.
    pub(crate) id: i32,

    /// Set when the timer was cancelled before it fired.
    pub(crate) cancelled: bool,
}

/// An entry in the reactor timer queue.
///
/// `TimerEntry` represents a scheduled expiry at a specific
/// deadline. It is stored inside a binary heap ordered by deadline.
///
/// Entries are never removed on cancellation; an entry whose handle
/// no longer resolves is simply skipped when it reaches the top.
pub(crate) struct TimerEntry {
    /// The time at which the timer should fire.
    pub(crate) deadline: Instant,

    /// Arming order, breaks ties between equal deadlines.
    pub(crate) seq: u64,

    /// Arena handle of the [`Timer`].
    pub(crate) handle: Handle,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for TimerEntry {
    /// Orders timer entries by deadline, then by arming order.
    ///
    /// Note that the comparison is **reversed** so that a
    /// `BinaryHeap<TimerEntry>` behaves as a min-heap,
    /// where the earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

impl PartialOrd for TimerEntry {
    /// Partial ordering consistent with [`Ord`].
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
