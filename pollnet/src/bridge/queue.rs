use super::Completion;

use std::collections::VecDeque;
use tracing::warn;

/// Default bound of the event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_240;

/// Bounded FIFO of completions.
///
/// Pushing never fails and never blocks: once the bound is reached the
/// oldest completion is evicted and handed back to the caller, which
/// decides what to do with it.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<Completion>,
    capacity: usize,

    /// Total number of evicted completions.
    dropped: u64,

    /// Set while the queue is at its bound, so overflow is logged once
    /// per episode rather than once per eviction.
    overflowing: bool,
}

impl EventQueue {
    /// Creates a queue holding at most `capacity` completions.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");

        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
            overflowing: false,
        }
    }

    /// Appends a completion, evicting and returning the oldest one if the
    /// queue is full.
    pub fn push(&mut self, completion: Completion) -> Option<Completion> {
        let evicted = if self.events.len() >= self.capacity {
            self.dropped += 1;

            if !self.overflowing {
                self.overflowing = true;
                warn!(
                    capacity = self.capacity,
                    dropped = self.dropped,
                    "event queue full, dropping oldest events"
                );
            }

            self.events.pop_front()
        } else {
            None
        };

        self.events.push_back(completion);
        evicted
    }

    /// Removes and returns the oldest completion.
    pub fn pop(&mut self) -> Option<Completion> {
        let completion = self.events.pop_front();

        if self.overflowing && self.events.len() < self.capacity {
            self.overflowing = false;
        }

        completion
    }

    /// Returns the oldest completion without removing it.
    pub fn front(&self) -> Option<&Completion> {
        self.events.front()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of completions evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
