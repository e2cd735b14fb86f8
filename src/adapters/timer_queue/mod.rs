// Timer queue adapter - Deadline-ordered scheduler driven by the host loop

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::ports::{Scheduler, Timer, TimerHandle};

/// Single-threaded timer queue.
///
/// The host loop sleeps until [`TimerQueue::next_deadline`] and then fires
/// whatever [`TimerQueue::pop_due`] returns. Timers scheduled for the same
/// instant fire in scheduling order.
#[derive(Debug)]
pub struct TimerQueue {
    pending: BTreeMap<(Instant, TimerHandle), Timer>,
    next_handle: u64,
    clock: fn() -> Instant,
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_handle: 0,
            clock: Instant::now,
        }
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<Timer> {
        let mut due = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    /// Whether a timer of this kind is pending
    pub fn contains(&self, timer: Timer) -> bool {
        self.pending.values().any(|t| *t == timer)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Scheduler for TimerQueue {
    fn schedule(&mut self, after: Duration, timer: Timer) -> TimerHandle {
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);
        self.pending.insert(((self.clock)() + after, handle), timer);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.retain(|(_, h), _| *h != handle);
    }
}
