//! Time-windowed priority queue for debounce-style emission.
//!
//! Aggregating blocks push one entry per arrival; the queue orders entries
//! by arrival time (ties broken by insertion order, so replay is
//! deterministic) and [`TimedQueue::peek_and_shift`] drives the
//! peek-and-shift eviction pass: pop every entry whose quiet window has
//! elapsed, then report how long until the next one is due.
//!
//! The window is supplied at every evaluation rather than snapshotted per
//! entry; changing it retroactively re-times all pending entries.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

struct Entry<T> {
    value: T,
    at: Instant,
    seq: u64,
}

// BinaryHeap is a max-heap; invert the ordering to pop the earliest entry.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

/// Outcome of one peek-and-shift step.
#[derive(Debug, PartialEq, Eq)]
pub enum Shift<T> {
    /// The earliest entry's window has elapsed; the entry has been popped.
    Due(T),
    /// The earliest entry is not due yet; re-check after this long.
    Wait(Duration),
    /// Nothing queued.
    Empty,
}

/// Min-priority queue over `(arrival time, insertion order)`.
pub struct TimedQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    seq: u64,
}

impl<T> TimedQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Queue a value with its arrival time.
    pub fn push(&mut self, value: T, at: Instant) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Entry { value, at, seq });
    }

    /// One eviction step: pop the earliest entry if `window` has elapsed
    /// since its arrival, otherwise report the remaining wait.
    ///
    /// Callers loop on this until they see `Wait` or `Empty` — several
    /// entries can become due in a single pass.
    pub fn peek_and_shift(&mut self, now: Instant, window: Duration) -> Shift<T> {
        let Some(head) = self.heap.peek() else {
            return Shift::Empty;
        };
        let elapsed = now.saturating_duration_since(head.at);
        if elapsed >= window {
            let entry = self.heap.pop().expect("peeked entry present");
            Shift::Due(entry.value)
        } else {
            Shift::Wait(window - elapsed)
        }
    }

    /// When the earliest queued entry becomes due, given the current window.
    /// Also `None` when the due time is too far out to represent; callers
    /// fall back to their idle recheck.
    pub fn next_due(&self, window: Duration) -> Option<Instant> {
        self.heap.peek().and_then(|e| e.at.checked_add(window))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for TimedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Entries must drain in nondecreasing (arrival, insertion) order no
        // matter what order they were pushed in.
        #[test]
        fn drains_in_arrival_order(offsets in proptest::collection::vec(0u64..5_000, 1..64)) {
            let t0 = Instant::now();
            let mut q = TimedQueue::new();
            for (i, off) in offsets.iter().enumerate() {
                q.push((*off, i), t0 + Duration::from_millis(*off));
            }

            let far = t0 + Duration::from_secs(3600);
            let mut drained = Vec::new();
            while let Shift::Due(v) = q.peek_and_shift(far, Duration::ZERO) {
                drained.push(v);
            }

            prop_assert_eq!(drained.len(), offsets.len());
            for pair in drained.windows(2) {
                let (off_a, seq_a) = pair[0];
                let (off_b, seq_b) = pair[1];
                prop_assert!(off_a < off_b || (off_a == off_b && seq_a < seq_b));
            }
        }
    }
}
