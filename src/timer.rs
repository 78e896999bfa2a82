//! One-shot timer wheel used for reconnect backoff, logfile timestamping,
//! and reset-subprocess watchdogs (§4.1).
//!
//! Unlike the teacher's bucketed `Timer<T>` (slotted wheel + doubly linked
//! lists, sized for tens of thousands of in-flight timeouts), this daemon
//! carries at most a few hundred live timers at once, so a binary heap
//! keyed by deadline is simpler and still O(log n) for schedule/cancel.
//! Cancellation is lazy: the entry is removed from the id table immediately
//! (invariant 6: a cancelled timer never fires) and the stale heap slot is
//! skipped when it is eventually popped.
//!
//! Timers carry a plain payload `T` rather than a boxed closure — the same
//! choice the teacher's own deprecated `EventLoop` made with its
//! `Handler::Timeout` associated type dispatched through `Handler::timeout`
//! — because the event loop's timer callbacks need mutable access to the
//! whole loop (objects, poller, other timers), which a closure captured at
//! schedule time cannot borrow. The event loop drains fired payloads and
//! matches on them itself.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

pub type TimerId = u64;

#[derive(PartialEq, Eq)]
struct HeapKey {
    deadline: Instant,
    seq: u64,
    id: TimerId,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so BinaryHeap (a max-heap) pops the earliest deadline
        // first; ties break by insertion order (§4.1).
        other.deadline.cmp(&self.deadline).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct TimerWheel<T> {
    heap: BinaryHeap<HeapKey>,
    entries: HashMap<TimerId, T>,
    next_id: TimerId,
    next_seq: u64,
}

impl<T> TimerWheel<T> {
    pub fn new() -> Self {
        TimerWheel { heap: BinaryHeap::new(), entries: HashMap::new(), next_id: 0, next_seq: 0 }
    }

    /// Schedules `payload` to fire at `deadline`. Returns an id usable
    /// with `cancel`.
    pub fn schedule_absolute(&mut self, deadline: Instant, payload: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        self.entries.insert(id, payload);
        self.heap.push(HeapKey { deadline, seq, id });
        id
    }

    pub fn schedule_relative(&mut self, delay: Duration, payload: T) -> TimerId {
        self.schedule_absolute(Instant::now() + delay, payload)
    }

    /// Cancels a pending timer. Returns `false` if `id` is unknown or has
    /// already fired — not an error (§4.1 "Failure").
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// The nearest deadline among pending timers, used to compute the
    /// poller's timeout for the next iteration.
    pub fn next_deadline(&self) -> Option<Instant> {
        // Skip lazily-cancelled heap entries when peeking.
        self.heap.iter().filter(|k| self.entries.contains_key(&k.id)).map(|k| k.deadline).min()
    }

    /// Drains every timer whose deadline is <= `now`, in deadline order,
    /// for the caller to act on (§4.1 "run_expired").
    pub fn take_expired(&mut self, now: Instant) -> Vec<T> {
        let mut fired = Vec::new();
        loop {
            let ready = matches!(self.heap.peek(), Some(top) if top.deadline <= now);
            if !ready {
                break;
            }
            let key = self.heap.pop().expect("peeked Some above");
            if let Some(payload) = self.entries.remove(&key.id) {
                fired.push(payload);
            } // else: cancelled since it was queued
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut wheel: TimerWheel<i32> = TimerWheel::new();
        let now = Instant::now();
        wheel.schedule_absolute(now + Duration::from_millis(20), 2);
        wheel.schedule_absolute(now + Duration::from_millis(10), 1);
        wheel.schedule_absolute(now + Duration::from_millis(30), 3);
        let fired = wheel.take_expired(now + Duration::from_millis(100));
        assert_eq!(fired, vec![1, 2, 3]);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut wheel: TimerWheel<i32> = TimerWheel::new();
        let deadline = Instant::now();
        wheel.schedule_absolute(deadline, 1);
        wheel.schedule_absolute(deadline, 2);
        assert_eq!(wheel.take_expired(deadline), vec![1, 2]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut wheel: TimerWheel<i32> = TimerWheel::new();
        let deadline = Instant::now();
        let id = wheel.schedule_absolute(deadline, 1);
        assert!(wheel.cancel(id));
        assert!(!wheel.cancel(id)); // already gone, not an error
        assert!(wheel.take_expired(deadline).is_empty());
    }

    #[test]
    fn next_deadline_ignores_cancelled_entries() {
        let mut wheel: TimerWheel<()> = TimerWheel::new();
        let now = Instant::now();
        let id = wheel.schedule_absolute(now + Duration::from_secs(5), ());
        assert!(wheel.next_deadline().is_some());
        wheel.cancel(id);
        assert!(wheel.next_deadline().is_none());
    }

    #[test]
    fn only_due_timers_are_taken() {
        let mut wheel: TimerWheel<i32> = TimerWheel::new();
        let now = Instant::now();
        wheel.schedule_absolute(now + Duration::from_secs(60), 1);
        assert!(wheel.take_expired(now).is_empty());
        assert!(!wheel.is_empty());
    }
}
