//! A monotonic timer queue, integrated into each peer's single event loop.
//!
//! Replaces cooperative "wait then run" coroutines: schedule an event with a
//! delay, then drain due events at the top of every tick.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug)]
struct Scheduled<E> {
    due: f32,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Scheduled<E>) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Scheduled<E>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // reversed: BinaryHeap is a max-heap, we pop the earliest deadline
    fn cmp(&self, other: &Scheduled<E>) -> Ordering {
        other
            .due
            .total_cmp(&self.due)
            .then(other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
pub struct TimerQueue<E> {
    heap: BinaryHeap<Scheduled<E>>,
    seq: u64,
}

impl<E> TimerQueue<E> {
    pub fn new() -> TimerQueue<E> {
        TimerQueue {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Schedules `event` to fire `delay` seconds after `now`.
    pub fn schedule(&mut self, now: f32, delay: f32, event: E) {
        self.seq += 1;
        self.heap.push(Scheduled {
            due: now + delay.max(0.0),
            seq: self.seq,
            event,
        });
    }

    /// Pops every event whose deadline has passed, in deadline order.
    pub fn pop_due(&mut self, now: f32) -> Vec<E> {
        let mut due = Vec::new();
        while let Some(head) = self.heap.peek() {
            if head.due > now {
                break;
            }
            due.push(self.heap.pop().map(|s| s.event).unwrap());
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl<E> Default for TimerQueue<E> {
    fn default() -> TimerQueue<E> {
        TimerQueue::new()
    }
}
