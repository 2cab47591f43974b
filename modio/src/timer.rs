//! Monotonic deadline queue.
//!
//! Replaces one timer file descriptor per deadline with a single queue whose
//! earliest entry bounds the event loop's poll timeout. Cancellation and
//! rearming are by timer identity: the heap keeps stale entries around and
//! the live map decides which of them still count, so removal never has to
//! search the heap.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

/// Identity of one armed deadline.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub(crate) struct TimerId(u64);

pub(crate) struct TimerQueue {
    next_id: u64,
    live: HashMap<TimerId, Instant>,
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            live: HashMap::new(),
            heap: BinaryHeap::new(),
        }
    }

    /// Arms a fresh timer.
    pub fn arm(&mut self, deadline: Instant) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.live.insert(id, deadline);
        self.heap.push(Reverse((deadline, id)));
        id
    }

    /// Moves an armed timer to a new deadline. Unknown IDs are ignored.
    pub fn rearm(&mut self, id: TimerId, deadline: Instant) {
        if let Some(entry) = self.live.get_mut(&id) {
            *entry = deadline;
            self.heap.push(Reverse((deadline, id)));
        }
    }

    /// Disarms a timer. Returns whether it was still armed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Earliest armed deadline, for sizing a poll timeout.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.live.get(&id) == Some(&deadline) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops one timer that has expired by `now`, disarming it.
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerId> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.live.get(&id) != Some(&deadline) {
                self.heap.pop();
                continue;
            }
            if deadline > now {
                return None;
            }
            self.heap.pop();
            self.live.remove(&id);
            return Some(id);
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Disarms everything.
    pub fn clear(&mut self) {
        self.live.clear();
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expires_in_deadline_order() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        let late = q.arm(t0 + Duration::from_millis(300));
        let early = q.arm(t0 + Duration::from_millis(100));

        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(100)));
        assert_eq!(q.pop_expired(t0), None);
        assert_eq!(q.pop_expired(t0 + Duration::from_millis(150)), Some(early));
        assert_eq!(q.pop_expired(t0 + Duration::from_millis(150)), None);
        assert_eq!(q.pop_expired(t0 + Duration::from_millis(400)), Some(late));
        assert!(q.is_empty());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.arm(t0 + Duration::from_millis(10));
        assert!(q.cancel(id));
        assert!(!q.cancel(id));
        assert_eq!(q.pop_expired(t0 + Duration::from_secs(1)), None);
        assert_eq!(q.next_deadline(), None);
    }

    #[test]
    fn rearm_supersedes_old_deadline() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.arm(t0 + Duration::from_millis(10));
        q.rearm(id, t0 + Duration::from_millis(500));

        // The old entry is stale, the new one rules.
        assert_eq!(q.pop_expired(t0 + Duration::from_millis(100)), None);
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(500)));
        assert_eq!(q.pop_expired(t0 + Duration::from_millis(600)), Some(id));
        assert_eq!(q.pop_expired(t0 + Duration::from_millis(600)), None);
    }

    #[test]
    fn ids_are_never_reused() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        let a = q.arm(t0);
        q.cancel(a);
        let b = q.arm(t0);
        assert_ne!(a, b);
    }
}
