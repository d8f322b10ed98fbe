use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tokio::time::Instant;

/// Min-heap of (deadline, key) pairs polled by the coordinator loop.
///
/// Rescheduling a key pushes a new pair without removing the old one; owners
/// compare popped deadlines against their own record and drop stale pairs.
#[derive(Debug)]
pub struct DeadlineQueue<K: Ord> {
    heap: BinaryHeap<Reverse<(Instant, K)>>,
}

impl<K: Ord> Default for DeadlineQueue<K> {
    fn default() -> Self {
        Self { heap: BinaryHeap::new() }
    }
}

impl<K: Ord> DeadlineQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, key: K, at: Instant) {
        self.heap.push(Reverse((at, key)));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Removes and returns every pair due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(K, Instant)> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|Reverse((at, _))| *at <= now) {
            if let Some(Reverse((at, key))) = self.heap.pop() {
                due.push((key, at));
            }
        }
        due
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
