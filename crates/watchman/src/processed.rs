use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use crate::deadline::DeadlineQueue;

/// Paths the watcher just wrote or handled, ignored until their mark expires.
#[derive(Debug)]
pub struct ProcessedMarks {
    marks: HashMap<PathBuf, Instant>,
    timers: DeadlineQueue<PathBuf>,
    ttl: Duration,
}

impl ProcessedMarks {
    pub fn new(ttl: Duration) -> Self {
        Self {
            marks: HashMap::new(),
            timers: DeadlineQueue::new(),
            ttl,
        }
    }

    /// Marks `path`, replacing any earlier expiry.
    pub fn mark(&mut self, path: PathBuf, now: Instant) {
        let at = now + self.ttl;
        self.marks.insert(path.clone(), at);
        self.timers.schedule(path, at);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.marks.contains_key(path)
    }

    pub fn expire_due(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        for (path, at) in self.timers.pop_due(now) {
            if self.marks.get(&path) == Some(&at) {
                self.marks.remove(&path);
                removed += 1;
            }
        }
        removed
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
