//! Coalescing state for recently added files.
//!
//! A path is `pending` while it has an entry, `processing` while an attempt
//! for it is in flight, and disappears when its expiry fires, when the
//! attempt completes, or when the set is cleared after a burst or overflow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::deadline::DeadlineQueue;
use crate::types::FileEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub event: FileEvent,
    /// `None` while held inside the burst window.
    pub expires_at: Option<Instant>,
    cancel: CancellationToken,
}

impl PendingEntry {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token shared with the processing attempt for this path.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[derive(Debug)]
pub struct PendingEventSet {
    entries: HashMap<PathBuf, PendingEntry>,
    in_flight: HashMap<PathBuf, CancellationToken>,
    expiry: Duration,
    timers: DeadlineQueue<PathBuf>,
}

impl PendingEventSet {
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            in_flight: HashMap::new(),
            expiry,
            timers: DeadlineQueue::new(),
        }
    }

    /// Inserts or refreshes `event`. `hold` keeps a new entry without expiry.
    pub fn admit(&mut self, event: FileEvent, now: Instant, hold: bool) -> Admission {
        let path = event.path.clone();

        if let Some(entry) = self.entries.get_mut(&path) {
            if !entry.is_cancelled() {
                if entry.expires_at.is_some() {
                    let at = now + self.expiry;
                    entry.expires_at = Some(at);
                    self.timers.schedule(path, at);
                }
                return Admission::Duplicate;
            }
        } else if self.in_flight.contains_key(&path) {
            return Admission::Duplicate;
        }

        // New path, or a cancelled one seen again: start over with a fresh token.
        let expires_at = if hold { None } else { Some(now + self.expiry) };
        if let Some(at) = expires_at {
            self.timers.schedule(path.clone(), at);
        }
        self.entries.insert(
            path,
            PendingEntry {
                event,
                expires_at,
                cancel: CancellationToken::new(),
            },
        );
        Admission::Admitted
    }

    /// Moves a pending path into processing and hands out its token.
    pub fn begin_processing(&mut self, path: &Path) -> Option<CancellationToken> {
        let entry = self.entries.get(path)?;
        if entry.is_cancelled() {
            return None;
        }
        let token = entry.token();
        self.in_flight.insert(path.to_path_buf(), token.clone());
        Some(token)
    }

    /// Explicit removal once an attempt is done.
    pub fn complete(&mut self, path: &Path) {
        self.in_flight.remove(path);
        self.entries.remove(path);
    }

    /// Cancels the pending entry for `path`, or the in-flight attempt when
    /// the entry has already expired.
    pub fn cancel(&mut self, path: &Path) -> bool {
        let token = match self.entries.get(path) {
            Some(entry) => &entry.cancel,
            None => match self.in_flight.get(path) {
                Some(token) => token,
                None => return false,
            },
        };
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        true
    }

    /// Drops the entry for `path`, leaving any in-flight token alone.
    pub fn forget(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    /// Marks each path cancelled and returns the ones that were not already.
    pub fn cancel_batch<I>(&mut self, paths: I) -> Vec<PathBuf>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        paths.into_iter().filter(|path| self.cancel(path)).collect()
    }

    pub fn is_cancelled(&self, path: &Path) -> bool {
        self.entries.get(path).is_some_and(|e| e.is_cancelled())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn is_processing(&self, path: &Path) -> bool {
        self.in_flight.contains_key(path)
    }

    pub fn processing_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.keys().cloned().collect()
    }

    /// Entry count including cancelled ones, which is what batch limits compare against.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops entries whose expiry has passed. Cancelled entries are left for
    /// the overflow cooldown to clear.
    pub fn expire_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut expired = Vec::new();
        for (path, at) in self.timers.pop_due(now) {
            let live = self
                .entries
                .get(&path)
                .is_some_and(|e| e.expires_at == Some(at) && !e.is_cancelled());
            if live {
                self.entries.remove(&path);
                expired.push(path);
            }
        }
        expired
    }

    /// Ends a burst window: held entries that are not cancelled start
    /// processing and get a regular expiry, cancelled ones are forgotten.
    pub fn release_held(&mut self, now: Instant) -> Vec<(PathBuf, CancellationToken)> {
        self.entries.retain(|_, entry| !entry.is_cancelled());

        let mut released = Vec::new();
        for (path, entry) in self.entries.iter_mut() {
            if entry.expires_at.is_some() {
                continue;
            }
            let at = now + self.expiry;
            entry.expires_at = Some(at);
            self.timers.schedule(path.clone(), at);
            self.in_flight.insert(path.clone(), entry.token());
            released.push((path.clone(), entry.token()));
        }
        released
    }

    /// Forgets every pending and cancelled entry. In-flight attempts keep
    /// their tokens.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.timers.clear();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }
}
