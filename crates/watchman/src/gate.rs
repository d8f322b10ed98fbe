use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::notice::Notifier;

/// External capacity check consulted right before a settled file is handed
/// to its optimiser. `count` is how many files this session already handled.
pub trait AdmissionGate: Send + Sync {
    fn try_admit(&self, count: usize, limit: Option<usize>) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl AdmissionGate for Unlimited {
    fn try_admit(&self, _count: usize, _limit: Option<usize>) -> bool {
        true
    }
}

/// Admits files while the session count is below the limit. Denials are
/// reported through the notifier once, not through the watcher's log.
pub struct SessionLimit {
    notifier: Arc<dyn Notifier>,
    notified: AtomicBool,
}

impl SessionLimit {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            notified: AtomicBool::new(false),
        }
    }
}

impl AdmissionGate for SessionLimit {
    fn try_admit(&self, count: usize, limit: Option<usize>) -> bool {
        let Some(limit) = limit else {
            return true;
        };
        if count < limit {
            return true;
        }

        debug!("Session limit of {} reached", limit);
        if !self.notified.swap(true, Ordering::SeqCst) {
            self.notifier.notice(&format!(
                "Automatic optimisation paused: {} files handled this session. Restart to continue.",
                limit
            ));
        }
        false
    }
}
