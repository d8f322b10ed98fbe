//! Registry of optimisations started by the watcher or the control channel.
//!
//! Records are keyed by id (the file path for watcher-started work, the
//! caller's id for control requests). Records that are no longer running
//! are kept for a retention period so their outcome can be queried, then
//! evicted by the coordinator's sweep.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum OptimisationStatus {
    Running,
    Finished(Option<String>),
    Failed(String),
    Stopped,
}

#[derive(Debug, Clone)]
pub struct OptimisationRecord {
    pub id: String,
    pub source: String,
    pub started_at: DateTime<Local>,
    pub status: OptimisationStatus,
    cancel: CancellationToken,
    ended_at: Option<Instant>,
}

impl OptimisationRecord {
    pub fn is_running(&self) -> bool {
        self.status == OptimisationStatus::Running
    }

    fn end(&mut self, status: OptimisationStatus) {
        self.status = status;
        self.ended_at = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Default)]
pub struct Optimisations {
    records: Arc<Mutex<HashMap<String, OptimisationRecord>>>,
}

impl Optimisations {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OptimisationRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts tracking `id`. Returns `None` when the same id is already running.
    pub fn register(&self, id: &str, source: &str) -> Option<CancellationToken> {
        let mut records = self.lock();
        if records.get(id).is_some_and(|r| r.is_running()) {
            debug!("Optimisation {} is already running", id);
            return None;
        }

        let cancel = CancellationToken::new();
        records.insert(
            id.to_string(),
            OptimisationRecord {
                id: id.to_string(),
                source: source.to_string(),
                started_at: Local::now(),
                status: OptimisationStatus::Running,
                cancel: cancel.clone(),
                ended_at: None,
            },
        );
        Some(cancel)
    }

    /// Records the outcome of a running optimisation. Stopped records keep
    /// their status.
    pub fn finish(&self, id: &str, result: Result<Option<String>, String>) {
        let mut records = self.lock();
        let Some(record) = records.get_mut(id) else {
            return;
        };
        if !record.is_running() {
            return;
        }
        record.end(match result {
            Ok(output) => OptimisationStatus::Finished(output),
            Err(e) => OptimisationStatus::Failed(e),
        });
    }

    /// Signals the optimisation to stop. Unknown ids are a no-op.
    pub fn stop(&self, id: &str, remove: bool) -> bool {
        let mut records = self.lock();
        let Some(record) = records.get_mut(id) else {
            debug!("Stop requested for unknown optimisation {}", id);
            return false;
        };

        record.cancel.cancel();
        if record.is_running() {
            record.end(OptimisationStatus::Stopped);
        }
        if remove {
            records.remove(id);
        }
        info!("🛑 Stopped optimisation {} (remove: {})", id, remove);
        true
    }

    /// Stops every record, running or retained, without removing any.
    pub fn stop_all(&self) -> usize {
        let mut records = self.lock();
        for record in records.values_mut() {
            record.cancel.cancel();
            if record.is_running() {
                record.end(OptimisationStatus::Stopped);
            }
        }
        records.len()
    }

    pub fn status(&self, id: &str) -> Option<OptimisationStatus> {
        self.lock().get(id).map(|r| r.status.clone())
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.lock().get(id).is_some_and(|r| r.is_running())
    }

    /// Drops records that ended at least `retention` before `now`.
    /// Running records are never evicted.
    pub fn evict_ended(&self, now: Instant, retention: Duration) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, r| r.ended_at.is_none_or(|at| now.saturating_duration_since(at) < retention));
        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_duplicate_running_id() {
        let opts = Optimisations::new();
        assert!(opts.register("a", "cli").is_some());
        assert!(opts.register("a", "cli").is_none());

        opts.finish("a", Ok(None));
        assert!(opts.register("a", "cli").is_some());
    }

    #[test]
    fn test_stop_unknown_id_is_noop() {
        let opts = Optimisations::new();
        opts.register("known", "cli");
        assert!(!opts.stop("missing", true));
        assert!(opts.is_running("known"));
    }

    #[test]
    fn test_stop_with_remove_forgets_record() {
        let opts = Optimisations::new();
        let token = opts.register("job", "file_watcher").unwrap();

        assert!(opts.stop("job", true));
        assert!(token.is_cancelled());
        assert_eq!(opts.status("job"), None);
    }

    #[test]
    fn test_stop_keeps_record_as_stopped() {
        let opts = Optimisations::new();
        let token = opts.register("job", "cli").unwrap();

        opts.stop("job", false);
        opts.finish("job", Ok(Some("/tmp/out.png".into())));

        assert!(token.is_cancelled());
        assert_eq!(opts.status("job"), Some(OptimisationStatus::Stopped));
    }

    #[test]
    fn test_stop_all_cancels_everything() {
        let opts = Optimisations::new();
        let a = opts.register("a", "cli").unwrap();
        let b = opts.register("b", "cli").unwrap();
        opts.finish("b", Err("boom".into()));

        assert_eq!(opts.stop_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(opts.status("b"), Some(OptimisationStatus::Failed("boom".into())));
        assert!(!opts.is_running("a"));
    }

    #[test]
    fn test_ended_records_are_evicted_after_retention() {
        let opts = Optimisations::new();
        for i in 0..1000 {
            let id = format!("file-{}", i);
            opts.register(&id, "file_watcher").unwrap();
            opts.finish(&id, Ok(None));
        }
        opts.register("failed", "cli").unwrap();
        opts.finish("failed", Err("boom".into()));
        opts.register("stopped", "cli").unwrap();
        opts.stop("stopped", false);
        opts.register("running", "cli").unwrap();

        let retention = Duration::from_secs(30);
        assert_eq!(opts.evict_ended(Instant::now(), retention), 0);
        assert!(opts.status("file-0").is_some());

        let later = Instant::now() + retention;
        assert_eq!(opts.evict_ended(later, retention), 1002);
        assert_eq!(opts.status("file-999"), None);
        assert_eq!(opts.status("failed"), None);
        assert_eq!(opts.status("stopped"), None);
        assert!(opts.is_running("running"));
    }
}
