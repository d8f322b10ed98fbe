use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use optiwatch_core::FileType;
use optiwatch_core::config::WatchRequest;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::{BurstVerdict, CircuitBreaker};
use crate::coordinator::Msg;
use crate::error::WatchError;
use crate::matcher::PathMatcher;
use crate::pending::{Admission, PendingEventSet};
use crate::processed::ProcessedMarks;
use crate::timings::WatchTimings;
use crate::types::{FileEvent, FileHooks};

/// What the coordinator has to do after an event was fed to a watcher.
#[derive(Debug)]
pub enum EventOutcome {
    Ignored,
    Duplicate,
    /// Held inside the burst window until the flush.
    Held,
    Process { path: PathBuf, token: CancellationToken },
    /// The batch ceiling was exceeded; `cancelled` lists newly cancelled paths.
    Overflow { cancelled: Vec<PathBuf>, folder: PathBuf },
    /// The burst breaker tripped and the watcher disabled itself.
    Tripped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherStatus {
    pub file_type: FileType,
    pub watching: bool,
    pub enabled: bool,
    pub paused: bool,
    pub tripped: bool,
    pub pending: usize,
    pub processing: usize,
    /// Paths currently ignored because the watcher handled or wrote them.
    pub marked: usize,
}

/// Matcher and type predicate, shared with the notify callback thread.
#[derive(Clone)]
struct EventFilter {
    matcher: PathMatcher,
    hooks: Arc<dyn FileHooks>,
}

impl EventFilter {
    fn accepts(&self, event: &FileEvent) -> bool {
        self.matcher.matches(event) && self.hooks.should_handle(event)
    }
}

/// One watched file type: its subscription plus all coalescing state.
/// Owned and driven by the coordinator loop.
pub struct DirectoryWatcher {
    file_type: FileType,
    request: WatchRequest,
    hooks: Arc<dyn FileHooks>,
    timings: WatchTimings,
    pending: PendingEventSet,
    breaker: CircuitBreaker,
    processed: ProcessedMarks,
    cooldown_at: Option<Instant>,
    subscription: Option<RecommendedWatcher>,
    generation: u64,
    paused: bool,
}

impl DirectoryWatcher {
    pub fn new(
        request: WatchRequest,
        hooks: Arc<dyn FileHooks>,
        timings: WatchTimings,
        started_at: Instant,
        first_run: bool,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            started_at,
            first_run,
            timings.burst_window,
            timings.burst_threshold,
            timings.burst_flush_delay,
        );
        Self {
            file_type: request.file_type,
            pending: PendingEventSet::new(timings.pending_expiry),
            processed: ProcessedMarks::new(timings.processed_ttl),
            request,
            hooks,
            timings,
            breaker,
            cooldown_at: None,
            subscription: None,
            generation: 0,
            paused: false,
        }
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn request(&self) -> &WatchRequest {
        &self.request
    }

    pub fn hooks(&self) -> &Arc<dyn FileHooks> {
        &self.hooks
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_watching(&self) -> bool {
        self.subscription.is_some()
    }

    fn filter(&self) -> EventFilter {
        EventFilter {
            matcher: PathMatcher::new(self.request.roots.iter().cloned(), self.file_type.ignore_file_name()),
            hooks: self.hooks.clone(),
        }
    }

    /// Matcher AND type predicate, as applied on the notify thread.
    pub fn accepts(&self, event: &FileEvent) -> bool {
        self.filter().accepts(event)
    }

    /// (Re)subscribes to every root. Always drops the previous subscription first.
    pub(crate) fn start(&mut self, tx: &mpsc::Sender<Msg>) -> Result<(), WatchError> {
        self.stop();

        if !self.request.enabled || self.paused {
            debug!("👀 Watchman: {} watcher is off", self.file_type);
            return Ok(());
        }
        if self.request.roots.is_empty() {
            debug!("👀 Watchman: No {} folders configured", self.file_type);
            return Ok(());
        }

        self.generation += 1;
        let generation = self.generation;
        let file_type = self.file_type;
        let filter = self.filter();
        let tx = tx.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for file_event in FileEvent::from_notify(&event) {
                    if !filter.accepts(&file_event) {
                        continue;
                    }
                    let msg = Msg::Event {
                        file_type,
                        generation,
                        event: file_event,
                    };
                    if tx.blocking_send(msg).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("👀 Watchman: Watch error: {}", e),
        })?;

        let mut watched = 0;
        let mut last_error = None;
        for root in &self.request.roots {
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => watched += 1,
                Err(e) => {
                    warn!("👀 Watchman: Can't watch {:?}: {}", root, e);
                    last_error = Some((root.clone(), e));
                }
            }
        }
        if watched == 0 {
            if let Some((path, source)) = last_error {
                return Err(WatchError::Watch { path, source });
            }
        }

        info!(
            "👀 Watchman: Watching {} folder(s) for new {}s",
            watched, self.file_type
        );
        self.subscription = Some(watcher);
        Ok(())
    }

    /// Releases the subscription. Safe when not watching.
    pub fn stop(&mut self) {
        if self.subscription.take().is_some() {
            info!("👀 Watchman: Stopped watching {}s", self.file_type);
        }
    }

    /// Replaces the request and restarts only when roots or the enabled flag changed.
    pub(crate) fn apply_config(&mut self, request: WatchRequest, tx: &mpsc::Sender<Msg>) -> Result<(), WatchError> {
        if request == self.request {
            return Ok(());
        }

        let restart = request.roots != self.request.roots || request.enabled != self.request.enabled;
        if request.enabled && !self.request.enabled {
            info!("👀 Watchman: {} watcher re-enabled", self.file_type);
            self.breaker.reset();
        }
        self.request = request;

        if !restart {
            return Ok(());
        }
        if self.request.enabled {
            self.start(tx)
        } else {
            self.stop();
            self.pending.clear();
            self.cooldown_at = None;
            Ok(())
        }
    }

    /// Global pause keeps the request so watching can resume without a reload.
    pub(crate) fn set_paused(&mut self, paused: bool, tx: &mpsc::Sender<Msg>) -> Result<(), WatchError> {
        if paused == self.paused {
            return Ok(());
        }
        self.paused = paused;
        if paused {
            self.stop();
            Ok(())
        } else {
            self.start(tx)
        }
    }

    pub fn on_event(&mut self, event: FileEvent, now: Instant) -> EventOutcome {
        if !self.request.enabled || self.paused {
            return EventOutcome::Ignored;
        }
        if self.processed.contains(&event.path) {
            debug!("👀 Watchman: {:?} was just processed", event.path);
            return EventOutcome::Ignored;
        }

        if self.cooldown_at.is_some() && self.pending.is_cancelled(&event.path) {
            return EventOutcome::Duplicate;
        }

        let path = event.path.clone();
        let hold = self.breaker.within_window(now);
        if self.pending.admit(event, now, hold) == Admission::Duplicate {
            return EventOutcome::Duplicate;
        }

        if hold {
            match self.breaker.record(now) {
                BurstVerdict::Trip => {
                    self.request.enabled = false;
                    self.stop();
                    self.pending.clear();
                    self.cooldown_at = None;
                    return EventOutcome::Tripped;
                }
                BurstVerdict::Hold => return EventOutcome::Held,
                BurstVerdict::Outside => {}
            }
        }

        if self.pending.len() > self.request.max_batch_size {
            let cancelled = self.pending.cancel_batch(self.pending.paths());
            self.cooldown_at = Some(now + self.timings.batch_cooldown);
            let folder = optiwatch_core::path_utils::nearest_root(&self.request.roots, &path)
                .map(Path::to_path_buf)
                .or_else(|| path.parent().map(Path::to_path_buf))
                .unwrap_or_default();
            return EventOutcome::Overflow { cancelled, folder };
        }

        match self.pending.begin_processing(&path) {
            Some(token) => EventOutcome::Process { path, token },
            None => EventOutcome::Ignored,
        }
    }

    /// Fires every due timer. Returns paths released by a burst flush.
    pub fn on_timers(&mut self, now: Instant) -> Vec<(PathBuf, CancellationToken)> {
        self.pending.expire_due(now);
        self.processed.expire_due(now);

        if self.cooldown_at.is_some_and(|at| at <= now) {
            debug!("👀 Watchman: {} batch cooldown over", self.file_type);
            self.cooldown_at = None;
            self.pending.clear();
        }

        if self.breaker.flush_due(now) {
            let released = self.pending.release_held(now);
            info!(
                "👀 Watchman: Releasing {} held {}(s) after startup",
                released.len(),
                self.file_type
            );
            return released;
        }
        Vec::new()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.pending.next_deadline(),
            self.processed.next_deadline(),
            self.breaker.next_deadline(),
            self.cooldown_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Marks paths the pipeline is about to write so their events are ignored.
    pub fn mark_processed(&mut self, paths: Vec<PathBuf>, now: Instant) {
        for path in paths {
            self.processed.mark(path, now);
        }
    }

    pub fn finish(&mut self, original: &Path, final_path: &Path, now: Instant) {
        self.processed.mark(original.to_path_buf(), now);
        if final_path != original {
            self.processed.mark(final_path.to_path_buf(), now);
        }
        self.pending.complete(original);
    }

    /// Cancels a pending or in-flight path on a stop request. The entry is
    /// dropped so a later event for the path starts over.
    pub fn cancel_path(&mut self, path: &Path) -> bool {
        let cancelled = self.pending.cancel(path);
        self.pending.forget(path);
        cancelled
    }

    pub fn status(&self) -> WatcherStatus {
        WatcherStatus {
            file_type: self.file_type,
            watching: self.is_watching(),
            enabled: self.request.enabled,
            paused: self.paused,
            tripped: self.breaker.is_tripped(),
            pending: self.pending.len(),
            processing: self.pending.processing_count(),
            marked: self.processed.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    struct AcceptAll;

    #[async_trait]
    impl FileHooks for AcceptAll {
        fn should_handle(&self, _event: &FileEvent) -> bool {
            true
        }
        fn cancel(&self, _path: &Path) {}
        async fn handle(&self, _path: PathBuf) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn watcher(max: usize, first_run: bool, start: Instant) -> DirectoryWatcher {
        let mut request = WatchRequest::new(FileType::Image);
        request.roots.insert(PathBuf::from("/w"));
        request.max_batch_size = max;
        DirectoryWatcher::new(request, Arc::new(AcceptAll), WatchTimings::default(), start, first_run)
    }

    fn file(i: usize) -> FileEvent {
        FileEvent::created(format!("/w/{}.png", i))
    }

    #[test]
    fn test_overflow_cancels_whole_batch_then_cools_down() {
        let start = Instant::now();
        let mut w = watcher(2, false, start);

        assert!(matches!(w.on_event(file(1), start), EventOutcome::Process { .. }));
        assert!(matches!(w.on_event(file(2), start), EventOutcome::Process { .. }));
        match w.on_event(file(3), start) {
            EventOutcome::Overflow { cancelled, folder } => {
                assert_eq!(cancelled.len(), 3);
                assert_eq!(folder, PathBuf::from("/w"));
            }
            other => panic!("unexpected {:?}", other),
        }
        // Late events for a cancelled file stay cancelled during the cooldown
        assert!(matches!(w.on_event(file(1), start), EventOutcome::Duplicate));

        w.on_timers(start + Duration::from_millis(1000));
        assert_eq!(w.status().pending, 0);
        assert!(w.status().enabled);
    }

    #[test]
    fn test_trip_disables_until_reenabled() {
        let start = Instant::now();
        let mut w = watcher(20, true, start);
        for i in 0..5 {
            assert!(matches!(w.on_event(file(i), start), EventOutcome::Held));
        }
        assert!(matches!(w.on_event(file(5), start), EventOutcome::Tripped));
        assert!(matches!(w.on_event(file(6), start), EventOutcome::Ignored));

        let status = w.status();
        assert!(!status.enabled && status.tripped);
        assert_eq!(status.pending, 0);
    }

    #[test]
    fn test_burst_flush_releases_held_files() {
        let start = Instant::now();
        let mut w = watcher(20, true, start);
        w.on_event(file(1), start);
        w.on_event(file(2), start);
        w.on_event(file(1), start);

        assert!(w.on_timers(start + Duration::from_millis(2000)).is_empty());
        let released = w.on_timers(start + Duration::from_millis(3000));
        assert_eq!(released.len(), 2);
        assert_eq!(w.status().processing, 2);
    }

    #[test]
    fn test_processed_paths_are_ignored() {
        let start = Instant::now();
        let mut w = watcher(20, false, start);
        w.mark_processed(vec![PathBuf::from("/w/1.png")], start);
        assert!(matches!(w.on_event(file(1), start), EventOutcome::Ignored));

        w.on_timers(start + Duration::from_secs(3));
        assert!(matches!(w.on_event(file(1), start + Duration::from_secs(3)), EventOutcome::Process { .. }));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_is_safe() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = WatchRequest::new(FileType::Image);
        request.roots.insert(dir.path().to_path_buf());
        let mut w = DirectoryWatcher::new(request, Arc::new(AcceptAll), WatchTimings::default(), Instant::now(), false);
        let (tx, mut rx) = mpsc::channel(64);

        w.stop();
        assert!(!w.is_watching());

        w.start(&tx).unwrap();
        w.start(&tx).unwrap();
        assert!(w.is_watching());
        assert_eq!(w.generation(), 2);

        let path = dir.path().join("a.png");
        std::fs::write(&path, b"png").unwrap();
        let msg = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        match msg {
            Msg::Event { generation, event, .. } => {
                assert_eq!(generation, 2);
                assert_eq!(event.path, path);
            }
            _ => panic!("expected a file event"),
        }

        w.stop();
        w.stop();
        assert!(!w.is_watching());
    }
}
