//! The main coordination loop.
//!
//! Every watcher, every timer and every shared set lives here. Notify
//! callbacks, processing tasks and the control channel talk to it through
//! messages, so all mutations happen on one task.

use optiwatch_core::FileType;
use optiwatch_core::config::{AppConfig, WatchRequest};
use optiwatch_core::settings::SettingsStore;
use optiwatch_core::state::AppState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WatchError;
use crate::gate::{AdmissionGate, Unlimited};
use crate::notice::Notifier;
use crate::processing::Attempt;
use crate::timings::WatchTimings;
use crate::types::{FileEvent, FileHooks};
use crate::watcher::{DirectoryWatcher, EventOutcome, WatcherStatus};

const CHANNEL_CAPACITY: usize = 1024;

pub(crate) enum Msg {
    Event {
        file_type: FileType,
        generation: u64,
        event: FileEvent,
    },
    /// Test entry point that skips the OS subscription but not the filter.
    #[cfg(test)]
    Inject { file_type: FileType, event: FileEvent },
    AddWatcher {
        request: WatchRequest,
        hooks: Arc<dyn FileHooks>,
    },
    Reconfigure(Box<AppConfig>),
    SetPaused { paused: bool, persist: bool },
    SkipNextEvent,
    MarkProcessed {
        file_type: FileType,
        paths: Vec<PathBuf>,
        ack: oneshot::Sender<()>,
    },
    Admit { reply: oneshot::Sender<bool> },
    Finished {
        file_type: FileType,
        original: PathBuf,
        final_path: PathBuf,
    },
    Stop { ids: Vec<String>, remove: bool },
    Status { reply: oneshot::Sender<Vec<WatcherStatus>> },
    Shutdown { ack: oneshot::Sender<()> },
}

pub struct Coordinator {
    state: AppState,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    gate: Box<dyn AdmissionGate>,
    session_limit: Option<usize>,
    timings: WatchTimings,
    started_at: Instant,
    sweep_at: Instant,
    watchers: Vec<DirectoryWatcher>,
    handled: usize,
    tx: mpsc::Sender<Msg>,
    rx: Option<mpsc::Receiver<Msg>>,
}

impl Coordinator {
    pub fn new(state: AppState, settings: Arc<dyn SettingsStore>, notifier: Arc<dyn Notifier>) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let timings = WatchTimings::default();
        let started_at = Instant::now();
        Self {
            session_limit: state.config.session_limit,
            state,
            settings,
            notifier,
            gate: Box::new(Unlimited),
            sweep_at: started_at + timings.record_retention,
            timings,
            started_at,
            watchers: Vec::new(),
            handled: 0,
            tx,
            rx: Some(rx),
        }
    }

    pub fn with_gate(mut self, gate: impl AdmissionGate + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }

    pub fn with_timings(mut self, timings: WatchTimings) -> Self {
        self.sweep_at = self.started_at + timings.record_retention;
        self.timings = timings;
        self
    }

    /// Starts the loop on its own task.
    pub fn spawn(mut self) -> CoordinatorHandle {
        let handle = CoordinatorHandle { tx: self.tx.clone() };
        if let Some(rx) = self.rx.take() {
            tokio::spawn(self.run(rx));
        }
        handle
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Msg>) {
        info!("🧭 Coordinator: Running (first run: {})", self.state.config.is_first_run());

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if !self.handle(msg) {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.on_timers(Instant::now());
                }
            }
        }

        info!("🧭 Coordinator: Stopped");
    }

    fn next_deadline(&self) -> Instant {
        self.watchers
            .iter()
            .filter_map(DirectoryWatcher::next_deadline)
            .fold(self.sweep_at, Instant::min)
    }

    fn watcher_mut(&mut self, file_type: FileType) -> Option<&mut DirectoryWatcher> {
        self.watchers.iter_mut().find(|w| w.file_type() == file_type)
    }

    /// Returns false once the loop should end.
    fn handle(&mut self, msg: Msg) -> bool {
        match msg {
            Msg::Event {
                file_type,
                generation,
                event,
            } => {
                let current = self.watchers.iter().any(|w| w.file_type() == file_type && w.generation() == generation);
                if current {
                    self.on_event(file_type, event);
                }
            }
            #[cfg(test)]
            Msg::Inject { file_type, event } => {
                let accepted = self
                    .watchers
                    .iter()
                    .any(|w| w.file_type() == file_type && w.accepts(&event));
                if accepted {
                    self.on_event(file_type, event);
                }
            }
            Msg::AddWatcher { request, hooks } => self.add_watcher(request, hooks),
            Msg::Reconfigure(config) => self.reconfigure(*config),
            Msg::SetPaused { paused, persist } => self.set_paused(paused, persist),
            Msg::SkipNextEvent => {
                info!("🧭 Coordinator: Skipping the next new file");
                self.state.set_skip_next_event(true);
            }
            Msg::MarkProcessed { file_type, paths, ack } => {
                if let Some(watcher) = self.watcher_mut(file_type) {
                    watcher.mark_processed(paths, Instant::now());
                }
                let _ = ack.send(());
            }
            Msg::Admit { reply } => {
                let allowed = self.gate.try_admit(self.handled, self.session_limit);
                if allowed {
                    self.handled += 1;
                }
                let _ = reply.send(allowed);
            }
            Msg::Finished {
                file_type,
                original,
                final_path,
            } => {
                if let Some(watcher) = self.watcher_mut(file_type) {
                    watcher.finish(&original, &final_path, Instant::now());
                }
            }
            Msg::Stop { ids, remove } => self.stop(ids, remove),
            Msg::Status { reply } => {
                let _ = reply.send(self.watchers.iter().map(DirectoryWatcher::status).collect());
            }
            Msg::Shutdown { ack } => {
                self.shutdown();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn add_watcher(&mut self, request: WatchRequest, hooks: Arc<dyn FileHooks>) {
        let file_type = request.file_type;
        if self.watcher_mut(file_type).is_some() {
            warn!("🧭 Coordinator: {} watcher already registered", file_type);
            return;
        }

        let mut watcher = DirectoryWatcher::new(
            request,
            hooks,
            self.timings.clone(),
            self.started_at,
            self.state.config.is_first_run(),
        );
        if let Err(e) = watcher.set_paused(self.state.config.pause_automatic_optimisations, &self.tx) {
            error!("🧭 Coordinator: {}", e);
        }
        if let Err(e) = watcher.start(&self.tx) {
            error!("🧭 Coordinator: Can't start {} watcher: {}", file_type, e);
        }
        self.watchers.push(watcher);
    }

    fn reconfigure(&mut self, config: AppConfig) {
        debug!("🧭 Coordinator: Applying configuration");
        self.session_limit = config.session_limit;

        for watcher in self.watchers.iter_mut() {
            let request = config.watch_request(watcher.file_type());
            if let Err(e) = watcher.apply_config(request, &self.tx) {
                error!("🧭 Coordinator: Can't restart {} watcher: {}", watcher.file_type(), e);
            }
        }
        self.set_paused(config.pause_automatic_optimisations, false);
        self.state.config = config;
    }

    fn set_paused(&mut self, paused: bool, persist: bool) {
        for watcher in self.watchers.iter_mut() {
            if let Err(e) = watcher.set_paused(paused, &self.tx) {
                error!("🧭 Coordinator: Can't resume {} watcher: {}", watcher.file_type(), e);
            }
        }
        self.state.config.pause_automatic_optimisations = paused;

        if persist {
            info!(
                "🧭 Coordinator: Automatic optimisations {}",
                if paused { "paused" } else { "resumed" }
            );
            if let Err(e) = self.settings.set_paused(paused) {
                error!("🧭 Coordinator: Can't save pause setting: {}", e);
            }
        }
    }

    fn on_event(&mut self, file_type: FileType, event: FileEvent) {
        let id = event.path.to_string_lossy().into_owned();
        if self.state.optimisations.is_running(&id) {
            debug!("🧭 Coordinator: {:?} is being optimised, ignoring", event.path);
            return;
        }

        let now = Instant::now();
        let Some(watcher) = self.watcher_mut(file_type) else {
            return;
        };
        let max_batch_size = watcher.request().max_batch_size;
        let hooks = watcher.hooks().clone();

        match watcher.on_event(event, now) {
            EventOutcome::Ignored | EventOutcome::Duplicate | EventOutcome::Held => {}
            EventOutcome::Process { path, token } => self.spawn_attempt(file_type, path, token),
            EventOutcome::Overflow { cancelled, folder } => {
                for path in &cancelled {
                    hooks.cancel(path);
                }
                warn!(
                    "🧭 Coordinator: Batch of {}s in {:?} exceeds {}, cancelled {}",
                    file_type,
                    folder,
                    max_batch_size,
                    cancelled.len()
                );
                self.notifier.notice(&format!(
                    "More than {} {}s appeared in `{}`, ignoring them",
                    max_batch_size,
                    file_type,
                    folder.display()
                ));
            }
            EventOutcome::Tripped => self.on_tripped(file_type),
        }
    }

    fn on_tripped(&mut self, file_type: FileType) {
        error!("🧭 Coordinator: Too many {}s right after startup, disabling the watcher", file_type);
        if let Err(e) = self.settings.set_watcher_enabled(file_type, false) {
            error!("🧭 Coordinator: Can't save disabled {} watcher: {}", file_type, e);
        }
        self.notifier.alert(
            "Too many file events",
            &format!(
                "More than {} new {}s appeared right after the first launch, so automatic {} optimisation was turned off. \
                 Check the watched folders, then run `optiwatch enable {}` to turn it back on.",
                self.timings.burst_threshold, file_type, file_type, file_type
            ),
        );
    }

    fn on_timers(&mut self, now: Instant) {
        if self.sweep_at <= now {
            let evicted = self.state.optimisations.evict_ended(now, self.timings.record_retention);
            if evicted > 0 {
                debug!("🧭 Coordinator: Forgot {} ended optimisation(s)", evicted);
            }
            self.sweep_at = now + self.timings.record_retention;
        }

        let mut released = Vec::new();
        for watcher in self.watchers.iter_mut() {
            for (path, token) in watcher.on_timers(now) {
                released.push((watcher.file_type(), path, token));
            }
        }
        for (file_type, path, token) in released {
            self.spawn_attempt(file_type, path, token);
        }
    }

    fn spawn_attempt(&self, file_type: FileType, path: PathBuf, token: CancellationToken) {
        let Some(watcher) = self.watchers.iter().find(|w| w.file_type() == file_type) else {
            return;
        };
        let attempt = Attempt {
            file_type,
            path,
            token,
            hooks: watcher.hooks().clone(),
            name_template: watcher.request().name_template.clone(),
            timings: self.timings.clone(),
            state: self.state.clone(),
            tx: self.tx.clone(),
        };
        tokio::spawn(attempt.run());
    }

    fn stop(&mut self, ids: Vec<String>, remove: bool) {
        for id in ids {
            let mut found = self.state.optimisations.stop(&id, remove);
            for watcher in self.watchers.iter_mut() {
                found |= watcher.cancel_path(Path::new(&id));
            }
            if !found {
                debug!("🧭 Coordinator: Nothing to stop for {}", id);
            }
        }
    }

    fn shutdown(&mut self) {
        for watcher in self.watchers.iter_mut() {
            watcher.stop();
        }
        let stopped = self.state.optimisations.stop_all();
        info!("🧭 Coordinator: Shutting down, stopped {} optimisation(s)", stopped);
    }
}

/// Cloneable entry point for everything outside the coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Msg>,
}

impl CoordinatorHandle {
    async fn send(&self, msg: Msg) -> Result<(), WatchError> {
        self.tx.send(msg).await.map_err(|_| WatchError::Closed)
    }

    pub async fn add_watcher(&self, request: WatchRequest, hooks: Arc<dyn FileHooks>) -> Result<(), WatchError> {
        self.send(Msg::AddWatcher { request, hooks }).await
    }

    pub async fn reconfigure(&self, config: AppConfig) -> Result<(), WatchError> {
        self.send(Msg::Reconfigure(Box::new(config))).await
    }

    /// Global pause from a user request; the flag is written back to settings.
    pub async fn set_paused(&self, paused: bool) -> Result<(), WatchError> {
        self.send(Msg::SetPaused { paused, persist: true }).await
    }

    pub async fn skip_next_event(&self) -> Result<(), WatchError> {
        self.send(Msg::SkipNextEvent).await
    }

    /// Stops registry records and cancels pending watcher paths matching `ids`.
    pub async fn stop(&self, ids: Vec<String>, remove: bool) -> Result<(), WatchError> {
        self.send(Msg::Stop { ids, remove }).await
    }

    pub async fn status(&self) -> Result<Vec<WatcherStatus>, WatchError> {
        let (reply, answer) = oneshot::channel();
        self.send(Msg::Status { reply }).await?;
        answer.await.map_err(|_| WatchError::Closed)
    }

    /// Stops every watcher and optimisation, then ends the loop.
    pub async fn shutdown(&self) -> Result<(), WatchError> {
        let (ack, done) = oneshot::channel();
        self.send(Msg::Shutdown { ack }).await?;
        done.await.map_err(|_| WatchError::Closed)
    }

    #[cfg(test)]
    pub(crate) async fn inject(&self, file_type: FileType, event: FileEvent) {
        let _ = self.tx.send(Msg::Inject { file_type, event }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use optiwatch_core::CoreError;
    use optiwatch_core::config::CONFIG_FILE;
    use optiwatch_core::settings::OverridesFile;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHooks {
        handled: Mutex<Vec<PathBuf>>,
        cancelled: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl FileHooks for RecordingHooks {
        fn should_handle(&self, event: &FileEvent) -> bool {
            FileType::Image.matches_path(&event.path)
        }
        fn cancel(&self, path: &Path) {
            self.cancelled.lock().unwrap().push(path.to_path_buf());
        }
        async fn handle(&self, path: PathBuf) -> anyhow::Result<()> {
            self.handled.lock().unwrap().push(path);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSettings {
        disabled: Mutex<Vec<FileType>>,
        paused: Mutex<Option<bool>>,
    }

    impl SettingsStore for RecordingSettings {
        fn set_watcher_enabled(&self, file_type: FileType, enabled: bool) -> Result<(), CoreError> {
            if !enabled {
                self.disabled.lock().unwrap().push(file_type);
            }
            Ok(())
        }
        fn set_paused(&self, paused: bool) -> Result<(), CoreError> {
            *self.paused.lock().unwrap() = Some(paused);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<String>>);

    impl Notifier for RecordingNotifier {
        fn notice(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
        fn alert(&self, title: &str, _message: &str) {
            self.0.lock().unwrap().push(title.to_string());
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        handle: CoordinatorHandle,
        hooks: Arc<RecordingHooks>,
        settings: Arc<RecordingSettings>,
        notifier: Arc<RecordingNotifier>,
        state: AppState,
    }

    fn timings() -> WatchTimings {
        WatchTimings {
            process_delay: Duration::from_millis(100),
            settle_poll: Duration::from_millis(20),
            pending_expiry: Duration::from_millis(400),
            burst_window: Duration::from_secs(30),
            burst_flush_delay: Duration::from_millis(150),
            burst_threshold: 5,
            batch_cooldown: Duration::from_millis(150),
            processed_ttl: Duration::from_millis(1000),
            record_retention: Duration::from_millis(200),
        }
    }

    /// Counts every admission request and turns them all down.
    struct DenyAll(Arc<AtomicUsize>);

    impl AdmissionGate for DenyAll {
        fn try_admit(&self, _count: usize, _limit: Option<usize>) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    async fn harness(files: usize, max_batch_size: usize, launch_count: u32) -> Harness {
        harness_with(files, max_batch_size, launch_count, Unlimited, None).await
    }

    /// Files are created before the watcher starts so only injected events count.
    async fn harness_with(
        files: usize,
        max_batch_size: usize,
        launch_count: u32,
        gate: impl AdmissionGate + 'static,
        name_template: Option<&str>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..files {
            std::fs::write(dir.path().join(format!("{}.png", i)), b"png").unwrap();
        }

        let mut config = AppConfig::load_from(dir.path()).unwrap();
        config.launch_count = launch_count;
        let state = AppState::new(config);
        let hooks = Arc::new(RecordingHooks::default());
        let settings = Arc::new(RecordingSettings::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let handle = Coordinator::new(state.clone(), settings.clone(), notifier.clone())
            .with_gate(gate)
            .with_timings(timings())
            .spawn();

        let mut request = WatchRequest::new(FileType::Image);
        request.roots.insert(dir.path().to_path_buf());
        request.max_batch_size = max_batch_size;
        request.name_template = name_template.map(str::to_string);
        handle.add_watcher(request, hooks.clone()).await.unwrap();

        Harness {
            dir,
            handle,
            hooks,
            settings,
            notifier,
            state,
        }
    }

    impl Harness {
        fn path(&self, i: usize) -> PathBuf {
            self.dir.path().join(format!("{}.png", i))
        }

        async fn inject(&self, i: usize) {
            self.handle.inject(FileType::Image, FileEvent::created(self.path(i))).await;
        }

        fn handled(&self) -> usize {
            self.hooks.handled.lock().unwrap().len()
        }

        async fn image_status(&self) -> WatcherStatus {
            self.handle.status().await.unwrap().remove(0)
        }
    }

    #[tokio::test]
    async fn test_duplicate_events_handle_once() {
        let h = harness(1, 20, 3).await;
        for _ in 0..5 {
            h.inject(0).await;
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.handled(), 1);

        // The handled file is marked, so an echo right after is dropped
        h.inject(0).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.handled(), 1);
    }

    #[tokio::test]
    async fn test_batch_overflow_cancels_everything() {
        let h = harness(25, 20, 3).await;
        for i in 0..25 {
            h.inject(i).await;
        }

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(h.handled(), 0);
        assert_eq!(h.hooks.cancelled.lock().unwrap().len(), 25);

        let status = h.image_status().await;
        assert_eq!((status.pending, status.processing), (0, 0));
        assert!(status.enabled);
        assert_eq!(h.notifier.0.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_startup_burst_trips_breaker() {
        let h = harness(6, 20, 1).await;
        for i in 0..6 {
            h.inject(i).await;
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = h.image_status().await;
        assert!(status.tripped && !status.enabled && !status.watching);
        assert_eq!(h.handled(), 0);
        assert_eq!(*h.settings.disabled.lock().unwrap(), vec![FileType::Image]);
        assert_eq!(*h.notifier.0.lock().unwrap(), vec!["Too many file events".to_string()]);

        // Terminal until re-enabled
        h.inject(0).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.handled(), 0);
    }

    #[tokio::test]
    async fn test_held_files_are_flushed_after_burst_window() {
        let h = harness(3, 20, 1).await;
        for i in 0..3 {
            h.inject(i).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.handled(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(h.handled(), 3);
        assert!(!h.image_status().await.tripped);
    }

    #[tokio::test]
    async fn test_stop_before_handler_prevents_it() {
        let h = harness(2, 20, 3).await;
        h.inject(0).await;
        h.inject(1).await;
        h.handle
            .stop(vec![h.path(0).to_string_lossy().into_owned(), "unknown".to_string()], false)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*h.hooks.handled.lock().unwrap(), vec![h.path(1)]);
    }

    #[tokio::test]
    async fn test_skip_next_and_pause() {
        let h = harness(3, 20, 3).await;
        h.handle.skip_next_event().await.unwrap();
        h.inject(0).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.handled(), 0);
        assert!(!h.state.skips_next_event());

        h.handle.set_paused(true).await.unwrap();
        h.inject(1).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.handled(), 0);
        let status = h.image_status().await;
        assert!(status.paused && !status.watching && status.enabled);
        assert_eq!(*h.settings.paused.lock().unwrap(), Some(true));

        h.handle.set_paused(false).await.unwrap();
        h.inject(2).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*h.hooks.handled.lock().unwrap(), vec![h.path(2)]);
    }

    #[tokio::test]
    async fn test_filtered_and_running_paths_are_skipped() {
        let h = harness(1, 20, 3).await;
        std::fs::write(h.dir.path().join("notes.txt"), b"x").unwrap();
        h.handle
            .inject(FileType::Image, FileEvent::created(h.dir.path().join("notes.txt")))
            .await;

        let id = h.path(0).to_string_lossy().into_owned();
        h.state.optimisations.register(&id, "test").unwrap();
        h.inject(0).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.handled(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_records() {
        let h = harness(0, 20, 3).await;
        h.state.optimisations.register("clip", "cli").unwrap();
        h.handle.shutdown().await.unwrap();

        assert!(!h.state.optimisations.is_running("clip"));
        assert!(h.handle.status().await.is_err());
    }

    #[tokio::test]
    async fn test_reenable_after_trip_resumes_watching() {
        let dir = tempfile::tempdir().unwrap();
        let shots = dir.path().join("shots");
        std::fs::create_dir(&shots).unwrap();
        for i in 0..7 {
            std::fs::write(shots.join(format!("{}.png", i)), b"png").unwrap();
        }
        let toml = format!("[watchers.image]\ndirs = [{:?}]\n", shots.display().to_string());
        std::fs::write(dir.path().join(CONFIG_FILE), toml).unwrap();

        let store = Arc::new(OverridesFile::new(dir.path()));
        let mut config = AppConfig::load_from(dir.path()).unwrap();
        config.launch_count = 1;
        let hooks = Arc::new(RecordingHooks::default());
        let handle = Coordinator::new(AppState::new(config.clone()), store.clone(), Arc::new(RecordingNotifier::default()))
            .with_timings(timings())
            .spawn();
        handle.add_watcher(config.watch_request(FileType::Image), hooks.clone()).await.unwrap();

        for i in 0..6 {
            handle.inject(FileType::Image, FileEvent::created(shots.join(format!("{}.png", i)))).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = handle.status().await.unwrap().remove(0);
        assert!(status.tripped && !status.enabled);
        assert!(!AppConfig::load_from(dir.path()).unwrap().watchers.image.enabled);

        // What `optiwatch enable image` writes, then the reload applies
        store.set_watcher_enabled(FileType::Image, true).unwrap();
        let config = AppConfig::load_from(dir.path()).unwrap();
        assert!(config.watchers.image.enabled);
        handle.reconfigure(config).await.unwrap();

        let status = handle.status().await.unwrap().remove(0);
        assert!(status.enabled && !status.tripped);

        let fresh = shots.join("6.png");
        handle.inject(FileType::Image, FileEvent::created(fresh.clone())).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*hooks.handled.lock().unwrap(), vec![fresh]);
    }

    #[tokio::test]
    async fn test_denied_admission_skips_handler_and_marks_expire() {
        let asked = Arc::new(AtomicUsize::new(0));
        let h = harness_with(1, 20, 3, DenyAll(asked.clone()), None).await;
        h.inject(0).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.handled(), 0);
        assert_eq!(asked.load(Ordering::SeqCst), 1);
        assert_eq!(h.image_status().await.marked, 1);

        // Echoes while marked never reach the gate
        h.inject(0).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(asked.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(h.image_status().await.marked, 0);
        assert_eq!(h.handled(), 0);
    }

    #[tokio::test]
    async fn test_name_template_moves_file_and_marks_both_paths() {
        let h = harness_with(1, 20, 3, Unlimited, Some("renamed-%f")).await;
        h.inject(0).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        let target = h.dir.path().join("renamed-0.png");
        assert_eq!(*h.hooks.handled.lock().unwrap(), vec![target.clone()]);
        assert!(!h.path(0).exists());
        assert!(target.exists());
        assert_eq!(h.image_status().await.marked, 2);

        // The move's own events are not picked up again
        h.handle.inject(FileType::Image, FileEvent::created(target)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.handled(), 1);
    }

    #[tokio::test]
    async fn test_files_written_under_a_root_reach_the_handler() {
        let h = harness(0, 20, 3).await;
        assert!(h.image_status().await.watching);

        let path = h.dir.path().join("fresh.png");
        std::fs::write(&path, b"png").unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(*h.hooks.handled.lock().unwrap(), vec![path]);
    }

    #[tokio::test]
    async fn test_ended_records_are_swept() {
        let h = harness(0, 20, 3).await;
        h.state.optimisations.register("clip", "cli").unwrap();
        h.state.optimisations.finish("clip", Ok(None));
        h.state.optimisations.register("long", "cli").unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(h.state.optimisations.status("clip"), None);
        assert!(h.state.optimisations.is_running("long"));
    }
}
