use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::AppConfig;
use crate::optimisation::Optimisations;

/// Coordination context shared by the watchers and the control handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub optimisations: Optimisations,
    // Set by the coordinator on a pause-next request, consumed by the file pipeline.
    skip_next_event: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            optimisations: Optimisations::new(),
            skip_next_event: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_skip_next_event(&self, skip: bool) {
        self.skip_next_event.store(skip, Ordering::SeqCst);
    }

    pub fn skips_next_event(&self) -> bool {
        self.skip_next_event.load(Ordering::SeqCst)
    }

    /// Clears the flag and reports whether it was set.
    pub fn take_skip_next_event(&self) -> bool {
        self.skip_next_event.swap(false, Ordering::SeqCst)
    }
}
