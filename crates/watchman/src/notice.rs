use tracing::{info, warn};

/// User-facing notices raised by the watchers.
pub trait Notifier: Send + Sync {
    /// Transient message, e.g. a batch that was skipped.
    fn notice(&self, message: &str);

    /// Something the user has to act on.
    fn alert(&self, title: &str, message: &str);
}

/// Writes notices to the log. Used by the daemon when nothing else is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notice(&self, message: &str) {
        info!("📣 {}", message);
    }

    fn alert(&self, title: &str, message: &str) {
        warn!("🚨 {}: {}", title, message);
    }
}
