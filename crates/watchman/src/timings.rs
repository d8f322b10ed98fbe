use std::time::Duration;

/// Final coalescing delay before a path is re-checked and processed.
pub const PROCESS_DELAY: Duration = Duration::from_millis(300);
/// Interval between modification-time polls while waiting for a file to settle.
pub const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(300);
/// Lifetime of a pending entry outside the burst window.
pub const PENDING_EXPIRY: Duration = Duration::from_millis(1000);
/// Startup interval during which bursts trip the breaker.
pub const BURST_WINDOW: Duration = Duration::from_secs(30);
/// Held entries are flushed this long after the last held event.
pub const BURST_FLUSH_DELAY: Duration = Duration::from_millis(3000);
/// More pending files than this inside the burst window disables the watcher.
pub const BURST_THRESHOLD: usize = 5;
/// Pending and cancelled state is cleared this long after a batch overflow.
pub const BATCH_COOLDOWN: Duration = Duration::from_millis(1000);
/// How long a path the watcher wrote itself is ignored.
pub const PROCESSED_MARK_TTL: Duration = Duration::from_millis(3000);
/// Ended optimisation records stay queryable this long before eviction.
pub const RECORD_RETENTION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTimings {
    pub process_delay: Duration,
    pub settle_poll: Duration,
    pub pending_expiry: Duration,
    pub burst_window: Duration,
    pub burst_flush_delay: Duration,
    pub burst_threshold: usize,
    pub batch_cooldown: Duration,
    pub processed_ttl: Duration,
    pub record_retention: Duration,
}

impl Default for WatchTimings {
    fn default() -> Self {
        Self {
            process_delay: PROCESS_DELAY,
            settle_poll: SETTLE_POLL_INTERVAL,
            pending_expiry: PENDING_EXPIRY,
            burst_window: BURST_WINDOW,
            burst_flush_delay: BURST_FLUSH_DELAY,
            burst_threshold: BURST_THRESHOLD,
            batch_cooldown: BATCH_COOLDOWN,
            processed_ttl: PROCESSED_MARK_TTL,
            record_retention: RECORD_RETENTION,
        }
    }
}
