//! Burst protection for the first moments of the very first run.
//!
//! Watching a folder that already churns (sync clients, build outputs) shows
//! up as a flood of "new" files right after startup. Inside the window every
//! new file is held; more than the threshold trips the breaker for good,
//! otherwise the held files are flushed once events stop for a while.

use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstState {
    pub started_at: Instant,
    pub pending_count: usize,
    pub tripped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstVerdict {
    /// Not inside the startup window; normal processing applies.
    Outside,
    /// Held until the flush deadline.
    Hold,
    /// Threshold exceeded. Terminal until re-enabled.
    Trip,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: BurstState,
    armed: bool,
    window: Duration,
    threshold: usize,
    flush_delay: Duration,
    flush_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(started_at: Instant, armed: bool, window: Duration, threshold: usize, flush_delay: Duration) -> Self {
        Self {
            state: BurstState {
                started_at,
                pending_count: 0,
                tripped: false,
            },
            armed,
            window,
            threshold,
            flush_delay,
            flush_at: None,
        }
    }

    pub fn state(&self) -> &BurstState {
        &self.state
    }

    pub fn is_tripped(&self) -> bool {
        self.state.tripped
    }

    pub fn within_window(&self, now: Instant) -> bool {
        self.armed && !self.state.tripped && now.saturating_duration_since(self.state.started_at) < self.window
    }

    /// Counts one admitted event.
    pub fn record(&mut self, now: Instant) -> BurstVerdict {
        if self.state.tripped {
            return BurstVerdict::Trip;
        }
        if !self.within_window(now) {
            return BurstVerdict::Outside;
        }

        self.state.pending_count += 1;
        if self.state.pending_count > self.threshold {
            warn!(
                "⚡ Burst: {} file events right after startup (limit {})",
                self.state.pending_count, self.threshold
            );
            self.state.tripped = true;
            self.state.pending_count = 0;
            self.flush_at = None;
            return BurstVerdict::Trip;
        }

        self.flush_at = Some(now + self.flush_delay);
        BurstVerdict::Hold
    }

    /// True once when the flush deadline has passed; resets the count.
    pub fn flush_due(&mut self, now: Instant) -> bool {
        match self.flush_at {
            Some(at) if at <= now => {
                self.flush_at = None;
                self.state.pending_count = 0;
                !self.state.tripped
            }
            _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.flush_at
    }

    /// External re-enable. The window stays anchored to the original start.
    pub fn reset(&mut self) {
        self.state.tripped = false;
        self.state.pending_count = 0;
        self.flush_at = None;
    }
}
