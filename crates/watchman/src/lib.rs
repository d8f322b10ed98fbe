//! Optiwatch Watchman - new file detection for the watched folders
//!
//! This crate is organized into:
//! - types: FileEvent and the per-type hooks
//! - matcher: which events count as a file arrival
//! - pending: the coalescing set of recently added files
//! - breaker: startup burst protection
//! - processed: paths the watcher wrote itself
//! - settle: waiting for writes to finish
//! - template: optional rename before optimising
//! - watcher: one DirectoryWatcher per file type
//! - processing: the per-file pipeline
//! - coordinator: the loop that owns all of the above

mod breaker;
mod coordinator;
mod deadline;
mod error;
mod gate;
mod matcher;
mod notice;
mod pending;
mod processed;
mod processing;
mod settle;
mod template;
mod timings;
mod types;
mod watcher;

pub use breaker::{BurstState, BurstVerdict, CircuitBreaker};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use error::WatchError;
pub use gate::{AdmissionGate, SessionLimit, Unlimited};
pub use matcher::PathMatcher;
pub use notice::{LogNotifier, Notifier};
pub use pending::{Admission, PendingEntry, PendingEventSet};
pub use settle::{Settled, settle_with_interval};
pub use timings::WatchTimings;
pub use types::{EventFlag, FileEvent, FileHooks};
pub use watcher::{DirectoryWatcher, EventOutcome, WatcherStatus};
