//! Optiwatch Core
//!
//! Shared pieces used by the watcher, the control channel and the CLI:
//! - config: layered configuration (defaults, TOML, overrides, env)
//! - settings: write-back of flags the daemon changes at runtime
//! - state: the coordination context passed to watchers and handlers
//! - optimisation: registry of in-flight and retained optimisations
//! - file_type: the watched file families
//! - path_utils: tilde expansion and app root resolution

pub mod config;
pub mod error;
pub mod file_type;
pub mod optimisation;
pub mod path_utils;
pub mod settings;
pub mod state;

pub use error::CoreError;
pub use file_type::FileType;
