//! Runtime write-back of settings the daemon changes on its own
//! (watcher disabled by burst protection, global pause, launch counter).
//!
//! Values land in `overrides.json` under the app root, which `AppConfig`
//! layers on top of `optiwatch.toml`.

use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use crate::error::CoreError;
use crate::file_type::FileType;

pub const OVERRIDES_FILE: &str = "overrides.json";

pub trait SettingsStore: Send + Sync {
    fn set_watcher_enabled(&self, file_type: FileType, enabled: bool) -> Result<(), CoreError>;
    fn set_paused(&self, paused: bool) -> Result<(), CoreError>;
}

pub struct OverridesFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OverridesFile {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(OVERRIDES_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Increments and returns the persisted launch counter.
    pub fn bump_launch_count(&self) -> Result<u32, CoreError> {
        let mut count = 0;
        self.update(|value| {
            count = value["launch_count"].as_u64().unwrap_or(0) as u32 + 1;
            value["launch_count"] = json!(count);
        })?;
        Ok(count)
    }

    fn read(&self) -> Result<Value, CoreError> {
        if !self.path.exists() {
            return Ok(Value::Object(Map::new()));
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        let value: Value = serde_json::from_str(&content)?;
        Ok(match value {
            Value::Object(_) => value,
            _ => Value::Object(Map::new()),
        })
    }

    fn update<F: FnOnce(&mut Value)>(&self, f: F) -> Result<(), CoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut value = self.read()?;
        f(&mut value);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }
}

impl SettingsStore for OverridesFile {
    fn set_watcher_enabled(&self, file_type: FileType, enabled: bool) -> Result<(), CoreError> {
        self.update(|value| {
            if !value["watchers"].is_object() {
                value["watchers"] = json!({});
            }
            if !value["watchers"][file_type.as_str()].is_object() {
                value["watchers"][file_type.as_str()] = json!({});
            }
            value["watchers"][file_type.as_str()]["enabled"] = json!(enabled);
        })?;
        info!("💾 Settings: {} watcher enabled = {}", file_type, enabled);
        Ok(())
    }

    fn set_paused(&self, paused: bool) -> Result<(), CoreError> {
        self.update(|value| {
            value["pause_automatic_optimisations"] = json!(paused);
        })?;
        info!("💾 Settings: automatic optimisations paused = {}", paused);
        Ok(())
    }
}
