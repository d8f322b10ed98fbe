use anyhow::Result;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use optiwatch_core::config::{AppConfig, CONFIG_FILE};
use optiwatch_core::settings::OVERRIDES_FILE;
use optiwatch_watchman::CoordinatorHandle;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::optimiser::CommandOptimiser;

const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// Re-applies configuration whenever `optiwatch.toml` or `overrides.json`
/// changes. Dropping it stops watching.
pub struct ConfigReloader {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ConfigReloader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_config_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name == CONFIG_FILE || name == OVERRIDES_FILE)
}

pub fn spawn(root: PathBuf, coordinator: CoordinatorHandle, optimiser: CommandOptimiser) -> Result<ConfigReloader> {
    let (tx, mut rx) = mpsc::channel::<()>(16);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if event.paths.iter().any(|p| is_config_file(p)) {
                let _ = tx.try_send(());
            }
        }
    })?;
    watcher.watch(&root, RecursiveMode::NonRecursive)?;

    let task = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            tokio::time::sleep(RELOAD_DEBOUNCE).await;
            while rx.try_recv().is_ok() {}

            match AppConfig::load_from(&root) {
                Ok(config) => {
                    info!("🔄 Reload: Configuration changed");
                    optimiser.update(config.watchers.clone());
                    if coordinator.reconfigure(config).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("🔄 Reload: Keeping previous configuration: {}", e),
            }
        }
    });

    Ok(ConfigReloader {
        _watcher: watcher,
        task,
    })
}
