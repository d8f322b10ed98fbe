use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use optiwatch_control::{ControlServer, ItemReference, OptimisationService, PauseScope, StopRequest, SubmitOptions};
use optiwatch_core::FileType;
use optiwatch_core::config::AppConfig;
use optiwatch_core::settings::OverridesFile;
use optiwatch_core::state::AppState;
use optiwatch_watchman::{Coordinator, CoordinatorHandle, LogNotifier, Notifier, SessionLimit};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::hooks::TypeHooks;
use crate::optimiser::{CommandOptimiser, OptimiseJob};
use crate::reload;

/// Control channel requests, served by the optimiser and the coordinator.
struct DaemonService {
    optimiser: CommandOptimiser,
    coordinator: CoordinatorHandle,
}

#[async_trait]
impl OptimisationService for DaemonService {
    async fn optimise(&self, id: &str, item: ItemReference, options: &SubmitOptions) -> Result<Option<String>> {
        let path = match item {
            ItemReference::Path(path) => path,
            ItemReference::Url(url) => bail!("remote items are not supported, download {} first", url),
            ItemReference::Data(_) => bail!("inline data is not supported, save it to a file first"),
        };
        if !path.exists() {
            bail!("{} doesn't exist", path.display());
        }
        let Some(file_type) = FileType::from_path(&path) else {
            bail!("{} is not an image, video or PDF", path.display());
        };

        self.optimiser
            .optimise(OptimiseJob {
                id: id.to_string(),
                path,
                file_type,
                source: options.source.clone(),
                downscale_to: options.downscale_to,
                speed_factor: options.speed_factor,
                aggressive: options.aggressive.unwrap_or(false),
            })
            .await
    }

    async fn stop(&self, request: StopRequest) {
        if let Err(e) = self.coordinator.stop(request.ids, request.remove).await {
            error!("🛑 Stop failed: {}", e);
        }
    }

    async fn pause(&self, scope: PauseScope) {
        let result = match scope {
            PauseScope::NextEvent => self.coordinator.skip_next_event().await,
            PauseScope::All => self.coordinator.set_paused(true).await,
            PauseScope::Resume => self.coordinator.set_paused(false).await,
        };
        if let Err(e) = result {
            error!("⏸️ Pause failed: {}", e);
        }
    }
}

pub async fn run() -> Result<()> {
    let root = optiwatch_core::path_utils::get_app_root();
    std::fs::create_dir_all(&root).with_context(|| format!("creating {:?}", root))?;

    let settings = Arc::new(OverridesFile::new(&root));
    let launch_count = settings.bump_launch_count()?;
    let config = AppConfig::load().context("loading configuration")?;
    info!("🚀 Optiwatch daemon starting (launch #{})", launch_count);

    let state = AppState::new(config.clone());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let coordinator = Coordinator::new(state.clone(), settings, notifier.clone())
        .with_gate(SessionLimit::new(notifier))
        .spawn();

    let optimiser = CommandOptimiser::new(state.optimisations.clone(), config.watchers.clone());
    for file_type in FileType::ALL {
        let hooks = Arc::new(TypeHooks::new(file_type, optimiser.clone()));
        coordinator.add_watcher(config.watch_request(file_type), hooks).await?;
    }

    let service = Arc::new(DaemonService {
        optimiser: optimiser.clone(),
        coordinator: coordinator.clone(),
    });
    let socket_dir = config.socket_dir();
    let server = ControlServer::bind(&socket_dir, service)
        .with_context(|| format!("binding control sockets in {:?}", socket_dir))?;
    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(shutdown.clone()));

    let _reloader = match reload::spawn(root.clone(), coordinator.clone(), optimiser) {
        Ok(reloader) => Some(reloader),
        Err(e) => {
            warn!("🔄 Reload: Config changes need a restart: {}", e);
            None
        }
    };

    info!("🚀 Optiwatch daemon ready");
    wait_for_signal().await;

    shutdown.cancel();
    coordinator.shutdown().await?;
    let _ = server_task.await;
    info!("👋 Optiwatch daemon stopped");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            }
        }
        Err(e) => {
            warn!("Can't listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for SIGINT: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optiwatch_core::config::WatchersConfig;

    async fn service() -> DaemonService {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path()).unwrap();
        let state = AppState::new(config);
        let coordinator = Coordinator::new(
            state.clone(),
            Arc::new(OverridesFile::new(dir.path())),
            Arc::new(LogNotifier),
        )
        .spawn();
        DaemonService {
            optimiser: CommandOptimiser::new(state.optimisations.clone(), WatchersConfig::default()),
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_optimise_rejects_unsupported_items() {
        let service = service().await;
        let options = SubmitOptions::default();

        let url = ItemReference::Url("https://x/a.png".into());
        assert!(service.optimise("a", url, &options).await.is_err());

        let missing = ItemReference::Path("/definitely/not/here.png".into());
        assert!(service.optimise("b", missing, &options).await.is_err());

        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"x").unwrap();
        assert!(service.optimise("c", ItemReference::Path(text), &options).await.is_err());
    }

    #[tokio::test]
    async fn test_optimise_existing_file_without_command() {
        let service = service().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"png").unwrap();

        let result = service
            .optimise("a", ItemReference::Path(path.clone()), &SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(result, Some(path.display().to_string()));
    }
}
