use anyhow::Result;
use chrono::Local;
use optiwatch_core::FileType;
use optiwatch_core::state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::coordinator::Msg;
use crate::settle::{Settled, settle_with_interval};
use crate::template;
use crate::timings::WatchTimings;
use crate::types::FileHooks;

/// One processing attempt for one path, run as its own task so a slow or
/// failing file never holds up the others.
pub(crate) struct Attempt {
    pub file_type: FileType,
    pub path: PathBuf,
    pub token: CancellationToken,
    pub hooks: Arc<dyn FileHooks>,
    pub name_template: Option<String>,
    pub timings: WatchTimings,
    pub state: AppState,
    pub tx: mpsc::Sender<Msg>,
}

impl Attempt {
    pub(crate) async fn run(self) {
        let original = self.path.clone();
        let mut current = self.path.clone();

        if let Err(e) = self.execute(&mut current).await {
            error!("👀 Watchman: Failed to process {:?}: {:#}", original, e);
        }

        let _ = self
            .tx
            .send(Msg::Finished {
                file_type: self.file_type,
                original,
                final_path: current,
            })
            .await;
    }

    async fn execute(&self, path: &mut PathBuf) -> Result<()> {
        tokio::time::sleep(self.timings.process_delay).await;

        if !tokio::fs::try_exists(&*path).await.unwrap_or(false) {
            debug!("👀 Watchman: {:?} is gone", path);
            return Ok(());
        }
        if self.cancelled() {
            return Ok(());
        }

        if let Some(rule) = &self.name_template {
            if let Some(target) = template::render(rule, path, Local::now())? {
                self.mark_processed(vec![path.clone(), target.clone()]).await;
                template::move_file(path, &target).await?;
                *path = target;
            }
        }
        if self.cancelled() {
            return Ok(());
        }

        if let Settled::Unreadable = settle_with_interval(path, self.timings.settle_poll).await {
            debug!("👀 Watchman: Proceeding with unreadable {:?}", path);
        }

        if self.state.take_skip_next_event() {
            info!("👀 Watchman: Skipping {:?} as requested", path);
            return Ok(());
        }
        if self.cancelled() {
            return Ok(());
        }

        if !self.admit().await {
            return Ok(());
        }

        info!("👀 Watchman: New {} {:?}", self.file_type, path);
        self.hooks.handle(path.clone()).await
    }

    fn cancelled(&self) -> bool {
        if self.token.is_cancelled() {
            debug!("👀 Watchman: {:?} was cancelled", self.path);
            return true;
        }
        false
    }

    async fn mark_processed(&self, paths: Vec<PathBuf>) {
        let (ack, done) = oneshot::channel();
        let msg = Msg::MarkProcessed {
            file_type: self.file_type,
            paths,
            ack,
        };
        if self.tx.send(msg).await.is_ok() {
            let _ = done.await;
        }
    }

    async fn admit(&self) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.tx.send(Msg::Admit { reply }).await.is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}
