use async_trait::async_trait;
use optiwatch_core::FileType;
use optiwatch_watchman::{FileEvent, FileHooks};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::optimiser::{CommandOptimiser, OptimiseJob};

/// Watcher hooks for one file type, backed by the command optimiser.
pub struct TypeHooks {
    file_type: FileType,
    optimiser: CommandOptimiser,
}

impl TypeHooks {
    pub fn new(file_type: FileType, optimiser: CommandOptimiser) -> Self {
        Self { file_type, optimiser }
    }
}

#[async_trait]
impl FileHooks for TypeHooks {
    fn should_handle(&self, event: &FileEvent) -> bool {
        self.file_type.matches_path(&event.path)
    }

    fn cancel(&self, path: &Path) {
        info!("⏭️ Skipped {} {:?}", self.file_type, path);
    }

    async fn handle(&self, path: PathBuf) -> anyhow::Result<()> {
        let job = OptimiseJob::for_path(&path, self.file_type);
        if let Some(result) = self.optimiser.optimise(job).await? {
            info!("✅ Optimised {:?} -> {}", path, result);
        }
        Ok(())
    }
}
