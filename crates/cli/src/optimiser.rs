use anyhow::{Context, Result, anyhow, bail};
use optiwatch_core::FileType;
use optiwatch_core::config::WatchersConfig;
use optiwatch_core::optimisation::Optimisations;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct OptimiseJob {
    pub id: String,
    pub path: PathBuf,
    pub file_type: FileType,
    pub source: String,
    pub downscale_to: Option<f64>,
    pub speed_factor: Option<f64>,
    pub aggressive: bool,
}

impl OptimiseJob {
    /// Watcher-started jobs use the path as their id.
    pub fn for_path(path: &Path, file_type: FileType) -> Self {
        Self {
            id: path.to_string_lossy().into_owned(),
            path: path.to_path_buf(),
            file_type,
            source: "watcher".to_string(),
            downscale_to: None,
            speed_factor: None,
            aggressive: false,
        }
    }
}

/// Runs the configured shell command for a file, tracked in the registry so
/// stop requests can cancel it.
#[derive(Clone)]
pub struct CommandOptimiser {
    registry: Optimisations,
    watchers: Arc<RwLock<WatchersConfig>>,
}

impl CommandOptimiser {
    pub fn new(registry: Optimisations, watchers: WatchersConfig) -> Self {
        Self {
            registry,
            watchers: Arc::new(RwLock::new(watchers)),
        }
    }

    pub fn update(&self, watchers: WatchersConfig) {
        *self.watchers.write().unwrap_or_else(|e| e.into_inner()) = watchers;
    }

    fn command_for(&self, file_type: FileType) -> Option<String> {
        let watchers = self.watchers.read().unwrap_or_else(|e| e.into_inner());
        watchers
            .get(file_type)
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
    }

    pub async fn optimise(&self, job: OptimiseJob) -> Result<Option<String>> {
        let Some(token) = self.registry.register(&job.id, &job.source) else {
            bail!("{} is already being optimised", job.id);
        };

        let result = tokio::select! {
            result = self.run(&job) => result,
            _ = token.cancelled() => Err(anyhow!("stopped")),
        };

        self.registry
            .finish(&job.id, result.as_ref().map(Clone::clone).map_err(|e| format!("{:#}", e)));
        result
    }

    async fn run(&self, job: &OptimiseJob) -> Result<Option<String>> {
        let Some(command) = self.command_for(job.file_type) else {
            debug!("⚙️ Optimiser: No command for {}s, leaving {:?} as is", job.file_type, job.path);
            return Ok(Some(job.path.display().to_string()));
        };

        info!("⚙️ Optimiser: {} ({})", job.path.display(), job.source);
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .env("OPTIWATCH_PATH", &job.path)
            .env("OPTIWATCH_TYPE", job.file_type.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(factor) = job.downscale_to {
            cmd.env("OPTIWATCH_DOWNSCALE", factor.to_string());
        }
        if let Some(factor) = job.speed_factor {
            cmd.env("OPTIWATCH_SPEED", factor.to_string());
        }
        if job.aggressive {
            cmd.env("OPTIWATCH_AGGRESSIVE", "1");
        }

        let child = cmd.spawn().with_context(|| format!("starting `{}`", command))?;
        let output = match timeout(COMMAND_TIMEOUT, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => bail!("`{}` timed out", command),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("`{}` failed ({}): {}", command, output.status, stderr.trim());
        }

        // The last stdout line names the result, defaulting to the input file.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let result = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| job.path.display().to_string());
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optiwatch_core::optimisation::OptimisationStatus;

    fn optimiser(command: &str) -> CommandOptimiser {
        let mut watchers = WatchersConfig::default();
        watchers.image.command = Some(command.to_string());
        CommandOptimiser::new(Optimisations::new(), watchers)
    }

    #[tokio::test]
    async fn test_command_receives_path_and_reports_result() {
        let o = optimiser("echo \"optimised $OPTIWATCH_PATH\"");
        let job = OptimiseJob::for_path(Path::new("/w/a.png"), FileType::Image);

        let result = o.optimise(job).await.unwrap();
        assert_eq!(result.as_deref(), Some("optimised /w/a.png"));
        assert_eq!(
            o.registry.status("/w/a.png"),
            Some(OptimisationStatus::Finished(Some("optimised /w/a.png".into())))
        );
    }

    #[tokio::test]
    async fn test_factors_reach_the_command() {
        let o = optimiser("echo \"$OPTIWATCH_DOWNSCALE $OPTIWATCH_SPEED\"");
        let mut job = OptimiseJob::for_path(Path::new("/w/a.png"), FileType::Image);
        job.downscale_to = Some(0.5);
        job.speed_factor = Some(0.25);

        let result = o.optimise(job).await.unwrap();
        assert_eq!(result.as_deref(), Some("0.5 0.25"));
    }

    #[tokio::test]
    async fn test_failing_command_is_recorded() {
        let o = optimiser("echo broken >&2; exit 3");
        let err = o
            .optimise(OptimiseJob::for_path(Path::new("/w/a.png"), FileType::Image))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
        assert!(matches!(o.registry.status("/w/a.png"), Some(OptimisationStatus::Failed(_))));
    }

    #[tokio::test]
    async fn test_stop_cancels_running_command() {
        let o = optimiser("sleep 5");
        let runner = o.clone();
        let task = tokio::spawn(async move {
            runner
                .optimise(OptimiseJob::for_path(Path::new("/w/a.png"), FileType::Image))
                .await
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(o.registry.stop("/w/a.png", true));

        let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(result.is_err());
        assert_eq!(o.registry.status("/w/a.png"), None);
    }

    #[tokio::test]
    async fn test_missing_command_keeps_file() {
        let o = CommandOptimiser::new(Optimisations::new(), WatchersConfig::default());
        let result = o
            .optimise(OptimiseJob::for_path(Path::new("/w/a.mov"), FileType::Video))
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some("/w/a.mov"));
    }
}
