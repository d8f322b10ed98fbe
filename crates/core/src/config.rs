use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::file_type::FileType;
use crate::settings::OVERRIDES_FILE;

pub const CONFIG_FILE: &str = "optiwatch.toml";
pub const DEFAULT_MAX_FILE_COUNT: i64 = 20;

/// Per-type watcher settings as they appear under `[watchers.<type>]`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WatchSettings {
    #[serde(default)]
    pub dirs: Vec<String>,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub max_file_count: usize,

    /// Rename rule applied before optimising, e.g. `%Y-%m-%d %f`.
    #[serde(default)]
    pub name_template: Option<String>,

    /// Shell command run by the optimiser, receives `$OPTIWATCH_PATH`.
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WatchersConfig {
    #[serde(default)]
    pub image: WatchSettings,
    #[serde(default)]
    pub video: WatchSettings,
    #[serde(default)]
    pub document: WatchSettings,
}

impl WatchersConfig {
    pub fn get(&self, file_type: FileType) -> &WatchSettings {
        match file_type {
            FileType::Image => &self.image,
            FileType::Video => &self.video,
            FileType::Document => &self.document,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub watchers: WatchersConfig,

    #[serde(alias = "PAUSE_AUTOMATIC_OPTIMISATIONS", default)]
    pub pause_automatic_optimisations: bool,

    #[serde(default)]
    pub launch_count: u32,

    #[serde(alias = "SESSION_LIMIT", default)]
    pub session_limit: Option<usize>,

    #[serde(alias = "SOCKET_DIR", default)]
    pub socket_dir: Option<String>,

    #[serde(skip)]
    pub project_root: PathBuf,
}

/// Everything a DirectoryWatcher needs from configuration, replaced wholesale
/// on every configuration change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub file_type: FileType,
    pub roots: BTreeSet<PathBuf>,
    pub enabled: bool,
    pub max_batch_size: usize,
    pub name_template: Option<String>,
}

impl WatchRequest {
    pub fn new(file_type: FileType) -> Self {
        Self {
            file_type,
            roots: BTreeSet::new(),
            enabled: true,
            max_batch_size: DEFAULT_MAX_FILE_COUNT as usize,
            name_template: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // 1. Try standard dotenv discovery from current dir
        if dotenvy::dotenv().is_err() {
            // 2. Fallback: Try explicitly from resolved OPTIWATCH_ROOT
            let path = crate::path_utils::get_app_root().join(".env");
            if path.exists() {
                let _ = dotenvy::from_path(&path);
            }
        }

        Self::load_from(&crate::path_utils::get_app_root())
    }

    pub fn load_from(root: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("pause_automatic_optimisations", false)?
            .set_default("launch_count", 0)?
            .set_default("watchers.image.enabled", true)?
            .set_default("watchers.image.dirs", vec!["~/Desktop"])?
            .set_default("watchers.image.max_file_count", DEFAULT_MAX_FILE_COUNT)?
            .set_default("watchers.video.enabled", true)?
            .set_default("watchers.video.dirs", vec!["~/Desktop"])?
            .set_default("watchers.video.max_file_count", DEFAULT_MAX_FILE_COUNT)?
            .set_default("watchers.document.enabled", false)?
            .set_default("watchers.document.dirs", Vec::<String>::new())?
            .set_default("watchers.document.max_file_count", DEFAULT_MAX_FILE_COUNT)?
            .add_source(File::from(root.join(CONFIG_FILE)).required(false))
            .add_source(File::from(root.join(OVERRIDES_FILE)).required(false))
            .add_source(Environment::with_prefix("OPTIWATCH").separator("__"));

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.project_root = root.to_path_buf();

        Ok(config)
    }

    pub fn watch_request(&self, file_type: FileType) -> WatchRequest {
        let settings = self.watchers.get(file_type);
        WatchRequest {
            file_type,
            roots: settings
                .dirs
                .iter()
                .filter(|d| !d.trim().is_empty())
                .map(|d| crate::path_utils::get_path(d))
                .collect(),
            enabled: settings.enabled,
            max_batch_size: settings.max_file_count,
            name_template: settings
                .name_template
                .clone()
                .filter(|t| !t.trim().is_empty()),
        }
    }

    /// Directory holding the control channel sockets.
    pub fn socket_dir(&self) -> PathBuf {
        match &self.socket_dir {
            Some(dir) => crate::path_utils::ensure_absolute(dir),
            None => self.project_root.clone(),
        }
    }

    /// The burst protection only arms on the very first daemon run.
    pub fn is_first_run(&self) -> bool {
        self.launch_count <= 1
    }
}
