use async_trait::async_trait;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFlag {
    Created,
    Renamed,
    Modified,
    Removed,
    IsFile,
    IsDir,
    /// Replayed or coalesced history rather than a live change.
    HistoryDone,
}

/// A filesystem notification for one path. Equality and hashing use the path only.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub flags: HashSet<EventFlag>,
    pub observed_at: Instant,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, flags: impl IntoIterator<Item = EventFlag>) -> Self {
        Self {
            path: path.into(),
            flags: flags.into_iter().collect(),
            observed_at: Instant::now(),
        }
    }

    /// Shorthand for a freshly created regular file.
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, [EventFlag::Created, EventFlag::IsFile])
    }

    pub fn has(&self, flag: EventFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn has_any(&self, flags: &[EventFlag]) -> bool {
        flags.iter().any(|f| self.flags.contains(f))
    }

    /// Splits a notify event into one FileEvent per affected path.
    pub fn from_notify(event: &Event) -> Vec<FileEvent> {
        let mut flags = HashSet::new();
        let mut paths: Vec<&PathBuf> = event.paths.iter().collect();

        match &event.kind {
            EventKind::Create(kind) => {
                flags.insert(EventFlag::Created);
                match kind {
                    CreateKind::File => {
                        flags.insert(EventFlag::IsFile);
                    }
                    CreateKind::Folder => {
                        flags.insert(EventFlag::IsDir);
                    }
                    _ => {}
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                flags.insert(EventFlag::Removed);
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                flags.insert(EventFlag::Renamed);
                // Both = [from, to]; only the destination is an arrival
                if *mode == RenameMode::Both && paths.len() == 2 {
                    paths.remove(0);
                }
            }
            EventKind::Modify(_) => {
                flags.insert(EventFlag::Modified);
            }
            EventKind::Remove(_) => {
                flags.insert(EventFlag::Removed);
            }
            _ => return Vec::new(),
        }

        if event.need_rescan() {
            flags.insert(EventFlag::HistoryDone);
        }

        paths
            .into_iter()
            .map(|path| {
                let mut flags = flags.clone();
                if !flags.contains(&EventFlag::IsFile) && !flags.contains(&EventFlag::IsDir) {
                    if let Ok(meta) = std::fs::symlink_metadata(path) {
                        if meta.is_file() {
                            flags.insert(EventFlag::IsFile);
                        } else if meta.is_dir() {
                            flags.insert(EventFlag::IsDir);
                        }
                    }
                }
                FileEvent {
                    path: path.clone(),
                    flags,
                    observed_at: Instant::now(),
                }
            })
            .collect()
    }
}

impl PartialEq for FileEvent {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FileEvent {}

impl Hash for FileEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Callbacks a watcher owner supplies per file type.
#[async_trait]
pub trait FileHooks: Send + Sync {
    /// Type predicate, ANDed with the PathMatcher.
    fn should_handle(&self, event: &FileEvent) -> bool;

    /// Called once per path when its batch is aborted.
    fn cancel(&self, path: &Path);

    /// Called once per settled, admitted file.
    async fn handle(&self, path: PathBuf) -> anyhow::Result<()>;
}
