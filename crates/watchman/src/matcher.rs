use ignore::gitignore::Gitignore;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::{EventFlag, FileEvent};

const ARRIVAL_FLAGS: &[EventFlag] = &[EventFlag::Created, EventFlag::Renamed, EventFlag::Modified];
const EXCLUDED_FLAGS: &[EventFlag] = &[EventFlag::HistoryDone, EventFlag::Removed];

/// Decides whether a raw event is a genuine file arrival under the watched roots.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    roots: Vec<PathBuf>,
    ignore_file_name: String,
}

impl PathMatcher {
    pub fn new<I>(roots: I, ignore_file_name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        Self {
            roots: roots.into_iter().collect(),
            ignore_file_name: ignore_file_name.into(),
        }
    }

    pub fn matches(&self, event: &FileEvent) -> bool {
        if !event.has(EventFlag::IsFile) || event.has(EventFlag::IsDir) {
            return false;
        }
        if !event.has_any(ARRIVAL_FLAGS) || event.has_any(EXCLUDED_FLAGS) {
            return false;
        }
        if is_hidden(&event.path) {
            return false;
        }
        !self.is_ignored(&event.path)
    }

    /// Walks from the file's directory up to its nearest root, consulting
    /// every ignore file on the way.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let Some(root) = optiwatch_core::path_utils::nearest_root(&self.roots, path) else {
            return false;
        };

        let mut dir = path.parent();
        while let Some(current) = dir {
            if !current.starts_with(root) {
                break;
            }

            let ignore_file = current.join(&self.ignore_file_name);
            if ignore_file.is_file() {
                let (rules, err) = Gitignore::new(&ignore_file);
                if let Some(e) = err {
                    warn!("👀 Watchman: Partial ignore file {:?}: {}", ignore_file, e);
                }
                if rules.matched_path_or_any_parents(path, false).is_ignore() {
                    debug!("👀 Watchman: Ignoring {:?} because of {:?}", path, ignore_file);
                    return true;
                }
            }

            if current == root {
                break;
            }
            dir = current.parent();
        }

        false
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(true)
}
