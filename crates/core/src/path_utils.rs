//! Path utilities for Optiwatch
//!
//! Handles tilde expansion, app root resolution and control socket locations.

use std::path::{Path, PathBuf};

/// Expands a leading tilde (~) to the user's home directory.
/// Examples:
/// "~/Desktop" -> "/Users/jane/Desktop"
/// "/tmp/foo" -> "/tmp/foo" (no change)
pub fn expand_tilde(path: &str) -> String {
    if path == "~" {
        return home_dir();
    }
    match path.strip_prefix("~/") {
        Some(rest) => format!("{}/{}", home_dir(), rest),
        None => path.to_string(),
    }
}

/// Helper to convert a potentially tilde-containing string into a PathBuf.
pub fn get_path(path: &str) -> PathBuf {
    PathBuf::from(expand_tilde(path.trim()))
}

/// Resolves the Optiwatch root using the OPTIWATCH_ROOT env var.
/// Handles absolute paths, tilde expansion, and relative names under $HOME.
pub fn get_app_root() -> PathBuf {
    let root_name = std::env::var("OPTIWATCH_ROOT").unwrap_or_else(|_| ".optiwatch".to_string());

    if root_name.starts_with('/') {
        PathBuf::from(root_name)
    } else if root_name.starts_with('~') {
        get_path(&root_name)
    } else {
        PathBuf::from(home_dir()).join(root_name)
    }
}

/// Ensures a path is absolute, resolving tilde and relative to the app root.
pub fn ensure_absolute(path: &str) -> PathBuf {
    let p = get_path(path);
    if p.is_absolute() {
        p
    } else {
        get_app_root().join(p)
    }
}

/// Longest configured root that contains `path`.
pub fn nearest_root<'a, I>(roots: I, path: &Path) -> Option<&'a Path>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    roots
        .into_iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
        .map(|root| root.as_path())
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}
