//! Rename rule applied before a new file is handed to its optimiser.
//!
//! Tokens: `%y %Y %m %d %H %M %S` (local time), `%f` (original stem),
//! `%e` (original extension), `%i` (first counter giving a free name)
//! and `%%`.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MAX_COUNTER: u32 = 10_000;

/// Renders `template` for `path`. Returns `None` when the rendered name is
/// the file's current location.
pub fn render(template: &str, path: &Path, now: DateTime<Local>) -> Result<Option<PathBuf>> {
    let template = template.trim();
    if template.is_empty() {
        return Ok(None);
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();

    let counted = template.contains("%i");
    let mut counter = 1;
    loop {
        let name = expand(template, &stem, &ext, now, counter)?;
        let mut target = optiwatch_core::path_utils::get_path(&name);
        if target.is_relative() {
            target = dir.join(target);
        }
        if target.extension().is_none() && !ext.is_empty() {
            target.set_extension(&ext);
        }

        if target == path {
            return Ok(None);
        }
        if !counted || !target.exists() {
            debug!("✏️ Template: {:?} -> {:?}", path, target);
            return Ok(Some(target));
        }

        counter += 1;
        if counter > MAX_COUNTER {
            bail!("no free name for template {:?} next to {:?}", template, path);
        }
    }
}

fn expand(template: &str, stem: &str, ext: &str, now: DateTime<Local>, counter: u32) -> Result<String> {
    let mut out = String::with_capacity(template.len() + stem.len());
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('y') => out.push_str(&now.format("%y").to_string()),
            Some('Y') => out.push_str(&now.format("%Y").to_string()),
            Some('m') => out.push_str(&now.format("%m").to_string()),
            Some('d') => out.push_str(&now.format("%d").to_string()),
            Some('H') => out.push_str(&now.format("%H").to_string()),
            Some('M') => out.push_str(&now.format("%M").to_string()),
            Some('S') => out.push_str(&now.format("%S").to_string()),
            Some('f') => out.push_str(stem),
            Some('e') => out.push_str(ext),
            Some('i') => out.push_str(&counter.to_string()),
            Some('%') => out.push('%'),
            Some(other) => bail!("unknown template token %{}", other),
            None => bail!("template ends with a lone %"),
        }
    }

    Ok(out)
}

/// Moves `from` to `to`, creating parent directories. Falls back to
/// copy and remove across filesystems.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {:?}", parent))?;
    }

    if tokio::fs::rename(from, to).await.is_err() {
        tokio::fs::copy(from, to)
            .await
            .with_context(|| format!("copying {:?} to {:?}", from, to))?;
        tokio::fs::remove_file(from)
            .await
            .with_context(|| format!("removing {:?}", from))?;
    }

    info!("✏️ Template: Moved {:?} to {:?}", from, to);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).single().unwrap()
    }

    #[test]
    fn test_tokens() {
        let target = render("%Y-%m-%d_%H%M%S_%f.%e", Path::new("/w/shot.png"), at()).unwrap();
        assert_eq!(target, Some(PathBuf::from("/w/2024-03-09_140507_shot.png")));

        let target = render("%y%%_%f", Path::new("/w/clip.mov"), at()).unwrap();
        assert_eq!(target, Some(PathBuf::from("/w/24%_clip.mov")));
    }

    #[test]
    fn test_same_name_is_no_move() {
        assert_eq!(render("%f", Path::new("/w/shot.png"), at()).unwrap(), None);
        assert_eq!(render("  ", Path::new("/w/shot.png"), at()).unwrap(), None);
    }

    #[test]
    fn test_subdirectory_and_bad_token() {
        let target = render("done/%f", Path::new("/w/a.pdf"), at()).unwrap();
        assert_eq!(target, Some(PathBuf::from("/w/done/a.pdf")));
        assert!(render("%q", Path::new("/w/a.pdf"), at()).is_err());
        assert!(render("x%", Path::new("/w/a.pdf"), at()).is_err());
    }

    #[test]
    fn test_counter_finds_free_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("img-1.png"), b"").unwrap();
        std::fs::write(dir.path().join("img-2.png"), b"").unwrap();

        let target = render("img-%i", &dir.path().join("new.png"), at()).unwrap();
        assert_eq!(target, Some(dir.path().join("img-3.png")));
    }

    #[tokio::test]
    async fn test_move_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.png");
        let to = dir.path().join("sorted/2024/a.png");
        std::fs::write(&from, b"x").unwrap();

        move_file(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"x");
    }
}
