use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Two consecutive polls saw the same modification time.
    Stable(SystemTime),
    /// Metadata could not be read; the caller proceeds anyway.
    Unreadable,
}

/// Waits until `path` stops being written to, polling every `interval`.
pub async fn settle_with_interval(path: &Path, interval: Duration) -> Settled {
    let Some(mut last) = modified_at(path).await else {
        return Settled::Unreadable;
    };

    loop {
        tokio::time::sleep(interval).await;
        let Some(current) = modified_at(path).await else {
            return Settled::Unreadable;
        };
        if current == last {
            return Settled::Stable(current);
        }
        debug!("👀 Watchman: {:?} still changing", path);
        last = current;
    }
}

async fn modified_at(path: &Path) -> Option<SystemTime> {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(time) => Some(time),
        Err(e) => {
            warn!("👀 Watchman: Can't read modification time of {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quiet_file_settles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"data").unwrap();

        let result = settle_with_interval(&path, Duration::from_millis(20)).await;
        assert!(matches!(result, Settled::Stable(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let result = settle_with_interval(&dir.path().join("nope.png"), Duration::from_millis(20)).await;
        assert_eq!(result, Settled::Unreadable);
    }

    #[tokio::test]
    async fn test_waits_out_ongoing_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.mov");
        std::fs::write(&path, b"0").unwrap();
        let touched = SystemTime::now() + Duration::from_secs(60);

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let file = std::fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
            file.set_modified(touched).unwrap();
        });

        let result = settle_with_interval(&path, Duration::from_millis(150)).await;
        writer.await.unwrap();

        assert_eq!(result, Settled::Stable(touched));
    }
}
