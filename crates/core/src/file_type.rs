use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The file families that get their own watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Document,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "heic", "tif", "tiff", "bmp", "avif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "mkv", "webm", "avi", "mpeg", "mpg"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf"];

impl FileType {
    pub const ALL: [FileType; 3] = [FileType::Image, FileType::Video, FileType::Document];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Document => "document",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileType::Image => IMAGE_EXTENSIONS,
            FileType::Video => VIDEO_EXTENSIONS,
            FileType::Document => DOCUMENT_EXTENSIONS,
        }
    }

    /// Name of the per-type ignore file looked up inside watched roots.
    pub fn ignore_file_name(&self) -> String {
        format!(".optiwatchignore-{}", self.as_str())
    }

    /// Extension check used as the default `should_handle` predicate.
    pub fn matches_path(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions().contains(&ext.as_str()))
    }

    pub fn from_path(path: &Path) -> Option<FileType> {
        Self::ALL.into_iter().find(|ft| ft.matches_path(path))
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" | "images" => Ok(FileType::Image),
            "video" | "videos" => Ok(FileType::Video),
            "document" | "documents" | "pdf" => Ok(FileType::Document),
            other => Err(format!("Unknown file type '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_extension_case_insensitively() {
        assert!(FileType::Image.matches_path(Path::new("/tmp/Shot.PNG")));
        assert!(FileType::Video.matches_path(Path::new("/tmp/rec.mov")));
        assert!(!FileType::Document.matches_path(Path::new("/tmp/notes.txt")));
        assert!(!FileType::Image.matches_path(Path::new("/tmp/no_extension")));
    }

    #[test]
    fn test_from_path_and_parse() {
        assert_eq!(FileType::from_path(Path::new("a/b.pdf")), Some(FileType::Document));
        assert_eq!(FileType::from_path(Path::new("a/b.zip")), None);
        assert_eq!("PDF".parse::<FileType>(), Ok(FileType::Document));
        assert!("audio".parse::<FileType>().is_err());
    }

    #[test]
    fn test_ignore_file_name() {
        assert_eq!(FileType::Video.ignore_file_name(), ".optiwatchignore-video");
    }
}
