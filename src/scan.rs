//! Recursive media directory scanning.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{MediaPrepError, Result};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov"];
pub const MKV_EXTENSIONS: &[&str] = &["mkv"];
pub const MP4_EXTENSIONS: &[&str] = &["mp4"];
pub const SRT_EXTENSIONS: &[&str] = &["srt"];

/// A file found under the scan root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub path: PathBuf,
    /// Path relative to the scan root, for display and skip matching
    pub relative: PathBuf,
    /// A skip pattern matched; the file must not be processed
    pub skipped: bool,
}

impl fmt::Display for ScanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative.display())
    }
}

/// Finds files by extension below a root directory
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    extensions: Vec<String>,
    skip_patterns: Vec<String>,
}

impl Scanner {
    pub fn new<P: AsRef<Path>>(root: P, extensions: &[&str]) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            skip_patterns: Vec::new(),
        }
    }

    /// Mark files whose relative path contains any of these (case-insensitive)
    pub fn with_skip_patterns(mut self, patterns: &[String]) -> Self {
        self.skip_patterns = patterns
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree and return matching files sorted by path
    pub fn scan(&self) -> Result<Vec<ScanEntry>> {
        if !self.root.is_dir() {
            return Err(MediaPrepError::FileNotFound(format!(
                "Directory not found: {}",
                self.root.display()
            )));
        }

        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.matches_extension(entry.path()) {
                continue;
            }

            let path = entry.into_path();
            let relative = pathdiff::diff_paths(&path, &self.root).unwrap_or_else(|| path.clone());
            let skipped = self.is_skipped(&relative);
            if skipped {
                debug!("Skip pattern matched: {}", relative.display());
            }

            entries.push(ScanEntry {
                path,
                relative,
                skipped,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    fn is_skipped(&self, relative: &Path) -> bool {
        let haystack = relative.to_string_lossy().to_lowercase();
        self.skip_patterns.iter().any(|p| haystack.contains(p.as_str()))
    }
}
