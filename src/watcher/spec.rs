//! Per-directory enforcement policy.

use std::path::PathBuf;

/// Declared ownership and permission policy for one monitored directory.
///
/// Built once by configuration loading and shared read-only (behind an
/// `Arc`) by every task of the worker that enforces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    /// Absolute root of the tree.
    pub path: PathBuf,
    /// Watch and reconcile subdirectories too.
    pub recursive: bool,
    /// Glob patterns matched against the final path segment. Always win.
    pub exclude: Vec<String>,
    /// Glob patterns matched against the final path segment. Empty means all.
    pub include: Vec<String>,
    /// Target permission bits for regular files.
    pub file_mode: u32,
    /// Target permission bits for directories.
    pub dir_mode: u32,
    /// Target owner.
    pub uid: u32,
    /// Target group.
    pub gid: u32,
}

impl WatchSpec {
    /// Create a recursive spec with no patterns.
    pub fn new(path: impl Into<PathBuf>, uid: u32, gid: u32, file_mode: u32, dir_mode: u32) -> Self {
        Self {
            path: path.into(),
            recursive: true,
            exclude: Vec::new(),
            include: Vec::new(),
            file_mode,
            dir_mode,
            uid,
            gid,
        }
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Target mode for an entry of the given kind.
    pub fn target_mode(&self, is_dir: bool) -> u32 {
        if is_dir { self.dir_mode } else { self.file_mode }
    }
}
