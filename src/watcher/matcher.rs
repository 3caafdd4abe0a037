//! Include/exclude filtering on the final path segment.
//!
//! Patterns use shell glob syntax (`*`, `?`, `[abc]`, literals) and are
//! matched against the file name only, never the full path. Exclude always
//! wins over include. A pattern that fails to compile never matches.

use std::borrow::Cow;
use std::path::Path;

use glob::Pattern;

use super::WatchSpec;

/// Compiled include/exclude patterns for one [`WatchSpec`].
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    exclude: Vec<Pattern>,
    include: Vec<Pattern>,
    /// Include patterns were configured, even if none compiled.
    include_configured: bool,
}

impl PathMatcher {
    /// Compile the patterns of a spec.
    ///
    /// Malformed patterns are logged and dropped. A dropped include pattern
    /// still counts as configured, so an include list made only of broken
    /// patterns matches nothing rather than everything.
    pub fn from_spec(spec: &WatchSpec) -> Self {
        Self {
            exclude: compile(&spec.exclude, spec),
            include: compile(&spec.include, spec),
            include_configured: !spec.include.is_empty(),
        }
    }

    /// Whether an entry participates in enforcement.
    pub fn should_process(&self, path: &Path) -> bool {
        let name = segment(path);

        if self.exclude.iter().any(|p| p.matches(&name)) {
            return false;
        }

        if self.include_configured {
            return self.include.iter().any(|p| p.matches(&name));
        }

        true
    }

    /// Whether a directory's subtree is traversed and watched.
    pub fn should_descend(&self, path: &Path) -> bool {
        let name = segment(path);
        !self.exclude.iter().any(|p| p.matches(&name))
    }
}

/// One-off check without keeping a compiled matcher around.
pub fn should_process(path: &Path, spec: &WatchSpec) -> bool {
    PathMatcher::from_spec(spec).should_process(path)
}

/// One-off descent check without keeping a compiled matcher around.
pub fn should_descend(path: &Path, spec: &WatchSpec) -> bool {
    PathMatcher::from_spec(spec).should_descend(path)
}

fn compile(patterns: &[String], spec: &WatchSpec) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|raw| match Pattern::new(raw) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(
                    path = %spec.path.display(),
                    pattern = %raw,
                    "[matcher] invalid glob pattern, it will never match: {e}"
                );
                None
            }
        })
        .collect()
}

fn segment(path: &Path) -> Cow<'_, str> {
    match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => path.as_os_str().to_string_lossy(),
    }
}
