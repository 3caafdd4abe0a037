//! Ownership and permission correction.
//!
//! [`Reconciler::enforce_entry`] fixes a single path, [`Reconciler::enforce_tree`]
//! walks a whole spec root. Corrections are idempotent: re-applying the same
//! owner and mode is a no-op, so concurrent passes over the same path need no
//! locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::fs::{EntryKind, EntryStat, HostFs, PolicyFs};
use super::{PathMatcher, WatchError, WatchSpec};

/// Aggregate outcome of one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationResult {
    /// Entries whose owner or mode was changed.
    pub fixed: usize,
    /// Entries already compliant.
    pub skipped: usize,
    /// Entries that could not be inspected or corrected.
    pub failed: usize,
}

impl ReconciliationResult {
    /// Tally the outcome of one entry.
    pub fn record(&mut self, path: &Path, outcome: Result<bool, WatchError>) {
        match outcome {
            Ok(true) => self.fixed += 1,
            Ok(false) => self.skipped += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), "[reconcile] {e}");
                self.failed += 1;
            }
        }
    }

    pub fn merge(&mut self, other: ReconciliationResult) {
        self.fixed += other.fixed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.fixed + self.skipped + self.failed
    }

    /// Whether the pass changed anything or hit errors.
    pub fn is_eventful(&self) -> bool {
        self.fixed > 0 || self.failed > 0
    }

    /// Emit the aggregate record for a pass. Quiet passes only log at debug.
    pub fn log(&self, root: &Path, pass: &str) {
        if self.is_eventful() {
            tracing::info!(
                path = %root.display(),
                pass,
                fixed = self.fixed,
                skipped = self.skipped,
                failed = self.failed,
                "[reconcile] {pass} enforcement complete"
            );
        } else {
            tracing::debug!(
                path = %root.display(),
                pass,
                skipped = self.skipped,
                "[reconcile] {pass} enforcement complete, no changes needed"
            );
        }
    }
}

/// Applies a [`WatchSpec`] to entries on a [`PolicyFs`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    fs: Arc<dyn PolicyFs>,
    dry_run: bool,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(Arc::new(HostFs))
    }
}

impl Reconciler {
    pub fn new(fs: Arc<dyn PolicyFs>) -> Self {
        Self { fs, dry_run: false }
    }

    /// Inspect and count drift without changing anything.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Inspect an entry without following symlinks.
    pub fn inspect(&self, path: &Path) -> Result<EntryStat, WatchError> {
        self.fs.stat(path).map_err(|source| WatchError::Inspect {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Bring one entry into compliance.
    ///
    /// Returns `Ok(true)` if the owner or mode was changed. An ownership
    /// failure is returned immediately; the mode is left untouched in that
    /// case. Symlinks are never altered.
    pub fn enforce_entry(&self, spec: &WatchSpec, path: &Path) -> Result<bool, WatchError> {
        let stat = self.inspect(path)?;
        self.enforce_stat(spec, path, stat)
    }

    /// Whether an entry already matches the policy. Symlinks always do.
    pub fn complies(spec: &WatchSpec, stat: &EntryStat) -> bool {
        stat.kind == EntryKind::Symlink
            || (stat.uid == spec.uid
                && stat.gid == spec.gid
                && stat.mode & 0o777 == spec.target_mode(stat.is_dir()) & 0o777)
    }

    /// Same as [`enforce_entry`](Self::enforce_entry) with a stat already in hand.
    pub fn enforce_stat(
        &self,
        spec: &WatchSpec,
        path: &Path,
        stat: EntryStat,
    ) -> Result<bool, WatchError> {
        if stat.kind == EntryKind::Symlink {
            return Ok(false);
        }

        let mut changed = false;

        // Owner first, so the mode never applies to the wrong owner.
        if stat.uid != spec.uid || stat.gid != spec.gid {
            if !self.dry_run {
                self.fs
                    .chown(path, spec.uid, spec.gid)
                    .map_err(|source| WatchError::Chown {
                        path: path.to_path_buf(),
                        uid: spec.uid,
                        gid: spec.gid,
                        source,
                    })?;
            }
            crate::debug_event!(
                "reconcile",
                "ownership set",
                "{} {}:{} -> {}:{}",
                path.display(),
                stat.uid,
                stat.gid,
                spec.uid,
                spec.gid
            );
            changed = true;
        }

        let target = spec.target_mode(stat.is_dir()) & 0o777;
        let current = stat.mode & 0o777;
        if current != target {
            if !self.dry_run {
                self.fs
                    .chmod(path, target)
                    .map_err(|source| WatchError::Chmod {
                        path: path.to_path_buf(),
                        mode: target,
                        source,
                    })?;
            }
            crate::debug_event!(
                "reconcile",
                "permissions set",
                "{} {current:o} -> {target:o}",
                path.display()
            );
            changed = true;
        }

        Ok(changed)
    }

    /// Reconcile every matched entry under the spec root, root included.
    ///
    /// Entry errors are logged and counted, never fatal. Cancellation is
    /// checked between entries.
    pub fn enforce_tree(
        &self,
        spec: &WatchSpec,
        matcher: &PathMatcher,
        cancel: &CancellationToken,
    ) -> ReconciliationResult {
        self.walk(spec, matcher, cancel, |path, stat| {
            self.enforce_stat(spec, path, stat)
        })
    }

    /// Visit every matched entry under the spec root with an explicit stack.
    ///
    /// The root is always visited. Below it, files are visited when
    /// [`PathMatcher::should_process`] holds; a directory rejected by
    /// [`PathMatcher::should_descend`] is skipped together with its whole
    /// subtree, any other directory is traversed and visited when it passes
    /// `should_process`. Non-recursive specs stop at the root's children.
    /// Each visited entry is tallied exactly once.
    pub fn walk<F>(
        &self,
        spec: &WatchSpec,
        matcher: &PathMatcher,
        cancel: &CancellationToken,
        mut visit: F,
    ) -> ReconciliationResult
    where
        F: FnMut(&Path, EntryStat) -> Result<bool, WatchError>,
    {
        let mut result = ReconciliationResult::default();
        let mut stack: Vec<(PathBuf, usize)> = vec![(spec.path.clone(), 0)];

        while let Some((path, depth)) = stack.pop() {
            if cancel.is_cancelled() {
                crate::debug_event!("reconcile", "walk cancelled", "{}", spec.path.display());
                break;
            }

            let is_root = depth == 0;
            let stat = match self.inspect(&path) {
                Ok(stat) => stat,
                Err(e) => {
                    result.record(&path, Err(e));
                    continue;
                }
            };

            match stat.kind {
                // Never followed, never visited, but tallied like any other
                // unchanged entry.
                EntryKind::Symlink => {
                    if is_root || matcher.should_process(&path) {
                        result.record(&path, Ok(false));
                    }
                }
                EntryKind::Dir => {
                    if !is_root && !matcher.should_descend(&path) {
                        crate::debug_event!("reconcile", "skip subtree", "{}", path.display());
                        continue;
                    }

                    let mut outcome = (is_root || matcher.should_process(&path))
                        .then(|| visit(&path, stat));

                    if is_root || spec.recursive {
                        match self.fs.read_dir(&path) {
                            Ok(mut children) => {
                                children.sort();
                                stack.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
                            }
                            Err(source) => {
                                outcome = Some(Err(WatchError::ListDir {
                                    path: path.clone(),
                                    source,
                                }));
                            }
                        }
                    }

                    if let Some(outcome) = outcome {
                        result.record(&path, outcome);
                    }
                }
                EntryKind::File | EntryKind::Other => {
                    if is_root || matcher.should_process(&path) {
                        result.record(&path, visit(&path, stat));
                    }
                }
            }
        }

        result
    }
}
