//! Change notifications from the operating system.
//!
//! The core only needs [`NotificationSource`]: register a directory, then
//! receive `(path, kind)` changes and transport errors. [`NotifySource`]
//! implements it over `notify::RecommendedWatcher` (inotify, FSEvents, ...).
//! The source may coalesce or lose events; periodic sweeps cover the gaps.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, error::TrySendError};
use walkdir::WalkDir;

use super::{OpKind, PathMatcher, WatchError, WatchSpec};

/// Capacity of the raw channel between the OS callback and the worker.
pub const RAW_CAPACITY: usize = 1024;

/// One item delivered by a notification source.
#[derive(Debug)]
pub enum SourceItem {
    Change { path: PathBuf, kind: OpKind },
    Error(WatchError),
}

/// Low-latency change notifications for registered directories.
///
/// Dropping a source releases all of its registrations.
#[async_trait]
pub trait NotificationSource: Send {
    /// Start receiving changes for the direct children of `path`.
    fn register(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Next change or transport error, `None` once the source is closed.
    async fn recv(&mut self) -> Option<SourceItem>;
}

/// Creates one notification source per worker.
pub type SourceFactory =
    Arc<dyn Fn() -> Result<Box<dyn NotificationSource>, WatchError> + Send + Sync>;

/// Factory for the OS-backed source.
pub fn notify_factory() -> SourceFactory {
    Arc::new(|| Ok(Box::new(NotifySource::new()?) as Box<dyn NotificationSource>))
}

/// [`NotificationSource`] backed by the `notify` crate.
pub struct NotifySource {
    watcher: notify::RecommendedWatcher,
    event_rx: mpsc::Receiver<notify::Event>,
    error_rx: mpsc::Receiver<notify::Error>,
    pending: VecDeque<SourceItem>,
}

impl std::fmt::Debug for NotifySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifySource")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl NotifySource {
    pub fn new() -> Result<Self, WatchError> {
        let (event_tx, event_rx) = mpsc::channel(RAW_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(RAW_CAPACITY);

        // The callback runs on notify's own thread and must never block it.
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let full = match res {
                Ok(event) => matches!(event_tx.try_send(event), Err(TrySendError::Full(_))),
                Err(e) => matches!(error_tx.try_send(e), Err(TrySendError::Full(_))),
            };
            if full {
                tracing::debug!("[source] raw notification channel full, dropping");
            }
        })?;

        Ok(Self {
            watcher,
            event_rx,
            error_rx,
            pending: VecDeque::new(),
        })
    }

    fn enqueue(&mut self, event: notify::Event) {
        let Some(kind) = OpKind::from_notify(&event.kind) else {
            crate::debug_event!("source", "ignored", "{:?}", event.kind);
            return;
        };
        self.pending.extend(
            event
                .paths
                .into_iter()
                .map(|path| SourceItem::Change { path, kind }),
        );
    }
}

#[async_trait]
impl NotificationSource for NotifySource {
    fn register(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    async fn recv(&mut self) -> Option<SourceItem> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }

            tokio::select! {
                Some(event) = self.event_rx.recv() => self.enqueue(event),
                Some(error) = self.error_rx.recv() => {
                    return Some(SourceItem::Error(WatchError::EventError {
                        details: error.to_string(),
                    }));
                }
                else => return None,
            }
        }
    }
}

/// Register `root` and, for recursive specs, every subdirectory that passes
/// [`PathMatcher::should_descend`]. Excluded subtrees are never entered.
///
/// Failing to register `root` is an error; failures below it are logged and
/// skipped. Returns the number of registered directories.
pub fn register_tree(
    source: &mut dyn NotificationSource,
    root: &Path,
    spec: &WatchSpec,
    matcher: &PathMatcher,
) -> Result<usize, WatchError> {
    source.register(root)?;
    let mut registered = 1;

    if !spec.recursive {
        return Ok(registered);
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !e.file_type().is_dir() || matcher.should_descend(e.path()));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_dir() => match source.register(entry.path()) {
                Ok(()) => registered += 1,
                Err(e) => {
                    tracing::warn!("[source] failed to add watch for subdirectory: {e}");
                }
            },
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("[source] error walking {} for watches: {e}", root.display());
            }
        }
    }

    Ok(registered)
}

#[cfg(test)]
pub(crate) use scripted::{ScriptHandle, ScriptedSource};


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_tree_skips_excluded_subtrees() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("movies/extras")).unwrap();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::write(root.join("movies/a.mkv"), "x").unwrap();

        let spec = WatchSpec::new(root, 1000, 1000, 0o644, 0o755).with_exclude([".git"]);
        let matcher = PathMatcher::from_spec(&spec);
        let (mut source, handle) = ScriptedSource::new();

        let count = register_tree(&mut source, root, &spec, &matcher).unwrap();
        assert_eq!(count, 3);

        let registered = handle.registered.lock().clone();
        assert!(registered.contains(&root.join("movies/extras")));
        assert!(!registered.iter().any(|p| p.starts_with(root.join(".git"))));
    }

    #[test]
    fn test_register_tree_non_recursive_only_root() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();

        let spec = WatchSpec::new(temp.path(), 1000, 1000, 0o644, 0o755).with_recursive(false);
        let matcher = PathMatcher::from_spec(&spec);
        let (mut source, _handle) = ScriptedSource::new();

        assert_eq!(
            register_tree(&mut source, temp.path(), &spec, &matcher).unwrap(),
            1
        );
    }

    #[test]
    fn test_register_tree_root_failure_is_error() {
        let temp = TempDir::new().unwrap();
        let spec = WatchSpec::new(temp.path(), 1000, 1000, 0o644, 0o755);
        let matcher = PathMatcher::from_spec(&spec);
        let (mut source, _handle) = ScriptedSource::failing();

        assert!(register_tree(&mut source, temp.path(), &spec, &matcher).is_err());
    }

    #[tokio::test]
    async fn test_notify_source_delivers_create() {
        let temp = TempDir::new().unwrap();
        let mut source = NotifySource::new().unwrap();
        source.register(temp.path()).unwrap();

        let file = temp.path().join("new.txt");
        std::fs::write(&file, "x").unwrap();

        let delivered = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(item) = source.recv().await {
                if let SourceItem::Change { path, kind } = item {
                    if path == file && kind == OpKind::Create {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        assert!(delivered, "expected a Create notification for {}", file.display());
    }
}
