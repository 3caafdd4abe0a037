//! Routes pipeline events to single-entry corrections.

use std::io;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use super::pipeline::{Delivery, PipelineReceiver};
use super::{Event, OpKind, ReconciliationResult, Reconciler, WatchError};

/// Upper bound on events handled per blocking batch.
const MAX_BATCH: usize = 64;

/// Decide and apply the correction for one event.
///
/// Returns `None` when the event needs no correction: removals, entries that
/// vanished before they could be inspected, and poll checks whose entry kind
/// changed since the check was emitted.
pub fn handle_event(reconciler: &Reconciler, event: &Event) -> Option<Result<bool, WatchError>> {
    let path = event.path.as_path();

    let wants_dir = match event.kind {
        OpKind::Remove => {
            crate::debug_event!("router", "removed", "{}", path.display());
            return None;
        }
        OpKind::Create | OpKind::Write | OpKind::Rename | OpKind::AttrChange => None,
        OpKind::PollCheckFile => Some(false),
        OpKind::PollCheckDir => Some(true),
    };

    let stat = match reconciler.inspect(path) {
        Ok(stat) => stat,
        Err(WatchError::Inspect { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            crate::debug_event!("router", "vanished", "{} {}", event.kind, path.display());
            return None;
        }
        Err(e) => return Some(Err(e)),
    };

    if wants_dir.is_some_and(|wants_dir| wants_dir != stat.is_dir()) {
        return None;
    }

    crate::debug_event!("router", "event", "{} {}", event.kind, path.display());
    Some(reconciler.enforce_stat(&event.spec, path, stat))
}

/// Apply a batch of events, stopping early on cancellation.
pub fn handle_batch(
    reconciler: &Reconciler,
    events: &[Event],
    cancel: &CancellationToken,
) -> ReconciliationResult {
    let mut result = ReconciliationResult::default();
    for event in events {
        if cancel.is_cancelled() {
            break;
        }
        if let Some(outcome) = handle_event(reconciler, event) {
            result.record(&event.path, outcome);
        }
    }
    result
}

/// Consume a worker's pipeline until cancellation or until every producer
/// is gone.
///
/// Events already queued are drained into batches so one aggregate record is
/// logged per batch instead of per event.
pub async fn run(
    root: &Path,
    reconciler: Reconciler,
    mut rx: PipelineReceiver,
    cancel: CancellationToken,
) {
    while let Some(delivery) = rx.next(&cancel).await {
        match delivery {
            Delivery::Error(e) => {
                tracing::error!(path = %root.display(), "[watcher] watcher error: {e}");
            }
            Delivery::Event(first) => {
                let mut batch = vec![first];
                while batch.len() < MAX_BATCH {
                    match rx.try_next_event() {
                        Some(event) => batch.push(event),
                        None => break,
                    }
                }

                let reconciler = reconciler.clone();
                let batch_cancel = cancel.clone();
                let handled = tokio::task::spawn_blocking(move || {
                    handle_batch(&reconciler, &batch, &batch_cancel)
                })
                .await;

                match handled {
                    Ok(result) => result.log(root, "event"),
                    Err(e) => tracing::error!("[router] correction task failed: {e}"),
                }
            }
        }
    }

    crate::debug_event!("router", "stopped", "{}", root.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::WatchSpec;
    use crate::watcher::fs::MemoryFs;
    use crate::watcher::pipeline::pipeline;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn spec() -> Arc<WatchSpec> {
        Arc::new(WatchSpec::new("/d", 1000, 1000, 0o644, 0o755))
    }

    fn event(path: &str, kind: OpKind) -> Event {
        Event::new(PathBuf::from(path), kind, spec())
    }

    #[test]
    fn test_create_event_fixes_foreign_file() {
        let fs = MemoryFs::new();
        fs.add_dir("/d", 1000, 1000, 0o755)
            .add_file("/d/x.txt", 0, 0, 0o777);
        let fs = Arc::new(fs);
        let reconciler = Reconciler::new(fs.clone());

        let result = handle_batch(
            &reconciler,
            &[event("/d/x.txt", OpKind::Create)],
            &CancellationToken::new(),
        );

        assert_eq!(result.fixed, 1);
        let stat = fs.get("/d/x.txt").unwrap();
        assert_eq!((stat.uid, stat.gid, stat.mode), (1000, 1000, 0o644));
    }

    #[test]
    fn test_remove_and_vanished_are_ignored() {
        let fs = Arc::new(MemoryFs::new());
        let reconciler = Reconciler::new(fs);

        assert!(handle_event(&reconciler, &event("/d/gone", OpKind::Remove)).is_none());
        assert!(handle_event(&reconciler, &event("/d/gone", OpKind::Write)).is_none());
    }

    #[test]
    fn test_poll_checks_respect_entry_kind() {
        let fs = MemoryFs::new();
        fs.add_dir("/d/sub", 0, 0, 0o700)
            .add_file("/d/f", 0, 0, 0o600);
        let reconciler = Reconciler::new(Arc::new(fs));

        assert!(handle_event(&reconciler, &event("/d/sub", OpKind::PollCheckFile)).is_none());
        assert!(handle_event(&reconciler, &event("/d/f", OpKind::PollCheckDir)).is_none());
        assert!(matches!(
            handle_event(&reconciler, &event("/d/sub", OpKind::PollCheckDir)),
            Some(Ok(true))
        ));
        assert!(matches!(
            handle_event(&reconciler, &event("/d/f", OpKind::PollCheckFile)),
            Some(Ok(true))
        ));
    }

    #[test]
    fn test_inspection_error_is_reported() {
        let fs = MemoryFs::new();
        fs.add_file("/d/bad", 0, 0, 0o600);
        fs.fail_stat("/d/bad");
        let reconciler = Reconciler::new(Arc::new(fs));

        let result = handle_batch(
            &reconciler,
            &[event("/d/bad", OpKind::Write)],
            &CancellationToken::new(),
        );
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn test_run_drains_until_producers_close() {
        let fs = MemoryFs::new();
        fs.add_file("/d/a", 0, 0, 0o777).add_file("/d/b", 0, 0, 0o777);
        let fs = Arc::new(fs);
        let (tx, rx) = pipeline();

        tx.push(event("/d/a", OpKind::Create));
        tx.push(event("/d/b", OpKind::Write));
        drop(tx);

        run(
            Path::new("/d"),
            Reconciler::new(fs.clone()),
            rx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(fs.get("/d/a").unwrap().uid, 1000);
        assert_eq!(fs.get("/d/b").unwrap().mode, 0o644);
    }

    #[tokio::test]
    async fn test_run_makes_no_corrections_after_cancel() {
        let fs = MemoryFs::new();
        fs.add_file("/d/a", 0, 0, 0o777);
        let fs = Arc::new(fs);
        let (tx, rx) = pipeline();
        let cancel = CancellationToken::new();

        tx.push(event("/d/a", OpKind::Create));
        cancel.cancel();

        run(Path::new("/d"), Reconciler::new(fs.clone()), rx, cancel).await;

        assert_eq!(fs.chown_calls(), 0);
        drop(tx);
    }
}
