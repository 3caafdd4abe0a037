//! One worker per monitored directory.
//!
//! A worker moves through `Created -> Registering -> Running -> Stopping ->
//! Stopped`. While running it owns three tasks that share one pipeline:
//!
//! ```text
//! NotificationSource -> notification loop --+
//!                                           +--> pipeline --> router --> Reconciler
//!              Poller (events strategy) ----+
//! ```
//!
//! With the sweep strategy the poller reconciles directly and only the
//! notification loop produces into the pipeline.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::pipeline::{PipelineSender, pipeline};
use super::poller::{PollStrategy, Poller};
use super::router;
use super::source::{NotificationSource, SourceItem, register_tree};
use super::{Event, OpKind, PathMatcher, Reconciler, WatchError, WatchSpec};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Registering,
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Created => "created",
            WorkerState::Registering => "registering",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view of a worker's state.
pub type StateHandle = Arc<Mutex<WorkerState>>;

/// Timing shared by every worker of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Period of the full-tree pass. Zero disables polling.
    pub poll_interval: Duration,
    pub poll_strategy: PollStrategy,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            poll_strategy: PollStrategy::default(),
        }
    }
}

/// Binds one [`WatchSpec`] to its notification loop, poller and router.
#[derive(Debug)]
pub struct Worker {
    spec: Arc<WatchSpec>,
    matcher: Arc<PathMatcher>,
    reconciler: Reconciler,
    options: WorkerOptions,
    state: StateHandle,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        spec: Arc<WatchSpec>,
        reconciler: Reconciler,
        options: WorkerOptions,
        cancel: CancellationToken,
    ) -> Self {
        let matcher = Arc::new(PathMatcher::from_spec(&spec));
        Self {
            spec,
            matcher,
            reconciler,
            options,
            state: Arc::new(Mutex::new(WorkerState::Created)),
            cancel,
        }
    }

    pub fn spec(&self) -> &WatchSpec {
        &self.spec
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    fn transition(&self, next: WorkerState) {
        let mut state = self.state.lock();
        crate::debug_event!(
            "worker",
            "state",
            "{} {} -> {next}",
            self.spec.path.display(),
            *state
        );
        *state = next;
    }

    /// Drive the worker to `Stopped`.
    ///
    /// `source` is the notification source created for this worker. When it
    /// could not be created, or the root cannot be registered with it, the
    /// worker runs without notifications and relies on polling alone. A
    /// root that does not exist stops the worker right away.
    pub async fn run(self, source: Result<Box<dyn NotificationSource>, WatchError>) {
        let root = self.spec.path.clone();
        self.transition(WorkerState::Registering);
        crate::log_event!("worker", "starting", "{}", root.display());

        if let Err(e) = self.check_root() {
            tracing::warn!(path = %root.display(), "[worker] root unavailable, not watching: {e}");
            self.transition(WorkerState::Stopped);
            return;
        }

        let source = source.and_then(|mut source| {
            let registered = register_tree(source.as_mut(), &root, &self.spec, &self.matcher)?;
            crate::log_event!(
                "worker",
                "watching",
                "{registered} directories under {}",
                root.display()
            );
            Ok(source)
        });
        let source = match source {
            Ok(source) => Some(source),
            Err(e) => {
                tracing::warn!(
                    path = %root.display(),
                    "[worker] notifications disabled, relying on polling: {e}"
                );
                None
            }
        };

        if !self.cancel.is_cancelled() {
            self.initial_pass().await;
        }

        self.transition(WorkerState::Running);
        let mut tasks = self.spawn_tasks(source);

        // Wait for shutdown, or for every task to finish on its own when both
        // producers are gone.
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                joined = tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => tracing::error!("[worker] task failed: {e}"),
                    None => break,
                },
            }
        }

        self.transition(WorkerState::Stopping);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("[worker] task failed during shutdown: {e}");
            }
        }

        self.transition(WorkerState::Stopped);
        crate::log_event!("worker", "stopped", "{}", root.display());
    }

    /// Confirm the root can be inspected before anything is registered.
    fn check_root(&self) -> Result<(), WatchError> {
        match self.reconciler.inspect(&self.spec.path) {
            Ok(_) => Ok(()),
            Err(WatchError::Inspect { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Err(WatchError::MissingRoot {
                    path: self.spec.path.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn initial_pass(&self) {
        let spec = self.spec.clone();
        let matcher = self.matcher.clone();
        let reconciler = self.reconciler.clone();
        let cancel = self.cancel.clone();

        let result = tokio::task::spawn_blocking(move || {
            reconciler.enforce_tree(&spec, &matcher, &cancel)
        })
        .await;

        match result {
            Ok(result) => result.log(&self.spec.path, "initial"),
            Err(e) => tracing::error!("[worker] initial pass failed: {e}"),
        }
    }

    fn spawn_tasks(&self, source: Option<Box<dyn NotificationSource>>) -> JoinSet<()> {
        let (tx, rx) = pipeline();
        let mut tasks = JoinSet::new();

        if let Some(source) = source {
            let listener = NotificationLoop {
                spec: self.spec.clone(),
                matcher: self.matcher.clone(),
                reconciler: self.reconciler.clone(),
                tx: tx.clone(),
            };
            tasks.spawn(listener.run(source, self.cancel.clone()));
        }

        if self.options.poll_interval.is_zero() {
            crate::debug_event!("worker", "polling disabled", "{}", self.spec.path.display());
        } else {
            let poller = Poller::new(
                self.spec.clone(),
                self.matcher.clone(),
                self.reconciler.clone(),
                self.options.poll_interval,
                self.options.poll_strategy,
            );
            tasks.spawn(poller.run(tx.clone(), self.cancel.clone()));
        }

        // The router sees the pipeline close once every producer above exits.
        drop(tx);

        let root = self.spec.path.clone();
        let reconciler = self.reconciler.clone();
        let cancel = self.cancel.clone();
        tasks.spawn(async move { router::run(&root, reconciler, rx, cancel).await });

        tasks
    }
}

/// Consumes a notification source, filters and forwards into the pipeline.
struct NotificationLoop {
    spec: Arc<WatchSpec>,
    matcher: Arc<PathMatcher>,
    reconciler: Reconciler,
    tx: PipelineSender,
}

impl NotificationLoop {
    async fn run(self, mut source: Box<dyn NotificationSource>, cancel: CancellationToken) {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                item = source.recv() => item,
            };

            match item {
                Some(SourceItem::Change { path, kind }) => {
                    if kind == OpKind::Create {
                        self.watch_new_directory(source.as_mut(), &path);
                    }
                    if !self.matcher.should_process(&path) {
                        crate::debug_event!("worker", "filtered", "{kind} {}", path.display());
                        continue;
                    }
                    self.tx.push(Event::new(path, kind, self.spec.clone()));
                }
                Some(SourceItem::Error(e)) => {
                    self.tx.push_error(e);
                }
                None => {
                    tracing::warn!(
                        path = %self.spec.path.display(),
                        "[worker] notification source closed"
                    );
                    break;
                }
            }
        }

        // Tear down registrations before the rest of the worker drains.
        drop(source);
        crate::debug_event!("worker", "notifications stopped", "{}", self.spec.path.display());
    }

    /// Extend watches to a directory created below the root.
    fn watch_new_directory(&self, source: &mut dyn NotificationSource, path: &Path) {
        if !self.spec.recursive || path == self.spec.path || !self.matcher.should_descend(path) {
            return;
        }
        if !self.reconciler.inspect(path).is_ok_and(|stat| stat.is_dir()) {
            return;
        }

        match register_tree(source, path, &self.spec, &self.matcher) {
            Ok(count) => {
                crate::debug_event!("worker", "watch added", "{count} under {}", path.display());
            }
            Err(e) => tracing::warn!("[worker] failed to watch new directory: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::fs::MemoryFs;
    use crate::watcher::source::ScriptedSource;
    use std::path::PathBuf;

    async fn wait_for(what: &str, cond: impl Fn() -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    fn tree() -> Arc<MemoryFs> {
        let fs = MemoryFs::new();
        fs.add_dir("/d", 0, 0, 0o700)
            .add_file("/d/a.mkv", 0, 0, 0o600)
            .add_file("/d/a.part", 0, 0, 0o600);
        Arc::new(fs)
    }

    fn worker(fs: &Arc<MemoryFs>, poll_interval: Duration, cancel: &CancellationToken) -> Worker {
        let spec = WatchSpec::new("/d", 1000, 1000, 0o644, 0o755).with_exclude(["*.part"]);
        Worker::new(
            Arc::new(spec),
            Reconciler::new(fs.clone()),
            WorkerOptions {
                poll_interval,
                poll_strategy: PollStrategy::Sweep,
            },
            cancel.clone(),
        )
    }

    #[tokio::test]
    async fn test_lifecycle_initial_pass_then_events() {
        let fs = tree();
        let cancel = CancellationToken::new();
        let worker = worker(&fs, Duration::ZERO, &cancel);
        let state = worker.state_handle();
        assert_eq!(*state.lock(), WorkerState::Created);

        let (source, handle) = ScriptedSource::new();
        let task = tokio::spawn(worker.run(Ok(Box::new(source))));

        wait_for("running", || *state.lock() == WorkerState::Running).await;
        // Initial pass ran before Running
        assert_eq!(fs.get("/d").unwrap().mode, 0o755);
        assert_eq!(fs.get("/d/a.mkv").unwrap().uid, 1000);
        assert_eq!(fs.get("/d/a.part").unwrap().uid, 0);
        assert_eq!(handle.registered.lock().clone(), vec![PathBuf::from("/d")]);

        fs.add_file("/d/x.txt", 0, 0, 0o777);
        handle.change("/d/x.txt", OpKind::Create);
        wait_for("event correction", || fs.get("/d/x.txt").unwrap().uid == 1000).await;
        assert_eq!(fs.get("/d/x.txt").unwrap().mode, 0o644);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*state.lock(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_excluded_notifications_never_reach_pipeline() {
        let fs = tree();
        let cancel = CancellationToken::new();
        let worker = worker(&fs, Duration::ZERO, &cancel);
        let state = worker.state_handle();

        let (source, handle) = ScriptedSource::new();
        let task = tokio::spawn(worker.run(Ok(Box::new(source))));
        wait_for("running", || *state.lock() == WorkerState::Running).await;

        fs.add_file("/d/b.part", 0, 0, 0o600)
            .add_file("/d/b.mkv", 0, 0, 0o600);
        handle.change("/d/b.part", OpKind::Create);
        handle.change("/d/b.mkv", OpKind::Create);
        wait_for("allowed file", || fs.get("/d/b.mkv").unwrap().uid == 1000).await;
        assert_eq!(fs.get("/d/b.part").unwrap().uid, 0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_root_stops_without_registering() {
        let fs = Arc::new(MemoryFs::new());
        let cancel = CancellationToken::new();
        let worker = worker(&fs, Duration::from_millis(10), &cancel);
        let state = worker.state_handle();
        assert!(matches!(
            worker.check_root(),
            Err(WatchError::MissingRoot { path }) if path == Path::new("/d")
        ));

        let (source, handle) = ScriptedSource::new();
        worker.run(Ok(Box::new(source))).await;

        assert_eq!(*state.lock(), WorkerState::Stopped);
        assert!(handle.registered.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stops_on_its_own_when_producers_are_gone() {
        let fs = tree();
        let cancel = CancellationToken::new();
        let worker = worker(&fs, Duration::ZERO, &cancel);
        let state = worker.state_handle();

        let (source, handle) = ScriptedSource::new();
        let task = tokio::spawn(worker.run(Ok(Box::new(source))));
        wait_for("running", || *state.lock() == WorkerState::Running).await;

        // Source closed and polling disabled: the router drains and exits
        drop(handle);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("worker must stop without cancellation")
            .unwrap();
        assert_eq!(*state.lock(), WorkerState::Stopped);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_unreadable_root_keeps_inspect_error() {
        let fs = tree();
        fs.fail_stat("/d");
        let worker = worker(&fs, Duration::ZERO, &CancellationToken::new());
        assert!(matches!(worker.check_root(), Err(WatchError::Inspect { .. })));
    }

    #[tokio::test]
    async fn test_registration_failure_falls_back_to_polling() {
        let fs = tree();
        let cancel = CancellationToken::new();
        let worker = worker(&fs, Duration::from_millis(20), &cancel);
        let state = worker.state_handle();

        let (source, _handle) = ScriptedSource::failing();
        let task = tokio::spawn(worker.run(Ok(Box::new(source))));
        wait_for("running", || *state.lock() == WorkerState::Running).await;

        fs.add_file("/d/late.mkv", 0, 0, 0o600);
        wait_for("poll correction", || fs.get("/d/late.mkv").unwrap().uid == 1000).await;

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*state.lock(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_created_directory_gets_watched() {
        let fs = tree();
        let cancel = CancellationToken::new();
        let worker = worker(&fs, Duration::ZERO, &cancel);
        let state = worker.state_handle();

        let (source, handle) = ScriptedSource::new();
        let task = tokio::spawn(worker.run(Ok(Box::new(source))));
        wait_for("running", || *state.lock() == WorkerState::Running).await;

        fs.add_dir("/d/season1", 0, 0, 0o700);
        handle.change("/d/season1", OpKind::Create);
        wait_for("new watch", || {
            handle
                .registered
                .lock()
                .contains(&PathBuf::from("/d/season1"))
        })
        .await;
        wait_for("dir correction", || fs.get("/d/season1").unwrap().mode == 0o755).await;

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_source_creation_failure_still_runs() {
        let fs = tree();
        let cancel = CancellationToken::new();
        let worker = worker(&fs, Duration::from_millis(20), &cancel);
        let state = worker.state_handle();

        let task = tokio::spawn(worker.run(Err(WatchError::InitFailed {
            reason: "no inotify instances left".into(),
        })));
        wait_for("running", || *state.lock() == WorkerState::Running).await;

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*state.lock(), WorkerState::Stopped);
    }
}
