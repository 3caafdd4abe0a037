//! Owns every worker and coordinates their shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::poller::PollStrategy;
use super::source::{SourceFactory, notify_factory};
use super::worker::{StateHandle, Worker, WorkerOptions, WorkerState};
use super::{Reconciler, WatchSpec};

/// Runtime knobs for a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Period of each worker's full-tree pass. Zero disables polling.
    pub poll_interval: Duration,
    pub poll_strategy: PollStrategy,
    /// Upper bound on how long [`Supervisor::shutdown`] waits for workers.
    pub shutdown_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            poll_strategy: PollStrategy::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl SupervisorOptions {
    fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            poll_interval: self.poll_interval,
            poll_strategy: self.poll_strategy,
        }
    }
}

/// Starts one [`Worker`] per spec and stops them all on shutdown.
///
/// A single cancellation token is broadcast to every worker.
pub struct Supervisor {
    specs: Vec<Arc<WatchSpec>>,
    options: SupervisorOptions,
    reconciler: Reconciler,
    source_factory: SourceFactory,
    cancel: CancellationToken,
    states: Vec<(PathBuf, StateHandle)>,
    workers: JoinSet<()>,
    started: bool,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("specs", &self.specs.len())
            .field("options", &self.options)
            .field("reconciler", &self.reconciler)
            .field("workers", &self.workers.len())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(specs: Vec<WatchSpec>, options: SupervisorOptions) -> Self {
        Self {
            specs: specs.into_iter().map(Arc::new).collect(),
            options,
            reconciler: Reconciler::default(),
            source_factory: notify_factory(),
            cancel: CancellationToken::new(),
            states: Vec::new(),
            workers: JoinSet::new(),
            started: false,
        }
    }

    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_source_factory(mut self, factory: SourceFactory) -> Self {
        self.source_factory = factory;
        self
    }

    /// Token observed by every worker. Cancelling it starts shutdown without
    /// waiting; use [`Supervisor::shutdown`] to wait.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn one worker per spec. Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.started {
            tracing::warn!("[supervisor] already started");
            return;
        }
        self.started = true;

        for spec in &self.specs {
            let worker = Worker::new(
                spec.clone(),
                self.reconciler.clone(),
                self.options.worker_options(),
                self.cancel.clone(),
            );
            self.states.push((spec.path.clone(), worker.state_handle()));

            let source = (self.source_factory)();
            self.workers.spawn(worker.run(source));
        }

        crate::log_event!(
            "supervisor",
            "started",
            "{} workers (poll every {}, {:?}{})",
            self.specs.len(),
            humantime_serde::re::humantime::format_duration(self.options.poll_interval),
            self.options.poll_strategy,
            if self.reconciler.is_dry_run() { ", dry run" } else { "" }
        );
    }

    /// Current state of every started worker, in spec order.
    pub fn states(&self) -> Vec<(PathBuf, WorkerState)> {
        self.states
            .iter()
            .map(|(path, state)| (path.clone(), *state.lock()))
            .collect()
    }

    /// Cancel every worker and wait up to the configured grace period.
    ///
    /// Returns `false` when the grace period elapsed; remaining workers are
    /// aborted and the timeout is logged, never escalated.
    pub async fn shutdown(mut self) -> bool {
        crate::log_event!("supervisor", "shutting down", "{} workers", self.workers.len());
        self.cancel.cancel();

        let grace = self.options.shutdown_grace;
        let workers = &mut self.workers;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("[supervisor] worker failed: {e}");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                crate::log_event!("supervisor", "stopped", "all workers exited");
                true
            }
            Err(_) => {
                tracing::warn!(
                    "[supervisor] {} workers still running after {}, aborting",
                    self.workers.len(),
                    humantime_serde::re::humantime::format_duration(grace)
                );
                self.workers.abort_all();
                false
            }
        }
    }
}
