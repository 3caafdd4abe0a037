//! Periodic full-tree reconciliation.
//!
//! Notifications can be coalesced or lost, and pipeline overflow drops
//! events on purpose. The poller re-derives every missed correction on a
//! fixed interval, which is what makes enforcement converge.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::pipeline::PipelineSender;
use super::{Event, OpKind, PathMatcher, Reconciler, WatchSpec};

/// How a poll tick is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStrategy {
    /// Run the full tree pass directly on the poller task.
    #[default]
    Sweep,
    /// Emit one `PollCheckFile`/`PollCheckDir` event per drifted entry into
    /// the worker pipeline, handled by the same router as notifications.
    Events,
}

/// Periodic trigger for one spec.
#[derive(Debug, Clone)]
pub struct Poller {
    spec: Arc<WatchSpec>,
    matcher: Arc<PathMatcher>,
    reconciler: Reconciler,
    interval: Duration,
    strategy: PollStrategy,
}

impl Poller {
    pub fn new(
        spec: Arc<WatchSpec>,
        matcher: Arc<PathMatcher>,
        reconciler: Reconciler,
        interval: Duration,
        strategy: PollStrategy,
    ) -> Self {
        Self {
            spec,
            matcher,
            reconciler,
            interval,
            strategy,
        }
    }

    /// Tick until cancelled. The first tick fires one interval from now,
    /// since the worker has just completed its initial pass.
    pub async fn run(self, tx: PipelineSender, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        crate::log_event!(
            "poller",
            "started",
            "{} every {} ({:?})",
            self.spec.path.display(),
            humantime_serde::re::humantime::format_duration(self.interval),
            self.strategy
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick(&tx, &cancel).await,
            }
        }

        crate::debug_event!("poller", "stopped", "{}", self.spec.path.display());
    }

    async fn tick(&self, tx: &PipelineSender, cancel: &CancellationToken) {
        crate::debug_event!("poller", "running periodic enforcement", "{}", self.spec.path.display());

        let this = self.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();

        let joined = tokio::task::spawn_blocking(move || match this.strategy {
            PollStrategy::Sweep => {
                let result = this.reconciler.enforce_tree(&this.spec, &this.matcher, &cancel);
                result.log(&this.spec.path, "periodic");
            }
            PollStrategy::Events => {
                let emitted = this.emit_checks(&tx, &cancel);
                crate::debug_event!(
                    "poller",
                    "emitted checks",
                    "{emitted} for {}",
                    this.spec.path.display()
                );
            }
        })
        .await;

        if let Err(e) = joined {
            tracing::error!("[poller] periodic pass failed: {e}");
        }
    }

    /// Push one poll-check event per matched entry that has drifted.
    ///
    /// Compliant entries are left out, so each tick only carries what is
    /// still wrong and entries dropped on overflow come back on the next
    /// tick ahead of a shrinking backlog. Returns the number of events
    /// emitted.
    pub fn emit_checks(&self, tx: &PipelineSender, cancel: &CancellationToken) -> usize {
        let mut emitted = 0;
        self.reconciler
            .walk(&self.spec, &self.matcher, cancel, |path, stat| {
                if Reconciler::complies(&self.spec, &stat) {
                    return Ok(false);
                }
                let kind = if stat.is_dir() {
                    OpKind::PollCheckDir
                } else {
                    OpKind::PollCheckFile
                };
                tx.push(Event::new(path.to_path_buf(), kind, self.spec.clone()));
                emitted += 1;
                Ok(false)
            });
        emitted
    }
}
