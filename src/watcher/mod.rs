//! Watch-and-reconcile engine.
//!
//! Each configured directory gets a [`Worker`] that keeps its tree converged
//! on a declared owner and mode. Changes arrive from a
//! [`NotificationSource`]; a periodic [`Poller`] pass re-derives whatever the
//! notifications missed.
//!
//! # Architecture
//!
//! ```text
//! Supervisor
//!   +-- Worker (one per WatchSpec)
//!         - NotificationSource -> PathMatcher -> pipeline (100 events, 10 errors)
//!         - Poller (interval, cancel-aware)
//!         - router -> Reconciler -> PolicyFs
//! ```
//!
//! Overflowing the pipeline drops the event with a warning. The next poll
//! pass makes up for it, so enforcement converges even when notifications
//! are lost.

mod error;
mod event;
mod fs;
mod matcher;
mod pipeline;
mod poller;
mod reconciler;
mod router;
mod source;
mod spec;
mod supervisor;
mod worker;

pub use error::WatchError;
pub use event::{Event, OpKind};
pub use fs::{EntryKind, EntryStat, HostFs, PolicyFs};
pub use matcher::{PathMatcher, should_descend, should_process};
pub use pipeline::{
    Delivery, ERROR_CAPACITY, EVENT_CAPACITY, PipelineReceiver, PipelineSender, pipeline,
    pipeline_with_capacity,
};
pub use poller::{PollStrategy, Poller};
pub use reconciler::{ReconciliationResult, Reconciler};
pub use router::{handle_batch, handle_event};
pub use source::{
    NotificationSource, NotifySource, SourceFactory, SourceItem, notify_factory, register_tree,
};
pub use spec::WatchSpec;
pub use supervisor::{Supervisor, SupervisorOptions};
pub use worker::{StateHandle, Worker, WorkerOptions, WorkerState};
