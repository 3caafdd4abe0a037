//! Continuous ownership and permission enforcement for directory trees.
//!
//! Each configured folder is watched for changes and periodically swept;
//! any entry whose owner or mode drifts from the folder's policy is
//! corrected. See [`watcher`] for the engine and [`config`] for how
//! policies are declared.

pub mod cli;
pub mod config;
#[cfg(feature = "http-server")]
pub mod health;
pub mod layout;
pub mod logging;
pub mod watcher;

pub use config::{ConfigError, FolderConfig, LoggingConfig, Settings};
pub use layout::{LayoutKind, TrashGuidesConfig};
pub use watcher::{
    PathMatcher, PollStrategy, ReconciliationResult, Reconciler, Supervisor, SupervisorOptions,
    WatchError, WatchSpec, WorkerState,
};
