//! Normalized change events.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notify::EventKind;
use notify::event::{AccessKind, AccessMode, ModifyKind};

use super::WatchSpec;

/// What happened to a path.
///
/// The first five kinds come from the notification source, the `PollCheck*`
/// kinds are synthesized by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Create,
    Write,
    Remove,
    Rename,
    AttrChange,
    PollCheckFile,
    PollCheckDir,
}

impl OpKind {
    /// Map a raw `notify` event kind.
    ///
    /// Returns `None` for kinds that never require a correction (plain
    /// reads, opaque `Any`/`Other` notifications).
    pub fn from_notify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(OpKind::Create),
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(OpKind::AttrChange),
            EventKind::Modify(ModifyKind::Name(_)) => Some(OpKind::Rename),
            EventKind::Modify(_) => Some(OpKind::Write),
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(OpKind::Write),
            EventKind::Remove(_) => Some(OpKind::Remove),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Create => "CREATE",
            OpKind::Write => "WRITE",
            OpKind::Remove => "REMOVE",
            OpKind::Rename => "RENAME",
            OpKind::AttrChange => "CHMOD",
            OpKind::PollCheckFile => "POLL_CHECK",
            OpKind::PollCheckDir => "POLL_CHECK_DIR",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed or synthesized change, bound to the spec that owns the path.
#[derive(Debug, Clone)]
pub struct Event {
    pub path: PathBuf,
    pub kind: OpKind,
    pub spec: Arc<WatchSpec>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(path: PathBuf, kind: OpKind, spec: Arc<WatchSpec>) -> Self {
        Self {
            path,
            kind,
            spec,
            timestamp: Utc::now(),
        }
    }
}
