//! Bounded, lossy event pipeline between producers and the router.
//!
//! Producers (the notification loop and the poller) never block: a push into
//! a full queue drops the new item and logs a warning. The next poll sweep
//! re-derives whatever correction the dropped event would have caused.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::{Event, WatchError};

/// Capacity of the event queue.
pub const EVENT_CAPACITY: usize = 100;
/// Capacity of the error queue.
pub const ERROR_CAPACITY: usize = 10;

/// Create a pipeline with the default capacities.
pub fn pipeline() -> (PipelineSender, PipelineReceiver) {
    pipeline_with_capacity(EVENT_CAPACITY, ERROR_CAPACITY)
}

/// Create a pipeline with explicit capacities.
pub fn pipeline_with_capacity(
    events: usize,
    errors: usize,
) -> (PipelineSender, PipelineReceiver) {
    let (event_tx, event_rx) = mpsc::channel(events);
    let (error_tx, error_rx) = mpsc::channel(errors);
    let dropped = Arc::new(AtomicU64::new(0));

    (
        PipelineSender {
            events: event_tx,
            errors: error_tx,
            dropped: dropped.clone(),
        },
        PipelineReceiver {
            events: event_rx,
            errors: error_rx,
            events_closed: false,
            errors_closed: false,
            dropped,
        },
    )
}

/// Item handed to the consumer.
#[derive(Debug)]
pub enum Delivery {
    Event(Event),
    Error(WatchError),
}

/// Producer half. Cheap to clone, one clone per producer task.
#[derive(Debug, Clone)]
pub struct PipelineSender {
    events: mpsc::Sender<Event>,
    errors: mpsc::Sender<WatchError>,
    dropped: Arc<AtomicU64>,
}

impl PipelineSender {
    /// Non-blocking push. Returns `false` if the event was dropped.
    pub fn push(&self, event: Event) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    path = %event.path.display(),
                    op = %event.kind,
                    dropped_total = total,
                    "[pipeline] event queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                crate::debug_event!("pipeline", "closed", "discarding {}", event.path.display());
                false
            }
        }
    }

    /// Non-blocking push of a transport error. Returns `false` if dropped.
    pub fn push_error(&self, error: WatchError) -> bool {
        match self.errors.try_send(error) {
            Ok(()) => true,
            Err(TrySendError::Full(error)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!("[pipeline] error queue full, dropping error: {error}");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Number of items dropped so far because a queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the consumer half is gone.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Consumer half. Exactly one per pipeline.
#[derive(Debug)]
pub struct PipelineReceiver {
    events: mpsc::Receiver<Event>,
    errors: mpsc::Receiver<WatchError>,
    events_closed: bool,
    errors_closed: bool,
    dropped: Arc<AtomicU64>,
}

impl PipelineReceiver {
    /// Wait for the next event or error.
    ///
    /// Returns `None` when cancellation is observed or when every sender is
    /// gone and both queues are drained. Cancellation takes priority over
    /// queued items.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<Delivery> {
        while !(self.events_closed && self.errors_closed) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                event = self.events.recv(), if !self.events_closed => match event {
                    Some(event) => return Some(Delivery::Event(event)),
                    None => self.events_closed = true,
                },
                error = self.errors.recv(), if !self.errors_closed => match error {
                    Some(error) => return Some(Delivery::Error(error)),
                    None => self.errors_closed = true,
                },
            }
        }
        None
    }

    /// Take an already-queued event without waiting.
    pub fn try_next_event(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of items dropped so far because a queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
