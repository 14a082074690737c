//! Typed event bus for download notifications.
//!
//! Publication never blocks: every subscriber owns a bounded queue, and an
//! event that does not fit is dropped for that subscriber only and counted.
//! A [`Subscription`] deregisters itself when dropped.

use crate::config::EventsConfig;
use crate::error::{FailureKind, StowageError};
use crate::source::SourceLocator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Serialisable description of why a download failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&StowageError> for FailureReport {
    fn from(err: &StowageError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Notifications published for a single source.
///
/// For one source the sequence is always `Progress*` followed by exactly one
/// of `Completed`, `Failed` or `Cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    Progress {
        source: SourceLocator,
        /// In `0.0..=1.0`.
        fraction: f64,
        bytes_written: u64,
        bytes_expected: u64,
    },
    Completed {
        source: SourceLocator,
        local_path: PathBuf,
        artifact_id: String,
    },
    Failed {
        source: SourceLocator,
        error: FailureReport,
    },
    /// The task was cancelled; `paused` is set when it was stopped via pause.
    Cancelled { source: SourceLocator, paused: bool },
}

impl DownloadEvent {
    pub fn source(&self) -> &SourceLocator {
        match self {
            DownloadEvent::Progress { source, .. }
            | DownloadEvent::Completed { source, .. }
            | DownloadEvent::Failed { source, .. }
            | DownloadEvent::Cancelled { source, .. } => source,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Progress { .. })
    }
}

struct Registration {
    sender: mpsc::Sender<DownloadEvent>,
    filter: Option<SourceLocator>,
    dropped: Arc<AtomicU64>,
}

struct BusInner {
    subscribers: Mutex<HashMap<u64, Registration>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl BusInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, Registration>> {
        // A panic while holding this lock cannot leave the map inconsistent.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner").field("buffer", &self.buffer).finish()
    }
}

/// Publish/subscribe channel for [`DownloadEvent`]s.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("buffer", &self.inner.buffer)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_buffer(EventsConfig::SUBSCRIBER_BUFFER)
    }

    /// A bus whose subscribers each buffer at most `buffer` events.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Receive every event.
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Receive only events for `source`.
    pub fn subscribe_to(&self, source: SourceLocator) -> Subscription {
        self.register(Some(source))
    }

    fn register(&self, filter: Option<SourceLocator>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.inner.buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));

        self.inner.subscribers().insert(
            id,
            Registration {
                sender,
                filter,
                dropped: dropped.clone(),
            },
        );
        debug!("Event subscriber {} registered", id);

        Subscription {
            id,
            receiver,
            dropped,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every matching subscriber without waiting.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, event: DownloadEvent) -> usize {
        let mut subscribers = self.inner.subscribers();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, registration) in subscribers.iter() {
            if let Some(filter) = &registration.filter {
                if filter != event.source() {
                    continue;
                }
            }
            match registration.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    registration.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("Event subscriber {} is full, dropping event", id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            subscribers.remove(&id);
            debug!("Pruned closed event subscriber {}", id);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

/// Registration handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<DownloadEvent>,
    dropped: Arc<AtomicU64>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<DownloadEvent> {
        self.receiver.recv().await
    }

    /// Take the next queued event, if any.
    pub fn try_recv(&mut self) -> Option<DownloadEvent> {
        self.receiver.try_recv().ok()
    }

    /// Events discarded because this subscriber's queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deregister now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers().remove(&self.id);
            debug!("Event subscriber {} released", self.id);
        }
    }
}
