use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::queue::QueueName;

/// Lifecycle transition kinds observable on the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Job admitted or promoted and visible to workers
    Ready,
    /// Job claimed by a worker
    Active,
    Completed,
    /// Terminal failure, attempts exhausted
    Failed,
    /// Failed attempt rescheduled with backoff
    Retried,
    /// Active job whose heartbeat lapsed
    Stalled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retried => "retried",
            Self::Stalled => "stalled",
        }
    }
}

/// A typed queue lifecycle event. Consumers (logging, dashboards) subscribe
/// via [`EventBus::subscribe`] without coupling to the store emitting them.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub queue: QueueName,
    pub job_id: Uuid,
    pub kind: EventKind,
    pub at: OffsetDateTime,
}

/// Broadcast channel for queue lifecycle events. Cheap to clone; slow
/// subscribers drop events rather than backpressure the stores.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, queue: QueueName, job_id: Uuid, kind: EventKind) {
        // Send only fails when no subscriber exists, which is fine
        let _ = self.tx.send(QueueEvent {
            queue,
            job_id,
            kind,
            at: OffsetDateTime::now_utc(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
