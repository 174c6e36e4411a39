//! Typed, in-process publish/subscribe event bus (`spec.md` §4.1).
//!
//! Delivery to a single subscriber is synchronous and order-preserving, but
//! a slow subscriber must never block `publish`: each subscriber owns a
//! bounded queue served by its own background task, with drop-oldest
//! semantics on overflow. The bus is never a process-wide singleton — it
//! must be constructible as many times as a test needs (`spec.md` §9).

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;
use xlt_protocol::types::{BackupId, InstanceId, WorkerId};

/// Well-known events the core actually publishes, per `spec.md` §4 and the
/// "heterogeneous event data" Design Note in §9. Free-form key/value data
/// is reserved for the security auditor only (`xlt_security::audit`), never
/// for these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    WorkerPaired { worker_id: WorkerId },
    WorkerUnpaired { worker_id: WorkerId },
    WorkerOnline { worker_id: WorkerId },
    WorkerOffline { worker_id: WorkerId },
    VersionChecked { worker_id: WorkerId, up_to_date: bool },
    DegradedModeEntered { component_id: String },
    DegradedModeExited { component_id: String },
    AllFallbacksFailed { component_id: String, primary_error: String },
    CircuitOpened { component_id: String },
    CircuitClosed { component_id: String },
    InstanceCooldown { instance_id: InstanceId, worker_id: WorkerId },
    UpdateRolledBack { worker_id: WorkerId, backup_id: BackupId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WorkerPaired,
    WorkerUnpaired,
    WorkerOnline,
    WorkerOffline,
    VersionChecked,
    DegradedModeEntered,
    DegradedModeExited,
    AllFallbacksFailed,
    CircuitOpened,
    CircuitClosed,
    InstanceCooldown,
    UpdateRolledBack,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::WorkerPaired { .. } => EventKind::WorkerPaired,
            EventPayload::WorkerUnpaired { .. } => EventKind::WorkerUnpaired,
            EventPayload::WorkerOnline { .. } => EventKind::WorkerOnline,
            EventPayload::WorkerOffline { .. } => EventKind::WorkerOffline,
            EventPayload::VersionChecked { .. } => EventKind::VersionChecked,
            EventPayload::DegradedModeEntered { .. } => EventKind::DegradedModeEntered,
            EventPayload::DegradedModeExited { .. } => EventKind::DegradedModeExited,
            EventPayload::AllFallbacksFailed { .. } => EventKind::AllFallbacksFailed,
            EventPayload::CircuitOpened { .. } => EventKind::CircuitOpened,
            EventPayload::CircuitClosed { .. } => EventKind::CircuitClosed,
            EventPayload::InstanceCooldown { .. } => EventKind::InstanceCooldown,
            EventPayload::UpdateRolledBack { .. } => EventKind::UpdateRolledBack,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            message: message.into(),
            payload,
        }
    }
}

pub type Handler = Arc<dyn Fn(Event) + Send + Sync + 'static>;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

struct SubscriberQueue {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self { queue: Mutex::new(VecDeque::new()), notify: Notify::new(), capacity })
    }

    fn push(&self, event: Event) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            warn!("event subscriber queue full, dropped oldest event");
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Event {
        loop {
            if let Some(event) = self.queue.lock().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

enum Filter {
    All,
    Kind(EventKind),
}

struct Subscription {
    filter: Filter,
    queue: Arc<SubscriberQueue>,
}

/// Typed, non-blocking, in-process publish/subscribe bus.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscriptions: Mutex::new(Vec::new()) }
    }

    fn register(&self, filter: Filter, handler: Handler) {
        let queue = SubscriberQueue::new(SUBSCRIBER_QUEUE_CAPACITY);
        let worker_queue = queue.clone();
        tokio::spawn(async move {
            loop {
                let event = worker_queue.pop().await;
                handler(event);
            }
        });
        self.subscriptions.lock().push(Subscription { filter, queue });
    }

    /// Subscribe to every event of one kind.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) {
        self.register(Filter::Kind(kind), handler);
    }

    /// Subscribe to every event published on this bus.
    pub fn subscribe_all(&self, handler: Handler) {
        self.register(Filter::All, handler);
    }

    /// Publish an event. Never blocks on a subscriber: delivery happens on
    /// each subscriber's own background task. A subscriber's failure (panic
    /// inside its handler) never propagates back here.
    pub fn publish(&self, event: Event) {
        let subscriptions = self.subscriptions.lock();
        for subscription in subscriptions.iter() {
            let matches = match subscription.filter {
                Filter::All => true,
                Filter::Kind(kind) => event.payload.kind() == kind,
            };
            if matches {
                subscription.queue.push(event.clone());
            }
        }
    }
}
