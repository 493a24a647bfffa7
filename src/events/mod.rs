//! Publish/subscribe relay for transfer lifecycle events.
//!
//! The [`EventBus`] lets any number of independent views react to uploads
//! without knowing about the queue. The main uploads list keys on
//! [`FileId`]; the attachment/update uploader keys on the owning object via
//! [`UploadEvent::owner`].
//!
//! Events are never published by hand: [`crate::state::TransferStore`] derives
//! them from its own state changes (see [`relay`]), so the store and the bus
//! cannot disagree about what happened.
//!
//! Handlers run synchronously, in registration order, outside the bus lock.
//! A handler that fails or panics is reported and skipped; the rest still run.

pub mod relay;

use crate::models::FileId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Kinds of lifecycle notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Progress,
    Failed,
    SetCancelled,
    Complete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Progress => "PROGRESS",
            EventType::Failed => "FAILED",
            EventType::SetCancelled => "SET_CANCELLED",
            EventType::Complete => "COMPLETE",
        };
        f.write_str(s)
    }
}

/// Lifecycle notification keyed by file identity and, for attachment
/// uploads, by owning object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadEvent {
    Progress {
        id: FileId,
        owner: Option<String>,
        progress: u8,
    },
    Failed {
        id: FileId,
        owner: Option<String>,
        error: String,
    },
    SetCancelled {
        id: FileId,
        owner: Option<String>,
    },
    Complete {
        id: FileId,
        owner: Option<String>,
        version_ids: Vec<String>,
    },
}

impl UploadEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            UploadEvent::Progress { .. } => EventType::Progress,
            UploadEvent::Failed { .. } => EventType::Failed,
            UploadEvent::SetCancelled { .. } => EventType::SetCancelled,
            UploadEvent::Complete { .. } => EventType::Complete,
        }
    }

    pub fn id(&self) -> FileId {
        match self {
            UploadEvent::Progress { id, .. }
            | UploadEvent::Failed { id, .. }
            | UploadEvent::SetCancelled { id, .. }
            | UploadEvent::Complete { id, .. } => *id,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        match self {
            UploadEvent::Progress { owner, .. }
            | UploadEvent::Failed { owner, .. }
            | UploadEvent::SetCancelled { owner, .. }
            | UploadEvent::Complete { owner, .. } => owner.as_deref(),
        }
    }
}

/// Error returned by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("subscriber {0} failed: {1}")]
    Handler(SubscriptionId, HandlerError),

    #[error("subscriber {0} panicked: {1}")]
    Panicked(SubscriptionId, String),

    #[error("{0} published while already dispatching {0}")]
    Reentrant(EventType),
}

pub type Handler = Arc<dyn Fn(&UploadEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Token identifying one subscription, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of one publish.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub delivered: usize,
    pub errors: Vec<BusError>,
}

impl PublishReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

thread_local! {
    // Event types this thread is currently dispatching
    static DISPATCHING: RefCell<Vec<EventType>> = const { RefCell::new(Vec::new()) };
}

struct DispatchGuard(EventType);

impl DispatchGuard {
    fn enter(event_type: EventType) -> Option<Self> {
        DISPATCHING.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&event_type) {
                None
            } else {
                active.push(event_type);
                Some(Self(event_type))
            }
        })
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|active| active.borrow_mut().retain(|t| *t != self.0));
    }
}

#[derive(Default)]
struct BusInner {
    handlers: Mutex<HashMap<EventType, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

/// Stateless publish/subscribe relay. Clones share subscriptions.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&UploadEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(handler)));
        tracing::debug!("Subscriber {} registered for {}", id, event_type);
        id
    }

    /// Remove a subscription. Returns `false` if there was nothing to remove.
    pub fn unsubscribe(&self, event_type: EventType, id: SubscriptionId) -> bool {
        let mut handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's type.
    ///
    /// A handler publishing the same event type again from inside its callback
    /// is refused with [`BusError::Reentrant`].
    pub fn publish(&self, event: &UploadEvent) -> PublishReport {
        let event_type = event.event_type();
        let mut report = PublishReport::default();

        let Some(_guard) = DispatchGuard::enter(event_type) else {
            tracing::warn!("Dropping re-entrant {} publish for {}", event_type, event.id());
            report.errors.push(BusError::Reentrant(event_type));
            return report;
        };

        // Snapshot so handlers may subscribe/unsubscribe while we dispatch
        let handlers: Vec<(SubscriptionId, Handler)> = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_type)
            .cloned()
            .unwrap_or_default();

        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => report.errors.push(BusError::Handler(id, e)),
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    report.errors.push(BusError::Panicked(id, message));
                }
            }
        }

        report
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&EventType, usize> =
            handlers.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}
