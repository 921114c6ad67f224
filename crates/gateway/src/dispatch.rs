// Decoupled publish/subscribe for domain events.
//
// Independent of the wire transport: REST collaborators publish
// DomainEvents here and subscribed in-process handlers react, either
// fire-and-forget (`dispatch`) or with error reporting back to the
// publisher (`dispatch_sync`).

use std::{collections::HashMap, fmt, sync::Arc};

use futures_util::future::BoxFuture;
use palaver_common::event::DomainEvent;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// An async event handler. Errors are logged for `dispatch` and
/// aggregated for `dispatch_sync`.
pub type EventHandler =
    Arc<dyn Fn(DomainEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Opaque handle returned by [`EventDispatcher::subscribe`].
///
/// Unsubscription goes through this handle rather than handler identity,
/// which is not a usable equality for function values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
}

/// Errors collected by a synchronous dispatch.
#[derive(Debug, Error)]
#[error("{} of {attempted} handlers failed for '{event_type}'", errors.len())]
pub struct DispatchError {
    pub event_type: String,
    pub attempted: usize,
    pub errors: Vec<anyhow::Error>,
}

/// Type-keyed pub/sub registry. Cheap to clone; all clones share the
/// same handler map.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type. Multiple handlers per type
    /// are allowed; `dispatch_sync` runs them in subscription order.
    pub async fn subscribe(&self, event_type: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        let mut guard = self.handlers.write().await;
        guard
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    /// Remove a previously registered handler. Returns false when the
    /// handle is unknown (already removed, or wrong event type).
    pub async fn unsubscribe(&self, event_type: &str, id: SubscriptionId) -> bool {
        let mut guard = self.handlers.write().await;
        let Some(subscriptions) = guard.get_mut(event_type) else {
            return false;
        };

        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        let removed = subscriptions.len() < before;
        if subscriptions.is_empty() {
            guard.remove(event_type);
        }
        removed
    }

    /// Fire-and-forget: every handler for the event's type runs on its
    /// own task. Handler errors are logged and never reach the publisher.
    pub async fn dispatch(&self, event: DomainEvent) {
        let handlers = self.handlers_for(&event.event_type).await;
        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                let event_type = event.event_type.clone();
                if let Err(error) = handler(event).await {
                    warn!(%event_type, error = ?error, "event handler failed");
                }
            });
        }
    }

    /// Sequential dispatch: handlers run one after another on the
    /// caller's task; all errors are aggregated and returned.
    pub async fn dispatch_sync(&self, event: DomainEvent) -> Result<(), DispatchError> {
        let handlers = self.handlers_for(&event.event_type).await;
        let attempted = handlers.len();
        let mut errors = Vec::new();

        for handler in handlers {
            if let Err(error) = handler(event.clone()).await {
                warn!(event_type = %event.event_type, error = ?error, "event handler failed");
                errors.push(error);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DispatchError { event_type: event.event_type, attempted, errors })
        }
    }

    async fn handlers_for(&self, event_type: &str) -> Vec<EventHandler> {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .map(|subscription| Arc::clone(&subscription.handler))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}
