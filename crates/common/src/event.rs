// Domain events published through the event dispatcher.
//
// Distinct from wire frames: these describe things that happened in the
// application (a message was persisted, a session connected) and are
// consumed by in-process collaborators, not by connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An application-level event routed by type to subscribed handlers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainEvent {
    pub event_type: String,
    /// Opaque payload; meaning is a contract between publisher and handler.
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Build an event stamped with the current time.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self { event_type: event_type.into(), payload, created_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_stamps_created_at() {
        let before = Utc::now();
        let event = DomainEvent::new("message.persisted", json!({"id": 7}));
        assert_eq!(event.event_type, "message.persisted");
        assert_eq!(event.payload, json!({"id": 7}));
        assert!(event.created_at >= before);
        assert!(event.created_at <= Utc::now());
    }

    #[test]
    fn events_serialize_with_snake_case_fields() {
        let event = DomainEvent::new("session.connected", Value::Null);
        let encoded = serde_json::to_value(&event).expect("event should encode");
        assert_eq!(encoded["event_type"], "session.connected");
        assert!(encoded.get("created_at").is_some());
    }
}
