//! # Event Envelope
//!
//! Standard concrete [`Event`] used by business code.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Unique identifier, doubles as the broker dedup key
//! - `event_type`: Dot-namespaced type tag used for subject routing
//! - `occurred_at`: When the fact happened
//! - `aggregate_type` / `aggregate_id`: The entity the fact is about
//! - `correlation_id`: Links related events in a business transaction
//! - `causation_id`: Links this event to the command/event that caused it
//! - `payload`: Event-specific data (generic type parameter)
//!
//! The wire form is the JSON serialization of the whole envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BusError, BusResult, Event};

/// Event envelope wrapping an event-specific payload
///
/// # Examples
///
/// ```rust
/// use event_bus::{Event, EventEnvelope};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct UserRegistered {
///     email: String,
/// }
///
/// let envelope = EventEnvelope::new(
///     "auth.user.registered".to_string(),
///     "user".to_string(),
///     "user-123".to_string(),
///     UserRegistered { email: "jane@example.com".to_string() },
/// )
/// .with_correlation_id(Some("req-456".to_string()));
///
/// assert_eq!(envelope.event_type(), "auth.user.registered");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event identifier (idempotency key)
    pub event_id: Uuid,

    pub event_type: String,

    pub occurred_at: DateTime<Utc>,

    pub aggregate_type: String,

    pub aggregate_id: String,

    /// Links related events in a business transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Links this event to the command/event that caused it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    /// Event-specific payload
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with a generated event_id and occurred_at = now
    pub fn new(
        event_type: String,
        aggregate_type: String,
        aggregate_id: String,
        payload: T,
    ) -> Self {
        Self::with_event_id(Uuid::new_v4(), event_type, aggregate_type, aggregate_id, payload)
    }

    /// Create an envelope with explicit event_id (useful for testing and replays)
    pub fn with_event_id(
        event_id: Uuid,
        event_type: String,
        aggregate_type: String,
        aggregate_id: String,
        payload: T,
    ) -> Self {
        Self {
            event_id,
            event_type,
            occurred_at: Utc::now(),
            aggregate_type,
            aggregate_id,
            correlation_id: None,
            causation_id: None,
            payload,
        }
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Set the causation ID
    pub fn with_causation_id(mut self, causation_id: Option<String>) -> Self {
        self.causation_id = causation_id;
        self
    }
}

impl<T: Serialize + Send + Sync> Event for EventEnvelope<T> {
    fn event_id(&self) -> String {
        self.event_id.to_string()
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    fn to_payload(&self) -> BusResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BusError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_creation() {
        let envelope = EventEnvelope::new(
            "auth.user.registered".to_string(),
            "user".to_string(),
            "user-1".to_string(),
            json!({"test": "data"}),
        );

        assert_eq!(envelope.event_type(), "auth.user.registered");
        assert_eq!(envelope.aggregate_type(), "user");
        assert_eq!(envelope.aggregate_id(), "user-1");
        assert_eq!(envelope.event_id(), envelope.event_id.to_string());
        assert!(envelope.correlation_id.is_none());
        assert!(envelope.causation_id.is_none());
    }

    #[test]
    fn test_envelope_with_builder() {
        let envelope = EventEnvelope::new(
            "auth.user.registered".to_string(),
            "user".to_string(),
            "user-1".to_string(),
            json!({"test": "data"}),
        )
        .with_correlation_id(Some("corr-456".to_string()))
        .with_causation_id(Some("cause-789".to_string()));

        assert_eq!(envelope.correlation_id, Some("corr-456".to_string()));
        assert_eq!(envelope.causation_id, Some("cause-789".to_string()));
    }

    #[test]
    fn test_payload_is_json_envelope() {
        let event_id = Uuid::new_v4();
        let envelope = EventEnvelope::with_event_id(
            event_id,
            "order.placed".to_string(),
            "order".to_string(),
            "ord-9".to_string(),
            json!({"total": 1200}),
        );

        let bytes = envelope.to_payload().unwrap();
        let decoded: EventEnvelope<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.event_id, event_id);
        assert_eq!(decoded.payload["total"], 1200);
        // Optional tracing fields are omitted when unset
        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(raw.get("correlation_id").is_none());
    }
}
