//! Persisted outbox record and its view as a publishable event

use chrono::{DateTime, Utc};
use event_bus::{BusResult, Event};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{OutboxError, OutboxResult};

/// One row of `events_outbox`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OutboxEntry {
    /// Entry identity, distinct from the originating event's id
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    /// Opaque serialized event
    pub payload: Vec<u8>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    /// Diagnostic: number of failed publish attempts
    pub retry_count: i32,
    /// Diagnostic: most recent publish failure
    pub last_error: Option<String>,
    /// Earliest time the entry is eligible for another attempt
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Build a fresh pending entry for `event`
    ///
    /// Fails without side effects when the event cannot be serialized.
    pub fn from_event(
        event: &dyn Event,
        aggregate_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> OutboxResult<Self> {
        if event.event_type().is_empty() {
            return Err(OutboxError::InvalidEntry(
                "event_type must be non-empty".to_string(),
            ));
        }

        let payload = event
            .to_payload()
            .map_err(|e| OutboxError::Serialization(e.to_string()))?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id: event.aggregate_id().to_string(),
            payload,
            metadata,
            created_at: now,
            published: false,
            published_at: None,
            retry_count: 0,
            last_error: None,
            next_attempt_at: now,
            claimed_by: None,
            claim_expires_at: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        !self.published
    }

    /// View this entry as a generic event for publishing
    pub fn as_event(&self) -> OutboxEvent<'_> {
        OutboxEvent { entry: self }
    }
}

/// An outbox entry wrapped as an [`Event`]
///
/// The entry id is the event id (and therefore the broker dedup key), and
/// the stored payload is passed through untouched.
#[derive(Debug, Clone, Copy)]
pub struct OutboxEvent<'a> {
    entry: &'a OutboxEntry,
}

impl Event for OutboxEvent<'_> {
    fn event_id(&self) -> String {
        self.entry.id.to_string()
    }

    fn event_type(&self) -> &str {
        &self.entry.event_type
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.entry.created_at
    }

    fn aggregate_id(&self) -> &str {
        &self.entry.aggregate_id
    }

    fn aggregate_type(&self) -> &str {
        &self.entry.aggregate_type
    }

    fn to_payload(&self) -> BusResult<Vec<u8>> {
        Ok(self.entry.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::{BusError, EventEnvelope};
    use serde_json::json;

    struct Broken;

    impl Event for Broken {
        fn event_id(&self) -> String {
            "broken".to_string()
        }
        fn event_type(&self) -> &str {
            "test.broken"
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            Utc::now()
        }
        fn aggregate_id(&self) -> &str {
            "b-1"
        }
        fn aggregate_type(&self) -> &str {
            "broken"
        }
        fn to_payload(&self) -> BusResult<Vec<u8>> {
            Err(BusError::SerializationError("nope".to_string()))
        }
    }

    #[test]
    fn test_from_event_builds_pending_entry() {
        let event = EventEnvelope::new(
            "auth.user.registered".to_string(),
            "user".to_string(),
            "user-7".to_string(),
            json!({"email": "a@b.c"}),
        );

        let entry = OutboxEntry::from_event(&event, "user", None).unwrap();

        assert_ne!(entry.id, event.event_id, "entry id is distinct from event id");
        assert_eq!(entry.event_type, "auth.user.registered");
        assert_eq!(entry.aggregate_id, "user-7");
        assert!(entry.is_pending());
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.payload, event.to_payload().unwrap());
    }

    #[test]
    fn test_from_event_surfaces_serialization_failure() {
        let result = OutboxEntry::from_event(&Broken, "broken", None);
        assert!(matches!(result, Err(OutboxError::Serialization(_))));
    }

    #[test]
    fn test_as_event_exposes_entry_identity() {
        let source = EventEnvelope::new(
            "order.placed".to_string(),
            "order".to_string(),
            "ord-1".to_string(),
            json!({}),
        );
        let entry = OutboxEntry::from_event(&source, "order", None).unwrap();
        let event = entry.as_event();

        assert_eq!(event.event_id(), entry.id.to_string());
        assert_eq!(event.occurred_at(), entry.created_at);
        assert_eq!(event.aggregate_type(), "order");
        assert_eq!(event.to_payload().unwrap(), entry.payload);
    }
}
