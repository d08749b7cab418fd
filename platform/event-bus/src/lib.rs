//! # Event Bus
//!
//! Broker-side half of the transactional outbox pipeline.
//!
//! ## What Lives Here
//!
//! - **Event**: the value contract every business event satisfies (stable id,
//!   type tag, occurrence time, owning aggregate, opaque payload)
//! - **EventBus**: the transport seam over a durable pub/sub broker (stream
//!   provisioning, deduplicated publish, durable explicit-ack subscriptions)
//! - **Publisher**: the contract the outbox processor publishes through
//!
//! ## Implementations
//!
//! - **NatsBus**: Production transport using NATS JetStream
//! - **InMemoryBus**: Test/dev transport emulating JetStream semantics
//!   (dedup window, ack/nak, ack-wait expiry, max-deliver cap)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{BusPublisher, EventEnvelope, InMemoryBus, Publisher, StreamConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(InMemoryBus::new());
//! let publisher = BusPublisher::new(bus, StreamConfig::default()).await?;
//!
//! let event = EventEnvelope::new(
//!     "auth.user.registered".to_string(),
//!     "user".to_string(),
//!     "user-42".to_string(),
//!     serde_json::json!({ "email": "jane@example.com" }),
//! );
//! publisher.publish(&event).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod envelope;
mod inmemory_bus;
mod nats_bus;
mod publisher;
pub mod retry;

pub use config::{ConnectionConfig, ConsumerConfig, StreamConfig};
pub use envelope::EventEnvelope;
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;
pub use publisher::{BusPublisher, Publisher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Header carrying the broker deduplication key (the event id)
pub const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";

/// A self-describing fact with a stable identity
///
/// Implementations are immutable once constructed. The pipeline never
/// interprets the payload; it only moves the bytes produced by [`Event::to_payload`].
pub trait Event: Send + Sync {
    /// Globally unique identity, used as the broker dedup key
    fn event_id(&self) -> String;

    /// Dot-namespaced type tag (e.g. `auth.user.registered`)
    fn event_type(&self) -> &str;

    fn occurred_at(&self) -> DateTime<Utc>;

    fn aggregate_id(&self) -> &str;

    fn aggregate_type(&self) -> &str;

    /// Serialized wire form of the event
    fn to_payload(&self) -> BusResult<Vec<u8>>;
}

impl fmt::Debug for dyn Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_id", &self.event_id())
            .field("event_type", &self.event_type())
            .field("aggregate_type", &self.aggregate_type())
            .field("aggregate_id", &self.aggregate_id())
            .finish()
    }
}

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Optional headers
    pub headers: Option<HashMap<String, String>>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
        }
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// The dedup key the message was published with, if any
    pub fn message_id(&self) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(MESSAGE_ID_HEADER))
            .map(String::as_str)
    }
}

/// Broker confirmation for a single publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Stream sequence of the stored message
    pub sequence: u64,
    /// True when the broker collapsed this publish into an earlier one
    pub duplicate: bool,
}

/// Settles a single delivery with the broker
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Positive acknowledgement; the broker will not redeliver
    async fn ack(&self) -> BusResult<()>;

    /// Negative acknowledgement; the broker redelivers until max-deliver
    async fn nak(&self) -> BusResult<()>;
}

/// One delivery from a durable subscription
pub struct Delivery {
    pub message: BusMessage,
    /// How many times this message has been delivered to the consumer (1-based)
    pub delivered: u64,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(message: BusMessage, delivered: u64, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            message,
            delivered,
            acker,
        }
    }

    pub async fn ack(&self) -> BusResult<()> {
        self.acker.ack().await
    }

    pub async fn nak(&self) -> BusResult<()> {
        self.acker.nak().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.message.subject)
            .field("delivered", &self.delivered)
            .finish()
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    #[error("stream provisioning failed: {0}")]
    StreamError(String),

    #[error("failed to settle delivery: {0}")]
    AckError(String),

    #[error("publisher is closed")]
    Closed,

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Transport abstraction over a durable pub/sub broker
///
/// Mirrors the JetStream feature set the pipeline relies on: a stream bound
/// to a subject prefix with a dedup window, and named durable consumers with
/// explicit acknowledgement and a bounded delivery count.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Create the stream, or reconcile an existing one with `config`
    async fn ensure_stream(&self, config: &StreamConfig) -> BusResult<()>;

    /// Publish `payload` to `subject`, deduplicated by `message_id`
    ///
    /// Returns once the broker has durably stored (or deduplicated) the message.
    async fn publish(
        &self,
        subject: &str,
        message_id: &str,
        payload: Vec<u8>,
    ) -> BusResult<PublishReceipt>;

    /// Open (or resume) the named durable subscription described by `config`
    async fn subscribe_durable(
        &self,
        config: &ConsumerConfig,
    ) -> BusResult<BoxStream<'static, Delivery>>;

    /// Flush pending work and release the connection
    async fn close(&self) -> BusResult<()>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

/// Subject an event of `event_type` is published to
pub fn subject_for(prefix: &str, event_type: &str) -> String {
    format!("{}.{}", prefix, event_type)
}

/// Recover the event type from a subject published under `prefix`
///
/// Returns `None` when the subject is outside the prefix hierarchy.
pub fn event_type_from_subject<'a>(prefix: &str, subject: &'a str) -> Option<&'a str> {
    subject
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|event_type| !event_type.is_empty())
}

/// Wildcard filter covering every subject under `prefix`
pub fn prefix_filter(prefix: &str) -> String {
    format!("{}.>", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_mapping_is_hierarchical() {
        assert_eq!(
            subject_for("events", "auth.user.registered"),
            "events.auth.user.registered"
        );
        assert_eq!(prefix_filter("events"), "events.>");
    }

    #[test]
    fn test_event_type_from_subject() {
        assert_eq!(
            event_type_from_subject("events", "events.auth.user.registered"),
            Some("auth.user.registered")
        );
        assert_eq!(event_type_from_subject("events", "events."), None);
        assert_eq!(event_type_from_subject("events", "eventsx.auth"), None);
        assert_eq!(event_type_from_subject("events", "billing.invoice"), None);
    }

    #[test]
    fn test_message_id_header() {
        let mut headers = HashMap::new();
        headers.insert(MESSAGE_ID_HEADER.to_string(), "evt-1".to_string());
        let msg = BusMessage::new("events.a".to_string(), vec![]).with_headers(headers);
        assert_eq!(msg.message_id(), Some("evt-1"));

        let bare = BusMessage::new("events.a".to_string(), vec![]);
        assert_eq!(bare.message_id(), None);
    }
}
