//! Broker-side stream, consumer and connection settings

use std::time::Duration;

use crate::{prefix_filter, subject_for};

/// Durable stream scoped to a subject prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Stream name (e.g. `EVENTS`)
    pub name: String,
    /// Every event is published to `<subject_prefix>.<event_type>`
    pub subject_prefix: String,
    /// Messages older than this are discarded by the broker
    pub max_age: Duration,
    /// Publishes sharing a message id within this window are stored once
    pub duplicate_window: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "EVENTS".to_string(),
            subject_prefix: "events".to_string(),
            max_age: Duration::from_secs(60 * 60 * 24 * 7), // 7 days
            duplicate_window: Duration::from_secs(5 * 60),
        }
    }
}

impl StreamConfig {
    pub fn subject_for(&self, event_type: &str) -> String {
        subject_for(&self.subject_prefix, event_type)
    }

    /// Subject filter the stream is bound to
    pub fn subjects(&self) -> String {
        prefix_filter(&self.subject_prefix)
    }
}

/// Named durable consumer with explicit acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Durable consumer name; delivery state survives restarts
    pub durable_name: String,
    /// Stream the consumer reads from
    pub stream_name: String,
    /// Consumer receives every subject under this prefix
    pub subject_prefix: String,
    /// Unacknowledged deliveries are redelivered after this long
    pub ack_wait: Duration,
    /// Poison-message cap: a message is delivered at most this many times
    pub max_deliver: u32,
}

impl ConsumerConfig {
    pub fn new(durable_name: impl Into<String>, stream: &StreamConfig) -> Self {
        Self {
            durable_name: durable_name.into(),
            stream_name: stream.name.clone(),
            subject_prefix: stream.subject_prefix.clone(),
            ack_wait: Duration::from_secs(30),
            max_deliver: 5,
        }
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: u32) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    pub fn filter_subject(&self) -> String {
        prefix_filter(&self.subject_prefix)
    }
}

/// Reconnect behaviour for the broker client
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Client name reported to the server
    pub name: String,
    /// Reconnect attempts before the client gives up
    pub max_reconnects: usize,
    /// First reconnect delay (doubles per attempt)
    pub reconnect_base: Duration,
    /// Cap on the reconnect delay
    pub reconnect_max: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "outbox-relay".to_string(),
            max_reconnects: 60,
            reconnect_base: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(8),
        }
    }
}
