//! Publisher contract and its broker-backed implementation

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{BusError, BusResult, Event, EventBus, StreamConfig};

/// Hands events to a durable broker
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one event
    ///
    /// Returns `Ok(())` once the broker has stored (or deduplicated) the event.
    /// Any error is transient from the caller's point of view.
    async fn publish(&self, event: &dyn Event) -> BusResult<()>;

    /// Publish events in order, stopping at the first failure
    ///
    /// Not atomic: events before the failing one stay published.
    async fn publish_all(&self, events: &[&dyn Event]) -> BusResult<()> {
        for event in events {
            self.publish(*event).await?;
        }
        Ok(())
    }

    /// Release broker resources; later publishes fail with [`BusError::Closed`]
    async fn close(&self) -> BusResult<()>;
}

/// [`Publisher`] over any [`EventBus`] transport
///
/// Construction provisions (or reconciles) the stream. Each event goes to
/// `<subject_prefix>.<event_type>` with its `event_id` as the dedup key.
pub struct BusPublisher {
    bus: Arc<dyn EventBus>,
    stream: StreamConfig,
    closed: AtomicBool,
}

impl BusPublisher {
    /// Provision the stream with the default retry policy
    pub async fn new(bus: Arc<dyn EventBus>, stream: StreamConfig) -> BusResult<Self> {
        Self::with_retry(bus, stream, &RetryConfig::default()).await
    }

    /// Provision the stream, retrying with backoff on failure
    pub async fn with_retry(
        bus: Arc<dyn EventBus>,
        stream: StreamConfig,
        retry: &RetryConfig,
    ) -> BusResult<Self> {
        retry_with_backoff(|| bus.ensure_stream(&stream), retry, "ensure_stream").await?;

        info!(
            stream = %stream.name,
            subjects = %stream.subjects(),
            max_age_secs = stream.max_age.as_secs(),
            duplicate_window_secs = stream.duplicate_window.as_secs(),
            "Event stream ready"
        );

        Ok(Self {
            bus,
            stream,
            closed: AtomicBool::new(false),
        })
    }

    pub fn stream(&self) -> &StreamConfig {
        &self.stream
    }
}

#[async_trait]
impl Publisher for BusPublisher {
    async fn publish(&self, event: &dyn Event) -> BusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let subject = self.stream.subject_for(event.event_type());
        let event_id = event.event_id();
        let payload = event.to_payload()?;

        let receipt = self
            .bus
            .publish(&subject, &event_id, payload)
            .await
            .map_err(|e| {
                error!(
                    event_id = %event_id,
                    subject = %subject,
                    error = %e,
                    "Failed to publish event"
                );
                e
            })?;

        if receipt.duplicate {
            debug!(
                event_id = %event_id,
                subject = %subject,
                "Broker collapsed duplicate publish"
            );
        } else {
            debug!(
                event_id = %event_id,
                subject = %subject,
                sequence = receipt.sequence,
                "Event published"
            );
        }

        Ok(())
    }

    async fn close(&self) -> BusResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(stream = %self.stream.name, "Closing publisher");
        self.bus.close().await
    }
}
