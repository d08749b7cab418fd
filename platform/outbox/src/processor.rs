//! Background relay from the outbox table to the event publisher

use event_bus::Publisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::OutboxResult;
use crate::metrics::OutboxMetrics;
use crate::store::OutboxStore;

/// Shortest poll period; `tokio::time::interval` rejects zero
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Delay between polls
    pub interval: Duration,
    /// Maximum entries claimed per poll
    pub batch_size: i64,
    /// How long a claim excludes other processors
    pub lease: Duration,
    /// Lease owner recorded on claimed entries
    pub owner: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
            lease: Duration::from_secs(60),
            owner: format!("outbox-processor-{}", Uuid::new_v4()),
        }
    }
}

/// Outcome of one poll
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
}

/// Claims pending entries and hands them to the publisher, oldest first
///
/// Entries in one batch are independent: a failed publish is recorded on
/// that entry and the batch moves on. Delivery is at-least-once; the broker
/// collapses republishes using the entry id.
pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn Publisher>,
    config: ProcessorConfig,
    metrics: Option<OutboxMetrics>,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn Publisher>,
        mut config: ProcessorConfig,
    ) -> Self {
        if config.interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                interval_ms = config.interval.as_millis() as u64,
                "Outbox poll interval too short, using {}ms",
                MIN_POLL_INTERVAL.as_millis()
            );
            config.interval = MIN_POLL_INTERVAL;
        }
        Self {
            store,
            publisher,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Claim one batch and attempt to publish every entry in it
    ///
    /// Only the claim itself can fail the call; per-entry problems are
    /// logged and counted in the report.
    pub async fn process_batch(&self) -> OutboxResult<BatchReport> {
        let _timer = self
            .metrics
            .as_ref()
            .map(|m| m.batch_duration_seconds.start_timer());

        let entries = self
            .store
            .claim_batch(&self.config.owner, self.config.batch_size, self.config.lease)
            .await?;

        let mut report = BatchReport {
            claimed: entries.len(),
            ..Default::default()
        };

        for entry in &entries {
            match self.publisher.publish(&entry.as_event()).await {
                Ok(()) => {
                    report.published += 1;
                    if let Some(m) = &self.metrics {
                        m.published_total.inc();
                    }

                    // The broker already has it; a later republish is deduplicated
                    if let Err(e) = self.store.mark_published(entry.id).await {
                        tracing::error!(
                            outbox_id = %entry.id,
                            error = %e,
                            "Published event could not be marked; it will be republished"
                        );
                    } else {
                        tracing::debug!(
                            outbox_id = %entry.id,
                            event_type = %entry.event_type,
                            "Outbox entry published"
                        );
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    if let Some(m) = &self.metrics {
                        m.publish_failed_total.inc();
                    }

                    tracing::warn!(
                        outbox_id = %entry.id,
                        event_type = %entry.event_type,
                        attempt = entry.retry_count + 1,
                        error = %e,
                        "Failed to publish outbox entry"
                    );

                    if let Err(mark_err) = self
                        .store
                        .mark_failed(entry.id, &self.config.owner, &e.to_string())
                        .await
                    {
                        tracing::error!(
                            outbox_id = %entry.id,
                            error = %mark_err,
                            "Failed to record publish failure"
                        );
                    }
                }
            }
        }

        if let Some(m) = &self.metrics {
            match self.store.pending_count().await {
                Ok(pending) => m.pending.set(pending),
                Err(e) => tracing::debug!(error = %e, "Could not refresh pending gauge"),
            }
        }

        Ok(report)
    }

    /// Poll until `shutdown` is cancelled
    ///
    /// A batch in flight when cancellation arrives runs to completion.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            owner = %self.config.owner,
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting outbox processor"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            tick_count += 1;

            match self.process_batch().await {
                Ok(report) if report.claimed > 0 => {
                    tracing::info!(
                        tick = tick_count,
                        published = report.published,
                        failed = report.failed,
                        "Outbox batch processed"
                    );
                }
                Ok(_) => {
                    if tick_count <= 3 || tick_count % 60 == 0 {
                        tracing::debug!(tick = tick_count, "No pending outbox entries");
                    }
                }
                Err(e) => {
                    tracing::error!(tick = tick_count, error = %e, "Outbox poll failed");
                }
            }
        }

        tracing::info!(owner = %self.config.owner, "Outbox processor stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::OutboxEntry;
    use crate::error::OutboxError;
    use crate::memory_store::InMemoryOutboxStore;
    use crate::store::RetryPolicy;
    use async_trait::async_trait;
    use event_bus::{
        BusError, BusPublisher, BusResult, ConsumerConfig, Event, EventBus, EventEnvelope,
        InMemoryBus, StreamConfig,
    };
    use futures::StreamExt;
    use prometheus::Registry;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records event ids; fails for the listed aggregates
    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<String>>,
        failing_aggregates: HashSet<String>,
    }

    impl RecordingPublisher {
        fn failing_for(aggregates: &[&str]) -> Self {
            Self {
                failing_aggregates: aggregates.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            }
        }

        fn published(&self) -> Vec<String> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, event: &dyn Event) -> BusResult<()> {
            if self.failing_aggregates.contains(event.aggregate_id()) {
                return Err(BusError::PublishError("broker unavailable".to_string()));
            }
            self.published.lock().unwrap().push(event.event_id());
            Ok(())
        }

        async fn close(&self) -> BusResult<()> {
            Ok(())
        }
    }

    /// Delegates to the in-memory store but fails the first `mark_published`
    struct LossyMarkStore {
        inner: InMemoryOutboxStore,
        mark_failures_left: AtomicUsize,
    }

    #[async_trait]
    impl OutboxStore for LossyMarkStore {
        async fn get_unpublished(&self, limit: i64) -> OutboxResult<Vec<OutboxEntry>> {
            self.inner.get_unpublished(limit).await
        }
        async fn claim_batch(
            &self,
            owner: &str,
            limit: i64,
            lease: Duration,
        ) -> OutboxResult<Vec<OutboxEntry>> {
            self.inner.claim_batch(owner, limit, lease).await
        }
        async fn mark_published(&self, id: Uuid) -> OutboxResult<()> {
            if self
                .mark_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(OutboxError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.mark_published(id).await
        }
        async fn mark_failed(&self, id: Uuid, owner: &str, error: &str) -> OutboxResult<()> {
            self.inner.mark_failed(id, owner, error).await
        }
        async fn cleanup_old(&self, older_than: Duration) -> OutboxResult<u64> {
            self.inner.cleanup_old(older_than).await
        }
        async fn pending_count(&self) -> OutboxResult<i64> {
            self.inner.pending_count().await
        }
    }

    fn event(aggregate_id: &str) -> EventEnvelope<serde_json::Value> {
        EventEnvelope::new(
            "order.placed".to_string(),
            "order".to_string(),
            aggregate_id.to_string(),
            json!({ "order": aggregate_id }),
        )
    }

    fn config(batch_size: i64) -> ProcessorConfig {
        ProcessorConfig {
            batch_size,
            owner: "test-processor".to_string(),
            ..Default::default()
        }
    }

    fn immediate_store() -> Arc<InMemoryOutboxStore> {
        Arc::new(InMemoryOutboxStore::new().with_retry_policy(RetryPolicy::immediate()))
    }

    /// TEST 1: batch size 1 publishes one entry per poll, in enqueue order
    #[tokio::test]
    async fn test_batch_size_one_preserves_enqueue_order() {
        let bus = InMemoryBus::new();
        let stream = StreamConfig::default();
        let publisher = Arc::new(
            BusPublisher::new(Arc::new(bus.clone()), stream.clone())
                .await
                .unwrap(),
        );
        let store = immediate_store();
        let ids: Vec<Uuid> = ["a", "b", "c"]
            .iter()
            .map(|a| store.insert(&event(a), "order").unwrap())
            .collect();

        let processor = OutboxProcessor::new(store.clone(), publisher, config(1));
        for _ in 0..3 {
            let report = processor.process_batch().await.unwrap();
            assert_eq!(report, BatchReport { claimed: 1, published: 1, failed: 0 });
        }
        assert_eq!(processor.process_batch().await.unwrap(), BatchReport::default());

        let mut deliveries = bus
            .subscribe_durable(&ConsumerConfig::new("order-check", &stream))
            .await
            .unwrap();
        for id in &ids {
            let delivery = tokio::time::timeout(Duration::from_millis(100), deliveries.next())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(delivery.message.subject, "events.order.placed");
            assert_eq!(delivery.message.message_id(), Some(id.to_string().as_str()));
            delivery.ack().await.unwrap();
        }
    }

    /// TEST 2: one failing entry does not block the rest of the batch
    #[tokio::test]
    async fn test_failures_are_independent_within_batch() {
        let store = immediate_store();
        let ok_1 = store.insert(&event("ok-1"), "order").unwrap();
        let bad = store.insert(&event("bad"), "order").unwrap();
        let ok_2 = store.insert(&event("ok-2"), "order").unwrap();
        let publisher = Arc::new(RecordingPublisher::failing_for(&["bad"]));

        let processor = OutboxProcessor::new(store.clone(), publisher.clone(), config(10));
        let report = processor.process_batch().await.unwrap();

        assert_eq!(report, BatchReport { claimed: 3, published: 2, failed: 1 });
        assert_eq!(publisher.published(), vec![ok_1.to_string(), ok_2.to_string()]);

        let failed = store.get(bad).unwrap();
        assert!(!failed.published);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.last_error.unwrap().contains("broker unavailable"));
        assert!(failed.claimed_by.is_none());
        assert!(store.get(ok_1).unwrap().published);
        assert!(store.get(ok_2).unwrap().published);
    }

    /// TEST 3: a failed entry is retried on a later poll
    #[tokio::test]
    async fn test_failed_entry_retried_next_poll() {
        let store = immediate_store();
        let id = store.insert(&event("bad"), "order").unwrap();

        let failing = Arc::new(RecordingPublisher::failing_for(&["bad"]));
        let processor = OutboxProcessor::new(store.clone(), failing, config(10));
        processor.process_batch().await.unwrap();
        processor.process_batch().await.unwrap();
        assert_eq!(store.get(id).unwrap().retry_count, 2);

        let healthy = Arc::new(RecordingPublisher::default());
        let processor = OutboxProcessor::new(store.clone(), healthy.clone(), config(10));
        let report = processor.process_batch().await.unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(healthy.published(), vec![id.to_string()]);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    /// TEST 4: losing the mark after a publish leads to a deduplicated republish
    #[tokio::test]
    async fn test_republish_after_lost_mark_is_deduplicated() {
        let bus = InMemoryBus::new();
        let stream = StreamConfig::default();
        let publisher = Arc::new(
            BusPublisher::new(Arc::new(bus.clone()), stream.clone())
                .await
                .unwrap(),
        );
        let store = Arc::new(LossyMarkStore {
            inner: InMemoryOutboxStore::new(),
            mark_failures_left: AtomicUsize::new(1),
        });
        let id = store.inner.insert(&event("ord-1"), "order").unwrap();

        // Zero lease lets the next poll reclaim the unmarked entry
        let processor = OutboxProcessor::new(
            store.clone(),
            publisher,
            ProcessorConfig {
                lease: Duration::ZERO,
                ..config(10)
            },
        );

        let first = processor.process_batch().await.unwrap();
        assert_eq!(first.published, 1);
        assert!(!store.inner.get(id).unwrap().published);

        std::thread::sleep(Duration::from_millis(5));
        let second = processor.process_batch().await.unwrap();
        assert_eq!(second.published, 1);
        assert!(store.inner.get(id).unwrap().published);

        assert_eq!(bus.stored_count(&stream.name), 1);
    }

    /// TEST 5: a live lease hides entries from a second processor
    #[tokio::test]
    async fn test_concurrent_processors_do_not_share_entries() {
        let store = immediate_store();
        for a in ["a", "b", "c", "d"] {
            store.insert(&event(a), "order").unwrap();
        }
        store
            .claim_batch("other-processor", 2, Duration::from_secs(60))
            .await
            .unwrap();

        let publisher = Arc::new(RecordingPublisher::default());
        let processor = OutboxProcessor::new(store.clone(), publisher.clone(), config(10));
        let report = processor.process_batch().await.unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(publisher.published().len(), 2);
        assert_eq!(store.pending_count().await.unwrap(), 2);
    }

    /// TEST 6: run polls on its interval and exits on cancellation
    #[tokio::test(start_paused = true)]
    async fn test_run_polls_until_cancelled() {
        let store = immediate_store();
        store.insert(&event("first"), "order").unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let shutdown = CancellationToken::new();

        let cfg = config(10);
        let interval = cfg.interval;
        let handle = OutboxProcessor::new(store.clone(), publisher.clone(), cfg)
            .spawn(shutdown.clone());

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(publisher.published().len(), 1);

        store.insert(&event("second"), "order").unwrap();
        tokio::time::sleep(interval).await;
        assert_eq!(publisher.published().len(), 2);

        shutdown.cancel();
        handle.await.unwrap();

        store.insert(&event("after-shutdown"), "order").unwrap();
        tokio::time::sleep(interval * 2).await;
        assert_eq!(publisher.published().len(), 2);
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let store = immediate_store();
        store.insert(&event("first"), "order").unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let shutdown = CancellationToken::new();

        let processor = OutboxProcessor::new(
            store.clone(),
            publisher.clone(),
            ProcessorConfig {
                interval: Duration::ZERO,
                ..config(10)
            },
        );
        assert_eq!(processor.config().interval, MIN_POLL_INTERVAL);

        let handle = processor.spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(publisher.published().len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_track_outcomes() {
        let registry = Registry::new();
        let metrics = OutboxMetrics::register(&registry).unwrap();
        let store = immediate_store();
        store.insert(&event("ok"), "order").unwrap();
        store.insert(&event("bad"), "order").unwrap();

        let processor = OutboxProcessor::new(
            store,
            Arc::new(RecordingPublisher::failing_for(&["bad"])),
            config(10),
        )
        .with_metrics(metrics.clone());
        processor.process_batch().await.unwrap();

        assert_eq!(metrics.published_total.get(), 1);
        assert_eq!(metrics.publish_failed_total.get(), 1);
        assert_eq!(metrics.pending.get(), 1);
        assert_eq!(metrics.batch_duration_seconds.get_sample_count(), 1);
    }
}
