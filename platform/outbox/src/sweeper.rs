//! Periodic retention cleanup of published outbox entries

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::OutboxResult;
use crate::metrics::OutboxMetrics;
use crate::processor::MIN_POLL_INTERVAL;
use crate::store::OutboxStore;

/// Deletes published entries older than the retention period on a fixed interval
pub struct RetentionSweeper {
    store: Arc<dyn OutboxStore>,
    retention: Duration,
    interval: Duration,
    metrics: Option<OutboxMetrics>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn OutboxStore>, retention: Duration, interval: Duration) -> Self {
        if interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                interval_ms = interval.as_millis() as u64,
                "Cleanup interval too short, using {}ms",
                MIN_POLL_INTERVAL.as_millis()
            );
        }
        Self {
            store,
            retention,
            interval: interval.max(MIN_POLL_INTERVAL),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// One cleanup pass; returns the number of entries deleted
    pub async fn sweep(&self) -> OutboxResult<u64> {
        let deleted = self.store.cleanup_old(self.retention).await?;
        if let Some(m) = &self.metrics {
            m.cleanup_deleted_total.inc_by(deleted);
        }
        if deleted > 0 {
            tracing::info!(
                deleted,
                retention_hours = self.retention.as_secs() / 3600,
                "Cleaned up published outbox entries"
            );
        }
        Ok(deleted)
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting outbox retention sweeper"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.sweep().await {
                tracing::error!(error = %e, "Outbox cleanup failed");
            }
        }

        tracing::info!("Outbox retention sweeper stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
