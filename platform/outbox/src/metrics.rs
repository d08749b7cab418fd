use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Prometheus instruments for the outbox background tasks
#[derive(Clone)]
pub struct OutboxMetrics {
    pub published_total: IntCounter,
    pub publish_failed_total: IntCounter,
    pub cleanup_deleted_total: IntCounter,
    pub pending: IntGauge,
    pub batch_duration_seconds: Histogram,
}

impl OutboxMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let published_total = IntCounter::new(
            "outbox_published_total",
            "Outbox entries published to the broker",
        )?;
        let publish_failed_total = IntCounter::new(
            "outbox_publish_failed_total",
            "Failed outbox publish attempts",
        )?;
        let cleanup_deleted_total = IntCounter::new(
            "outbox_cleanup_deleted_total",
            "Published outbox entries removed by retention cleanup",
        )?;
        let pending = IntGauge::new("outbox_pending", "Outbox entries awaiting publish")?;
        let batch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "outbox_batch_duration_seconds",
                "Time to claim and publish one outbox batch",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(published_total.clone()))?;
        registry.register(Box::new(publish_failed_total.clone()))?;
        registry.register(Box::new(cleanup_deleted_total.clone()))?;
        registry.register(Box::new(pending.clone()))?;
        registry.register(Box::new(batch_duration_seconds.clone()))?;

        Ok(Self {
            published_total,
            publish_failed_total,
            cleanup_deleted_total,
            pending,
            batch_duration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_exposes_all_families() {
        let registry = Registry::new();
        let metrics = OutboxMetrics::register(&registry).unwrap();
        metrics.published_total.inc();

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();

        for expected in [
            "outbox_published_total",
            "outbox_publish_failed_total",
            "outbox_cleanup_deleted_total",
            "outbox_pending",
            "outbox_batch_duration_seconds",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        OutboxMetrics::register(&registry).unwrap();
        assert!(OutboxMetrics::register(&registry).is_err());
    }
}
