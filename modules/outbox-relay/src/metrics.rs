use outbox::OutboxMetrics;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

/// Process-wide registry: outbox instruments plus dependency gauges
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    pub outbox: OutboxMetrics,
    /// 1 when the labelled dependency (`db`, `bus`) last checked healthy
    pub dep_up: IntGaugeVec,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let outbox = OutboxMetrics::register(&registry)?;

        let dep_up = IntGaugeVec::new(
            Opts::new("outbox_relay_dependency_up", "Dependency health (1 = up)"),
            &["dependency"],
        )?;
        registry.register(Box::new(dep_up.clone()))?;

        Ok(Self {
            registry,
            outbox,
            dep_up,
        })
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}
