use event_bus::{BusResult, ConnectionConfig, EventBus, InMemoryBus, NatsBus};
use std::sync::Arc;

use crate::config::{BusType, Config};

/// Connected transport plus the raw NATS client for health reporting
pub struct BusHandle {
    pub bus: Arc<dyn EventBus>,
    pub nats: Option<async_nats::Client>,
}

pub async fn connect_bus(config: &Config) -> BusResult<BusHandle> {
    match config.bus_type {
        BusType::InMemory => {
            tracing::warn!("Using in-memory event bus; events do not leave this process");
            Ok(BusHandle {
                bus: Arc::new(InMemoryBus::new()),
                nats: None,
            })
        }
        BusType::Nats => {
            tracing::info!(url = %config.nats_url, "Connecting to NATS");
            let connection = ConnectionConfig {
                max_reconnects: config.nats_max_reconnects,
                ..Default::default()
            };
            let bus = NatsBus::connect(&config.nats_url, &connection).await?;
            let client = bus.client().clone();
            Ok(BusHandle {
                bus: Arc::new(bus),
                nats: Some(client),
            })
        }
    }
}
