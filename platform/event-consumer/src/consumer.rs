//! Durable subscription loop feeding the handler registry

use event_bus::{ConsumerConfig, EventBus};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ConsumerError;
use crate::handler::Handler;
use crate::registry::HandlerRegistry;
use crate::router::route_delivery;

/// One named durable subscription, demultiplexed locally by event type
///
/// The subscription covers every subject under the configured prefix, so a
/// single consumer serves all registered handlers.
pub struct EventConsumer {
    bus: Arc<dyn EventBus>,
    config: ConsumerConfig,
    registry: HandlerRegistry,
}

impl EventConsumer {
    pub fn new(bus: Arc<dyn EventBus>, config: ConsumerConfig) -> Self {
        Self {
            bus,
            config,
            registry: HandlerRegistry::new(),
        }
    }

    pub fn register_handler<H>(&mut self, handler: H) -> Result<(), ConsumerError>
    where
        H: Handler + 'static,
    {
        self.registry.register(Arc::new(handler))
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Subscribe and spawn the delivery loop
    ///
    /// Subscription errors are returned here. Once running, handler failures
    /// never end the loop; only `shutdown` or the end of the delivery stream
    /// does. A handler invocation already underway is awaited, not aborted.
    pub async fn start(self, shutdown: CancellationToken) -> Result<JoinHandle<()>, ConsumerError> {
        let mut deliveries = self.bus.subscribe_durable(&self.config).await?;

        tracing::info!(
            consumer = %self.config.durable_name,
            stream = %self.config.stream_name,
            filter = %self.config.filter_subject(),
            max_deliver = self.config.max_deliver,
            handlers = ?self.registry.event_types(),
            "Event consumer subscribed"
        );

        let handle = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    next = deliveries.next() => next,
                };

                let Some(delivery) = next else {
                    tracing::warn!(
                        consumer = %self.config.durable_name,
                        "Delivery stream ended"
                    );
                    break;
                };

                route_delivery(&self.registry, &self.config.subject_prefix, &delivery).await;
            }

            tracing::info!(consumer = %self.config.durable_name, "Event consumer stopped");
        });

        Ok(handle)
    }
}
