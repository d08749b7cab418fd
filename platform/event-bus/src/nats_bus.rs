//! NATS JetStream implementation of the EventBus trait

use crate::retry::RetryConfig;
use crate::{
    Acknowledge, BusError, BusMessage, BusResult, ConnectionConfig, ConsumerConfig, Delivery,
    EventBus, PublishReceipt, StreamConfig, MESSAGE_ID_HEADER,
};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy},
    stream::{Config as JsStreamConfig, RetentionPolicy, StorageType},
    AckKind, Context,
};
use async_nats::{Client, ConnectOptions, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// EventBus implementation using NATS JetStream
///
/// This is the production implementation. It wraps an `async_nats::Client`
/// and its JetStream context.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{ConnectionConfig, EventBus, NatsBus, StreamConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = NatsBus::connect("nats://localhost:4222", &ConnectionConfig::default()).await?;
/// bus.ensure_stream(&StreamConfig::default()).await?;
/// bus.publish("events.user.created", "evt-1", b"hello".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: Context,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// Connect with automatic, bounded reconnection
    ///
    /// Connection state changes are logged; they never surface to publishers
    /// as a distinct error. While disconnected, publishes fail transiently.
    pub async fn connect(url: &str, config: &ConnectionConfig) -> BusResult<Self> {
        let backoff = RetryConfig {
            max_attempts: u32::try_from(config.max_reconnects).unwrap_or(u32::MAX),
            initial_backoff: config.reconnect_base,
            max_backoff: config.reconnect_max,
        };

        let client = ConnectOptions::new()
            .name(&config.name)
            .retry_on_initial_connect()
            .max_reconnects(config.max_reconnects)
            .reconnect_delay_callback(move |attempts| {
                backoff.backoff_for(u32::try_from(attempts).unwrap_or(u32::MAX))
            })
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("NATS connected"),
                    async_nats::Event::Disconnected => warn!("NATS disconnected, reconnecting"),
                    other => debug!(event = %other, "NATS connection event"),
                }
            })
            .connect(url)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        info!(url = %url, "Connected to NATS");
        Ok(Self::new(client))
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn stream_config(config: &StreamConfig) -> JsStreamConfig {
        JsStreamConfig {
            name: config.name.clone(),
            subjects: vec![config.subjects()],
            max_age: config.max_age,
            duplicate_window: config.duplicate_window,
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            ..Default::default()
        }
    }
}

/// Settles one JetStream delivery
struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledge for NatsAcker {
    async fn ack(&self) -> BusResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }

    async fn nak(&self) -> BusResult<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }
}

fn to_delivery(message: jetstream::Message) -> Delivery {
    let mut bus_msg = BusMessage::new(message.subject.to_string(), message.payload.to_vec());

    if let Some(nats_headers) = &message.headers {
        let mut headers = HashMap::new();
        for (key, values) in nats_headers.iter() {
            // Take the first value for each header
            if let Some(value) = values.first() {
                headers.insert(key.to_string(), value.to_string());
            }
        }
        if !headers.is_empty() {
            bus_msg = bus_msg.with_headers(headers);
        }
    }

    let delivered = message
        .info()
        .map(|info| u64::try_from(info.delivered).unwrap_or(1))
        .unwrap_or(1);

    Delivery::new(bus_msg, delivered, Box::new(NatsAcker { message }))
}

#[async_trait]
impl EventBus for NatsBus {
    async fn ensure_stream(&self, config: &StreamConfig) -> BusResult<()> {
        let desired = Self::stream_config(config);

        match self.jetstream.get_stream(&config.name).await {
            Ok(_) => {
                self.jetstream
                    .update_stream(&desired)
                    .await
                    .map_err(|e| BusError::StreamError(e.to_string()))?;
                debug!(stream = %config.name, "Reconciled existing stream");
            }
            Err(_) => {
                self.jetstream
                    .create_stream(desired)
                    .await
                    .map_err(|e| BusError::StreamError(e.to_string()))?;
                info!(stream = %config.name, "Created stream");
            }
        }

        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        message_id: &str,
        payload: Vec<u8>,
    ) -> BusResult<PublishReceipt> {
        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_ID_HEADER, message_id);

        let ack = self
            .jetstream
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?
            .await
            .map_err(|e| BusError::PublishError(format!("publish ack failed: {}", e)))?;

        Ok(PublishReceipt {
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    async fn subscribe_durable(
        &self,
        config: &ConsumerConfig,
    ) -> BusResult<BoxStream<'static, Delivery>> {
        let stream = self
            .jetstream
            .get_stream(&config.stream_name)
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                &config.durable_name,
                pull::Config {
                    durable_name: Some(config.durable_name.clone()),
                    filter_subject: config.filter_subject(),
                    deliver_policy: DeliverPolicy::All,
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: config.ack_wait,
                    max_deliver: i64::from(config.max_deliver),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let durable = config.durable_name.clone();
        let deliveries = messages.filter_map(move |result| {
            let delivery = match result {
                Ok(message) => Some(to_delivery(message)),
                Err(e) => {
                    error!(consumer = %durable, error = %e, "Failed to receive message");
                    None
                }
            };
            futures::future::ready(delivery)
        });

        Ok(deliveries.boxed())
    }

    async fn close(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))
    }
}
