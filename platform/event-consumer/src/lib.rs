//! # Event Consumer
//!
//! Consumer side of the delivery pipeline. An [`EventConsumer`] opens one
//! durable subscription over the whole subject prefix and dispatches each
//! message to the [`Handler`] registered for its event type:
//!
//! - handler succeeds → ack
//! - handler fails → nak; the broker redelivers up to `max_deliver` times
//! - no handler → ack and drop
//!
//! ```rust,no_run
//! use event_bus::{ConsumerConfig, InMemoryBus, StreamConfig};
//! use event_consumer::{EventConsumer, FnHandler, HandlerError};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = StreamConfig::default();
//! let mut consumer = EventConsumer::new(
//!     Arc::new(InMemoryBus::new()),
//!     ConsumerConfig::new("notifications", &stream),
//! );
//! consumer.register_handler(FnHandler::new("user.registered", |payload: Vec<u8>| async move {
//!     tracing::info!(bytes = payload.len(), "sending welcome email");
//!     Ok::<_, HandlerError>(())
//! }))?;
//!
//! let shutdown = CancellationToken::new();
//! let handle = consumer.start(shutdown.clone()).await?;
//! shutdown.cancel();
//! handle.await?;
//! # Ok(())
//! # }
//! ```

mod consumer;
mod error;
mod handler;
mod registry;
mod router;

pub use consumer::EventConsumer;
pub use error::ConsumerError;
pub use handler::{FnHandler, Handler, HandlerError};
pub use registry::HandlerRegistry;
pub use router::{route_delivery, RouteOutcome};
