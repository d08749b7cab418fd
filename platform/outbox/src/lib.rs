//! Transactional outbox
//!
//! Business code enqueues events with [`insert_event`] inside its own database
//! transaction. An [`OutboxProcessor`] later claims pending entries and hands
//! them to an [`event_bus::Publisher`], and a [`RetentionSweeper`] removes
//! published entries once they age out.
//!
//! ```rust,no_run
//! use event_bus::EventEnvelope;
//! use outbox::insert_event;
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let mut tx = pool.begin().await?;
//! // ... business writes on &mut *tx ...
//! let event = EventEnvelope::new(
//!     "user.registered".to_string(),
//!     "user".to_string(),
//!     "user-42".to_string(),
//!     serde_json::json!({ "email": "jane@example.com" }),
//! );
//! insert_event(&mut tx, &event, "user").await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

mod entry;
mod error;
mod memory_store;
mod metrics;
mod pg_store;
mod processor;
mod store;
mod sweeper;
mod writer;

pub use entry::{OutboxEntry, OutboxEvent};
pub use error::{OutboxError, OutboxResult};
pub use memory_store::InMemoryOutboxStore;
pub use metrics::OutboxMetrics;
pub use pg_store::PgOutboxStore;
pub use processor::{BatchReport, OutboxProcessor, ProcessorConfig, MIN_POLL_INTERVAL};
pub use store::{OutboxStore, RetryPolicy};
pub use sweeper::RetentionSweeper;
pub use writer::{insert_event, insert_event_with_metadata};

/// Schema migrations for `events_outbox`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
