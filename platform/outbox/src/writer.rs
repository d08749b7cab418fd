//! Transactional enqueue: the only way events enter the outbox
//!
//! Callers pass their own open transaction, so the entry becomes visible to
//! the processor exactly when (and only if) the business change commits.

use event_bus::Event;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::entry::OutboxEntry;
use crate::error::OutboxResult;

/// Enqueue `event` inside the caller's transaction
///
/// Returns the new entry id. On error nothing is written and the caller's
/// transaction should be rolled back.
pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &dyn Event,
    aggregate_type: &str,
) -> OutboxResult<Uuid> {
    insert_event_with_metadata(tx, event, aggregate_type, None).await
}

/// Enqueue `event` with caller-supplied metadata (tracing ids, actor, ...)
pub async fn insert_event_with_metadata(
    tx: &mut Transaction<'_, Postgres>,
    event: &dyn Event,
    aggregate_type: &str,
    metadata: Option<serde_json::Value>,
) -> OutboxResult<Uuid> {
    let entry = OutboxEntry::from_event(event, aggregate_type, metadata)?;

    // created_at and next_attempt_at come from the database clock
    sqlx::query(
        r#"
        INSERT INTO events_outbox (
            id, event_type, aggregate_type, aggregate_id, payload, metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.event_type)
    .bind(&entry.aggregate_type)
    .bind(&entry.aggregate_id)
    .bind(&entry.payload)
    .bind(&entry.metadata)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(
        outbox_id = %entry.id,
        event_id = %event.event_id(),
        event_type = %entry.event_type,
        aggregate_id = %entry.aggregate_id,
        "Event enqueued in outbox"
    );

    Ok(entry.id)
}
