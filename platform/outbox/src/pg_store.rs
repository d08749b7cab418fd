//! PostgreSQL-backed outbox store

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::entry::OutboxEntry;
use crate::error::OutboxResult;
use crate::store::{OutboxStore, RetryPolicy};

const ENTRY_COLUMNS: &str = "id, event_type, aggregate_type, aggregate_id, payload, metadata, \
     created_at, published, published_at, retry_count, last_error, next_attempt_at, \
     claimed_by, claim_expires_at";

/// Shared eligibility predicate: pending, backoff elapsed, no live lease
const CLAIMABLE: &str = "published = FALSE \
     AND next_attempt_at <= NOW() \
     AND (claim_expires_at IS NULL OR claim_expires_at < NOW())";

/// Outbox store over the `events_outbox` table
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn get_unpublished(&self, limit: i64) -> OutboxResult<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM events_outbox \
             WHERE {CLAIMABLE} \
             ORDER BY created_at ASC, seq ASC \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED"
        );

        let entries = sqlx::query_as::<_, OutboxEntry>(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    async fn claim_batch(
        &self,
        owner: &str,
        limit: i64,
        lease: Duration,
    ) -> OutboxResult<Vec<OutboxEntry>> {
        // RETURNING does not preserve the CTE order, so sort afterwards
        let sql = format!(
            "WITH claimable AS ( \
                 SELECT id FROM events_outbox \
                 WHERE {CLAIMABLE} \
                 ORDER BY created_at ASC, seq ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE events_outbox e \
             SET claimed_by = $1, \
                 claim_expires_at = NOW() + make_interval(secs => $3::float8) \
             FROM claimable c \
             WHERE e.id = c.id \
             RETURNING e.*"
        );

        let mut rows = sqlx::query_as::<_, ClaimedRow>(&sql)
            .bind(owner)
            .bind(limit.max(0))
            .bind(lease.as_secs_f64())
            .fetch_all(&self.pool)
            .await?;

        rows.sort_by(|a, b| (a.entry.created_at, a.seq).cmp(&(b.entry.created_at, b.seq)));

        Ok(rows.into_iter().map(|row| row.entry).collect())
    }

    async fn mark_published(&self, id: Uuid) -> OutboxResult<()> {
        sqlx::query(
            r#"
            UPDATE events_outbox
            SET published = TRUE,
                published_at = NOW(),
                claimed_by = NULL,
                claim_expires_at = NULL
            WHERE id = $1 AND published = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, owner: &str, error: &str) -> OutboxResult<()> {
        // retry_count on the right-hand side is the pre-update value
        let result = sqlx::query(
            r#"
            UPDATE events_outbox
            SET retry_count = retry_count + 1,
                last_error = $2,
                next_attempt_at = NOW() + make_interval(secs => LEAST(
                    $4::float8,
                    $3::float8 * power(2::float8, LEAST(retry_count, 30)::float8)
                )),
                claimed_by = NULL,
                claim_expires_at = NULL
            WHERE id = $1
              AND published = FALSE
              AND (claimed_by IS NULL OR claimed_by = $5 OR claim_expires_at < NOW())
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(self.retry.base.as_secs_f64())
        .bind(self.retry.max.as_secs_f64())
        .bind(owner)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                outbox_id = %id,
                owner = %owner,
                "Failure not recorded; entry published or leased to another owner"
            );
        }

        Ok(())
    }

    async fn cleanup_old(&self, older_than: Duration) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM events_outbox
            WHERE published = TRUE
              AND published_at < NOW() - make_interval(secs => $1::float8)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> OutboxResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM events_outbox WHERE published = FALSE",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// `RETURNING e.*` row; `seq` breaks `created_at` ties
#[derive(sqlx::FromRow)]
struct ClaimedRow {
    seq: i64,
    #[sqlx(flatten)]
    entry: OutboxEntry,
}
