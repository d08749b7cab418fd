//! Storage contract for outbox entries

use async_trait::async_trait;
use event_bus::retry::RetryConfig;
use std::time::Duration;
use uuid::Uuid;

use crate::entry::OutboxEntry;
use crate::error::OutboxResult;

/// Durable table of pending and published outbox entries
///
/// The only component allowed to read or mutate outbox storage.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `limit` pending entries, strictly oldest-first
    ///
    /// Skips rows locked by a concurrent reader, rows under a live lease and
    /// rows whose backoff has not elapsed. This is a claim hint only: nothing
    /// is held once the read returns.
    async fn get_unpublished(&self, limit: i64) -> OutboxResult<Vec<OutboxEntry>>;

    /// Atomically lease up to `limit` pending entries to `owner`
    ///
    /// Selects the same rows as [`OutboxStore::get_unpublished`] and marks
    /// them claimed until `now + lease` in one statement, so concurrent
    /// processors never receive the same live entry.
    async fn claim_batch(
        &self,
        owner: &str,
        limit: i64,
        lease: Duration,
    ) -> OutboxResult<Vec<OutboxEntry>>;

    /// Mark an entry published; a second call has no effect
    async fn mark_published(&self, id: Uuid) -> OutboxResult<()>;

    /// Record a failed attempt by `owner`: bump `retry_count`, overwrite
    /// `last_error`, schedule the next attempt and release the lease
    ///
    /// No effect while another owner holds a live lease on the entry; that
    /// owner's attempt decides the outcome.
    async fn mark_failed(&self, id: Uuid, owner: &str, error: &str) -> OutboxResult<()>;

    /// Delete published entries whose `published_at` is older than `now - older_than`
    ///
    /// Pending entries are never deleted. Returns the number of rows removed.
    async fn cleanup_old(&self, older_than: Duration) -> OutboxResult<u64>;

    /// Number of entries not yet published
    async fn pending_count(&self) -> OutboxResult<i64>;
}

/// Backoff applied between failed publish attempts of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure (doubles per further failure)
    pub base: Duration,
    /// Upper bound on the delay
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    /// Retry on the very next poll, no backoff
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Delay before the next attempt of an entry that had already failed
    /// `retry_count` times before the current failure
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        RetryConfig {
            max_attempts: u32::MAX,
            initial_backoff: self.base,
            max_backoff: self.max,
        }
        .backoff_for(u32::try_from(retry_count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_grows_exponentially() {
        let policy = RetryPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        };

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(32));
        assert_eq!(policy.delay_for(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for(i32::MAX), Duration::from_secs(60));
        assert_eq!(policy.delay_for(-1), Duration::from_secs(1));
    }

    #[test]
    fn test_immediate_policy() {
        assert_eq!(RetryPolicy::immediate().delay_for(10), Duration::ZERO);
    }
}
