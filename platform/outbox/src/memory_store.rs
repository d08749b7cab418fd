//! In-memory outbox store for tests and database-less local runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::Event;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::entry::OutboxEntry;
use crate::error::OutboxResult;
use crate::store::{OutboxStore, RetryPolicy};

/// [`OutboxStore`] held in process memory
///
/// Entries are kept in insertion order, which doubles as the `seq` tie-breaker.
/// There is no enclosing business transaction here: `insert` commits at once.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    entries: Mutex<Vec<OutboxEntry>>,
    retry: RetryPolicy,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutboxEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a pending entry for `event`
    pub fn insert(&self, event: &dyn Event, aggregate_type: &str) -> OutboxResult<Uuid> {
        let entry = OutboxEntry::from_event(event, aggregate_type, None)?;
        let id = entry.id;
        self.lock().push(entry);
        Ok(id)
    }

    /// Append a prepared entry as-is
    pub fn insert_entry(&self, entry: OutboxEntry) {
        self.lock().push(entry);
    }

    pub fn get(&self, id: Uuid) -> Option<OutboxEntry> {
        self.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Snapshot of every entry in insertion order
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.lock().clone()
    }

    fn claimable(entry: &OutboxEntry, now: DateTime<Utc>) -> bool {
        !entry.published
            && entry.next_attempt_at <= now
            && entry.claim_expires_at.map_or(true, |expires| expires < now)
    }

    /// Whether an owner other than `owner` holds a live lease
    fn leased_elsewhere(entry: &OutboxEntry, owner: &str, now: DateTime<Utc>) -> bool {
        entry.claimed_by.as_deref().is_some_and(|holder| holder != owner)
            && entry.claim_expires_at.is_some_and(|expires| expires >= now)
    }

    /// Indices of claimable entries, oldest first
    fn eligible(entries: &[OutboxEntry], now: DateTime<Utc>, limit: i64) -> Vec<usize> {
        let mut indices: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| Self::claimable(e, now))
            .map(|(i, _)| i)
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        indices.sort_by_key(|&i| entries[i].created_at);
        indices.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        indices
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    // Out-of-range durations saturate at a century
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn get_unpublished(&self, limit: i64) -> OutboxResult<Vec<OutboxEntry>> {
        let entries = self.lock();
        let now = Utc::now();
        Ok(Self::eligible(&entries, now, limit)
            .into_iter()
            .map(|i| entries[i].clone())
            .collect())
    }

    async fn claim_batch(
        &self,
        owner: &str,
        limit: i64,
        lease: Duration,
    ) -> OutboxResult<Vec<OutboxEntry>> {
        let mut entries = self.lock();
        let now = Utc::now();
        let expires = now
            .checked_add_signed(chrono_duration(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let claimed = Self::eligible(&entries, now, limit)
            .into_iter()
            .map(|i| {
                let entry = &mut entries[i];
                entry.claimed_by = Some(owner.to_string());
                entry.claim_expires_at = Some(expires);
                entry.clone()
            })
            .collect();

        Ok(claimed)
    }

    async fn mark_published(&self, id: Uuid) -> OutboxResult<()> {
        if let Some(entry) = self.lock().iter_mut().find(|e| e.id == id && !e.published) {
            entry.published = true;
            entry.published_at = Some(Utc::now());
            entry.claimed_by = None;
            entry.claim_expires_at = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, owner: &str, error: &str) -> OutboxResult<()> {
        let now = Utc::now();
        if let Some(entry) = self
            .lock()
            .iter_mut()
            .find(|e| e.id == id && !e.published && !Self::leased_elsewhere(e, owner, now))
        {
            let delay = chrono_duration(self.retry.delay_for(entry.retry_count));
            entry.retry_count += 1;
            entry.last_error = Some(error.to_string());
            entry.next_attempt_at = now
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            entry.claimed_by = None;
            entry.claim_expires_at = None;
        }
        Ok(())
    }

    async fn cleanup_old(&self, older_than: Duration) -> OutboxResult<u64> {
        let mut entries = self.lock();
        let cutoff = Utc::now()
            .checked_sub_signed(chrono_duration(older_than))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let before = entries.len();
        entries.retain(|e| !(e.published && e.published_at.is_some_and(|at| at < cutoff)));
        Ok((before - entries.len()) as u64)
    }

    async fn pending_count(&self) -> OutboxResult<i64> {
        Ok(self.lock().iter().filter(|e| !e.published).count() as i64)
    }
}
