//! In-memory implementation of the EventBus trait for testing and development

use crate::{
    Acknowledge, BusError, BusMessage, BusResult, ConsumerConfig, Delivery, EventBus,
    PublishReceipt, StreamConfig, MESSAGE_ID_HEADER,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

/// EventBus implementation emulating JetStream in process memory
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
///
/// It reproduces the broker behaviour the pipeline depends on: streams bound
/// to a subject filter, a dedup window keyed by message id, max-age
/// retention, and durable consumers with explicit ack, nak redelivery,
/// ack-wait expiry and a max-deliver cap. Time is read from
/// `tokio::time::Instant`, so tests can pause and advance the clock.
///
/// # Example
/// ```rust
/// use event_bus::{ConsumerConfig, EventBus, InMemoryBus, StreamConfig};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
/// let stream = StreamConfig::default();
/// bus.ensure_stream(&stream).await?;
///
/// let mut deliveries = bus
///     .subscribe_durable(&ConsumerConfig::new("worker", &stream))
///     .await?;
///
/// bus.publish("events.user.created", "evt-1", b"hello".to_vec()).await?;
///
/// let delivery = deliveries.next().await.unwrap();
/// assert_eq!(delivery.message.subject, "events.user.created");
/// delivery.ack().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct BusState {
    streams: HashMap<String, StreamState>,
    closed: bool,
}

struct StreamState {
    config: StreamConfig,
    messages: BTreeMap<u64, StoredMessage>,
    last_seq: u64,
    /// message id -> (stored at, sequence), pruned after the dedup window
    recent_ids: HashMap<String, (Instant, u64)>,
    consumers: HashMap<String, ConsumerState>,
}

struct StoredMessage {
    subject: String,
    payload: Vec<u8>,
    message_id: String,
    stored_at: Instant,
}

struct ConsumerState {
    config: ConsumerConfig,
    /// Next stream sequence not yet delivered for the first time
    next_seq: u64,
    /// Delivered but unacknowledged, keyed by stream sequence
    pending: BTreeMap<u64, PendingDelivery>,
}

struct PendingDelivery {
    delivered: u64,
    /// Redeliver at this instant unless acked first
    due: Instant,
}

enum NextDelivery {
    Ready {
        seq: u64,
        message: BusMessage,
        delivered: u64,
    },
    Wait(Option<Instant>),
    Gone,
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryBus {
    /// Create a new in-memory event bus with no streams
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently retained by `stream`
    pub fn stored_count(&self, stream: &str) -> usize {
        lock(&self.state)
            .streams
            .get(stream)
            .map_or(0, |s| s.messages.len())
    }

    /// Number of delivered-but-unacknowledged messages for a durable consumer
    pub fn pending_count(&self, stream: &str, durable: &str) -> usize {
        lock(&self.state)
            .streams
            .get(stream)
            .and_then(|s| s.consumers.get(durable))
            .map_or(0, |c| c.pending.len())
    }

    /// Check if a subject matches a subscription pattern
    ///
    /// Supports NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more tokens
    ///
    /// # Examples
    /// - `auth.events.>` matches `auth.events.user.created`
    /// - `auth.*.created` matches `auth.user.created`
    /// - `auth.events.*` does NOT match `auth.events.user.created` (too many tokens)
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                return true;
            } else if pattern_token == "*" || subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }
}

impl StreamState {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            messages: BTreeMap::new(),
            last_seq: 0,
            recent_ids: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        let max_age = self.config.max_age;
        self.messages
            .retain(|_, m| m.stored_at + max_age > now);

        let window = self.config.duplicate_window;
        self.recent_ids
            .retain(|_, (stored_at, _)| *stored_at + window > now);
    }

    fn next_delivery(&mut self, durable: &str, now: Instant) -> NextDelivery {
        self.purge_expired(now);

        let StreamState {
            messages,
            consumers,
            ..
        } = self;
        let Some(consumer) = consumers.get_mut(durable) else {
            return NextDelivery::Gone;
        };
        let ack_wait = consumer.config.ack_wait;
        let max_deliver = u64::from(consumer.config.max_deliver);

        // Redeliveries first, oldest sequence first
        while let Some(seq) = consumer
            .pending
            .iter()
            .find(|(_, p)| p.due <= now)
            .map(|(seq, _)| *seq)
        {
            let Some(stored) = messages.get(&seq) else {
                // Aged out of the stream while pending
                consumer.pending.remove(&seq);
                continue;
            };

            let exhausted = consumer
                .pending
                .get(&seq)
                .is_some_and(|p| p.delivered >= max_deliver);
            if exhausted {
                consumer.pending.remove(&seq);
                warn!(
                    consumer = %durable,
                    subject = %stored.subject,
                    message_id = %stored.message_id,
                    max_deliver = max_deliver,
                    "Max deliveries reached, message dropped for consumer"
                );
                continue;
            }

            if let Some(pending) = consumer.pending.get_mut(&seq) {
                pending.delivered += 1;
                pending.due = now + ack_wait;
                return NextDelivery::Ready {
                    seq,
                    message: to_bus_message(stored),
                    delivered: pending.delivered,
                };
            }
        }

        // First deliveries in stream order
        let filter = consumer.config.filter_subject();
        while let Some((&seq, stored)) = messages.range(consumer.next_seq..).next() {
            consumer.next_seq = seq + 1;
            if !InMemoryBus::matches_pattern(&stored.subject, &filter) {
                continue;
            }
            consumer.pending.insert(
                seq,
                PendingDelivery {
                    delivered: 1,
                    due: now + ack_wait,
                },
            );
            return NextDelivery::Ready {
                seq,
                message: to_bus_message(stored),
                delivered: 1,
            };
        }

        NextDelivery::Wait(consumer.pending.values().map(|p| p.due).min())
    }
}

fn to_bus_message(stored: &StoredMessage) -> BusMessage {
    let mut headers = HashMap::new();
    headers.insert(MESSAGE_ID_HEADER.to_string(), stored.message_id.clone());
    BusMessage::new(stored.subject.clone(), stored.payload.clone()).with_headers(headers)
}

/// Settles one in-memory delivery
struct InMemoryAcker {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
    stream: String,
    durable: String,
    seq: u64,
}

impl InMemoryAcker {
    fn with_pending<F>(&self, f: F)
    where
        F: FnOnce(&mut BTreeMap<u64, PendingDelivery>),
    {
        let mut state = lock(&self.state);
        if let Some(consumer) = state
            .streams
            .get_mut(&self.stream)
            .and_then(|s| s.consumers.get_mut(&self.durable))
        {
            f(&mut consumer.pending);
        }
    }
}

#[async_trait]
impl Acknowledge for InMemoryAcker {
    async fn ack(&self) -> BusResult<()> {
        self.with_pending(|pending| {
            pending.remove(&self.seq);
        });
        Ok(())
    }

    async fn nak(&self) -> BusResult<()> {
        self.with_pending(|pending| {
            if let Some(p) = pending.get_mut(&self.seq) {
                p.due = Instant::now();
            }
        });
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn ensure_stream(&self, config: &StreamConfig) -> BusResult<()> {
        if config.name.is_empty() || config.subject_prefix.is_empty() {
            return Err(BusError::StreamError(
                "stream name and subject prefix must be non-empty".to_string(),
            ));
        }

        let mut state = lock(&self.state);
        state
            .streams
            .entry(config.name.clone())
            .and_modify(|s| s.config = config.clone())
            .or_insert_with(|| StreamState::new(config.clone()));
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        message_id: &str,
        payload: Vec<u8>,
    ) -> BusResult<PublishReceipt> {
        let now = Instant::now();
        let receipt = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(BusError::ConnectionError("bus is closed".to_string()));
            }

            let stream = state
                .streams
                .values_mut()
                .find(|s| Self::matches_pattern(subject, &s.config.subjects()))
                .ok_or_else(|| {
                    BusError::PublishError(format!("no stream matches subject {}", subject))
                })?;

            stream.purge_expired(now);

            if let Some((_, seq)) = stream.recent_ids.get(message_id) {
                return Ok(PublishReceipt {
                    sequence: *seq,
                    duplicate: true,
                });
            }

            stream.last_seq += 1;
            let seq = stream.last_seq;
            stream.messages.insert(
                seq,
                StoredMessage {
                    subject: subject.to_string(),
                    payload,
                    message_id: message_id.to_string(),
                    stored_at: now,
                },
            );
            stream
                .recent_ids
                .insert(message_id.to_string(), (now, seq));

            PublishReceipt {
                sequence: seq,
                duplicate: false,
            }
        };

        self.notify.notify_waiters();
        Ok(receipt)
    }

    async fn subscribe_durable(
        &self,
        config: &ConsumerConfig,
    ) -> BusResult<BoxStream<'static, Delivery>> {
        {
            let mut state = lock(&self.state);
            let stream = state.streams.get_mut(&config.stream_name).ok_or_else(|| {
                BusError::SubscribeError(format!("stream {} not found", config.stream_name))
            })?;
            stream
                .consumers
                .entry(config.durable_name.clone())
                .and_modify(|c| c.config = config.clone())
                .or_insert_with(|| ConsumerState {
                    config: config.clone(),
                    next_seq: 0,
                    pending: BTreeMap::new(),
                });
        }

        let state = self.state.clone();
        let notify = self.notify.clone();
        let stream_name = config.stream_name.clone();
        let durable = config.durable_name.clone();

        let deliveries = async_stream::stream! {
            loop {
                let notified = notify.notified();
                let next = {
                    let mut guard = lock(&state);
                    if guard.closed {
                        NextDelivery::Gone
                    } else {
                        match guard.streams.get_mut(&stream_name) {
                            Some(stream) => stream.next_delivery(&durable, Instant::now()),
                            None => NextDelivery::Gone,
                        }
                    }
                };

                match next {
                    NextDelivery::Ready { seq, message, delivered } => {
                        let acker = InMemoryAcker {
                            state: state.clone(),
                            notify: notify.clone(),
                            stream: stream_name.clone(),
                            durable: durable.clone(),
                            seq,
                        };
                        yield Delivery::new(message, delivered, Box::new(acker));
                    }
                    NextDelivery::Wait(Some(due)) => {
                        tokio::select! {
                            _ = notified => {}
                            _ = tokio::time::sleep_until(due) => {}
                        }
                    }
                    NextDelivery::Wait(None) => notified.await,
                    NextDelivery::Gone => break,
                }
            }
        };

        Ok(deliveries.boxed())
    }

    async fn close(&self) -> BusResult<()> {
        lock(&self.state).closed = true;
        self.notify.notify_waiters();
        Ok(())
    }
}
