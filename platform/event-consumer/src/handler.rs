//! Handler contract and a closure adapter

use async_trait::async_trait;
use std::future::Future;

/// Error returned by a handler; any error leads to a nak and redelivery
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes the raw payload of one event type
///
/// Delivery is at-least-once, so implementations must tolerate seeing the
/// same event more than once.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The single event type this handler accepts
    fn event_type(&self) -> &str;

    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError>;
}

/// [`Handler`] backed by an async closure over the owned payload
///
/// ```rust
/// use event_consumer::{FnHandler, Handler, HandlerError};
///
/// let handler = FnHandler::new("user.registered", |payload: Vec<u8>| async move {
///     tracing::info!(bytes = payload.len(), "welcome email queued");
///     Ok::<_, HandlerError>(())
/// });
/// assert_eq!(handler.event_type(), "user.registered");
/// ```
pub struct FnHandler<F> {
    event_type: String,
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    pub fn new(event_type: impl Into<String>, f: F) -> Self {
        Self {
            event_type: event_type.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn event_type(&self) -> &str {
        &self.event_type
    }

    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        (self.f)(payload.to_vec()).await
    }
}
