use event_bus::BusError;

/// Errors surfaced while wiring up a consumer
///
/// Handler failures are not listed here: they are settled per delivery with
/// a nak and never stop the subscription.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("handler already registered for event type '{0}'")]
    DuplicateHandler(String),

    #[error("invalid handler: {0}")]
    InvalidHandler(String),

    #[error("subscription failed: {0}")]
    Subscribe(#[from] BusError),
}
