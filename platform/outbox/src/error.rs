/// Errors raised by the outbox store, writer and background tasks
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to serialize event: {0}")]
    Serialization(String),

    #[error("invalid outbox entry: {0}")]
    InvalidEntry(String),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type OutboxResult<T> = Result<T, OutboxError>;
