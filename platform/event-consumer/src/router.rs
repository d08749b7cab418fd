//! Per-delivery dispatch: subject → event type → handler → ack/nak

use event_bus::{event_type_from_subject, Delivery};

use crate::registry::HandlerRegistry;

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handler succeeded; acked
    Handled,
    /// No handler for the type (or subject outside the prefix); acked and dropped
    Unhandled,
    /// Handler failed; nacked for redelivery
    Failed,
}

/// Dispatch one delivery and settle it with the broker
///
/// Ack/nak transport errors are logged only. An unacked delivery comes back
/// after the consumer's ack wait anyway.
pub async fn route_delivery(
    registry: &HandlerRegistry,
    subject_prefix: &str,
    delivery: &Delivery,
) -> RouteOutcome {
    let subject = delivery.message.subject.as_str();
    let event_type = event_type_from_subject(subject_prefix, subject);

    let Some(handler) = event_type.and_then(|t| registry.get(t)) else {
        tracing::debug!(
            subject = %subject,
            "No handler registered, acknowledging and dropping"
        );
        if let Err(e) = delivery.ack().await {
            tracing::warn!(subject = %subject, error = %e, "Failed to ack unhandled message");
        }
        return RouteOutcome::Unhandled;
    };

    match handler.handle(&delivery.message.payload).await {
        Ok(()) => {
            if let Err(e) = delivery.ack().await {
                tracing::warn!(subject = %subject, error = %e, "Failed to ack message");
            }
            tracing::debug!(
                subject = %subject,
                message_id = ?delivery.message.message_id(),
                "Event handled"
            );
            RouteOutcome::Handled
        }
        Err(e) => {
            tracing::warn!(
                subject = %subject,
                message_id = ?delivery.message.message_id(),
                delivered = delivery.delivered,
                error = %e,
                "Handler failed, requesting redelivery"
            );
            if let Err(nak_err) = delivery.nak().await {
                tracing::warn!(subject = %subject, error = %nak_err, "Failed to nak message");
            }
            RouteOutcome::Failed
        }
    }
}
