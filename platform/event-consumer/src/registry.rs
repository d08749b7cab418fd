use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConsumerError;
use crate::handler::Handler;

/// Startup-time map from event type to its one handler
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its declared event type
    ///
    /// At most one handler per type; a second registration is rejected and
    /// the first stays in place.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<(), ConsumerError> {
        let event_type = handler.event_type().to_string();
        if event_type.is_empty() {
            return Err(ConsumerError::InvalidHandler(
                "event type must be non-empty".to_string(),
            ));
        }
        if self.handlers.contains_key(&event_type) {
            return Err(ConsumerError::DuplicateHandler(event_type));
        }

        tracing::debug!(event_type = %event_type, "Registered event handler");
        self.handlers.insert(event_type, handler);
        Ok(())
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(event_type)
    }

    /// Registered event types, sorted
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, HandlerError};

    fn noop(event_type: &str) -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(event_type, |_payload: Vec<u8>| async {
            Ok::<_, HandlerError>(())
        }))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register(noop("invoice.paid")).unwrap();
        registry.register(noop("invoice.issued")).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("invoice.paid").is_some());
        assert!(registry.get("invoice.voided").is_none());
        assert_eq!(registry.event_types(), vec!["invoice.issued", "invoice.paid"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(noop("invoice.paid")).unwrap();

        let err = registry.register(noop("invoice.paid")).unwrap_err();
        assert!(matches!(err, ConsumerError::DuplicateHandler(t) if t == "invoice.paid"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_event_type_rejected() {
        let mut registry = HandlerRegistry::new();
        let err = registry.register(noop("")).unwrap_err();
        assert!(matches!(err, ConsumerError::InvalidHandler(_)));
        assert!(registry.is_empty());
    }
}
