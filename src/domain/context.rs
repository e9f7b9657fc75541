//! Operation context
//!
//! Metadata carried alongside a command through the handler/lock/event-store
//! pipeline, used for tracing and to stamp event causation/correlation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context for an operation, threaded from the HTTP boundary down into the
/// event log and outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Correlation id shared across every event produced by one request chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Id of the command/event that directly caused this one, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self {
            correlation_id: None,
            causation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Generate a new correlation id if one is not already present.
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builder() {
        let correlation_id = Uuid::new_v4();
        let causation_id = Uuid::new_v4();

        let context = OperationContext::new()
            .with_correlation_id(correlation_id)
            .with_causation_id(causation_id);

        assert_eq!(context.correlation_id, Some(correlation_id));
        assert_eq!(context.causation_id, Some(causation_id));
    }

    #[test]
    fn ensure_correlation_id_is_stable() {
        let mut context = OperationContext::new();
        assert!(context.correlation_id.is_none());

        let id = context.ensure_correlation_id();
        assert_eq!(context.correlation_id, Some(id));

        let id2 = context.ensure_correlation_id();
        assert_eq!(id, id2);
    }
}
