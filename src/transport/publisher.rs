//! Domain event publisher over the events exchange.

use std::sync::Arc;

use super::{PublishOptions, Transport, TransportError};
use crate::domain::DomainEvent;

/// Publishes [`DomainEvent`]s with their name as routing key.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    transport: Arc<dyn Transport>,
    exchange: String,
}

impl EventPublisher {
    /// Creates a publisher targeting `exchange`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, exchange: impl Into<String>) -> Self {
        Self {
            transport,
            exchange: exchange.into(),
        }
    }

    /// Publishes one event.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if encoding or publishing fails.
    pub async fn publish(&self, event: &DomainEvent) -> Result<(), TransportError> {
        let payload = event
            .to_payload()
            .map_err(|e| TransportError::Encoding(e.to_string()))?;
        self.transport
            .publish(&self.exchange, event.name(), payload, PublishOptions::default())
            .await
    }

    /// Publishes one event, logging instead of failing. For side effects of
    /// operations whose state is already committed.
    pub async fn publish_best_effort(&self, event: &DomainEvent) {
        if let Err(err) = self.publish(event).await {
            tracing::warn!(
                event = event.name(),
                session_id = %event.session_id(),
                error = %err,
                "event publish failed"
            );
        }
    }
}
