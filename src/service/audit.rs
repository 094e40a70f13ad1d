//! Audit consumer: persists every event on the events exchange.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Clock;
use crate::error::BookingError;
use crate::store::Store;
use crate::transport::{Delivery, MessageHandler};

/// Writes each delivery into the event log, keyed by its routing key.
#[derive(Debug, Clone)]
pub struct AuditConsumer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl AuditConsumer {
    /// Creates the consumer.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl MessageHandler for AuditConsumer {
    async fn handle(&self, delivery: &Delivery) -> Result<(), BookingError> {
        let payload: serde_json::Value = delivery.json().unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&delivery.payload).into_owned())
        });
        self.store
            .append_event(&delivery.routing_key, &payload, self.clock.now())
            .await?;
        Ok(())
    }
}
