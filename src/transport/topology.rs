//! Exchange and queue layout.
//!
//! ```text
//! "" ──► delay queue (no consumer, per-message TTL)
//!            │ dead-letter: events exchange / reservation.expired
//!            ▼
//! events exchange ──reservation.expired──► expired queue ──► expiration consumer
//!                 ──#──────────────────► audit queue   ──► audit consumer
//! ```

use super::{DeadLetter, QueueOptions, Transport, TransportError};
use crate::config::MessagingConfig;
use crate::domain::events::RESERVATION_EXPIRED;

/// Names of every exchange and queue the service uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Topic exchange for domain events.
    pub events_exchange: String,
    /// Consumer-less queue holding expiration signals until their TTL elapses.
    pub delay_queue: String,
    /// Live queue fed by dead-lettered expiration signals.
    pub expired_queue: String,
    /// Queue receiving a copy of every event.
    pub audit_queue: String,
}

impl Topology {
    /// Takes the names from configuration.
    #[must_use]
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            events_exchange: config.events_exchange.clone(),
            delay_queue: config.delay_queue.clone(),
            expired_queue: config.expired_queue.clone(),
            audit_queue: config.audit_queue.clone(),
        }
    }

    /// Declares the exchange, queues and bindings. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns the first [`TransportError`] raised by the broker.
    pub async fn declare(&self, transport: &dyn Transport) -> Result<(), TransportError> {
        transport.declare_exchange(&self.events_exchange).await?;

        transport
            .declare_queue(
                &self.delay_queue,
                QueueOptions {
                    dead_letter: Some(DeadLetter {
                        exchange: self.events_exchange.clone(),
                        routing_key: RESERVATION_EXPIRED.to_string(),
                    }),
                },
            )
            .await?;

        transport
            .declare_queue(&self.expired_queue, QueueOptions::default())
            .await?;
        transport
            .bind_queue(&self.expired_queue, &self.events_exchange, RESERVATION_EXPIRED)
            .await?;

        transport
            .declare_queue(&self.audit_queue, QueueOptions::default())
            .await?;
        transport
            .bind_queue(&self.audit_queue, &self.events_exchange, "#")
            .await?;

        tracing::info!(
            exchange = %self.events_exchange,
            delay_queue = %self.delay_queue,
            expired_queue = %self.expired_queue,
            audit_queue = %self.audit_queue,
            "broker topology declared"
        );
        Ok(())
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::from_config(&MessagingConfig::default())
    }
}
