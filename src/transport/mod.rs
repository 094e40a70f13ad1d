//! Delay/event transport: topic exchanges, queues, per-message TTL and
//! dead-letter re-routing.
//!
//! Delivery is at-least-once. A handler that fails is redelivered after a
//! backoff until [`ConsumeOptions::max_redeliveries`] is exhausted, so every
//! handler must be idempotent.

pub mod memory;
pub mod publisher;
pub mod topology;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::BookingError;

pub use memory::MemoryBroker;
pub use publisher::EventPublisher;
pub use topology::Topology;

/// Name of the default exchange, which routes straight to the queue named by the routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Publish or bind against an exchange that was never declared.
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),

    /// Operation on a queue that was never declared.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// The queue already has a consumer.
    #[error("queue already consumed: {0}")]
    AlreadyConsumed(String),

    /// The broker or a consumer went away.
    #[error("transport closed: {0}")]
    Closed(String),

    /// A payload could not be encoded or decoded.
    #[error("payload encoding error: {0}")]
    Encoding(String),
}

/// Where a queue re-routes messages that expire or are rejected for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Target exchange.
    pub exchange: String,
    /// Routing key used on the target exchange.
    pub routing_key: String,
}

/// Queue declaration options.
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    /// Dead-letter target, if any.
    pub dead_letter: Option<DeadLetter>,
}

/// Per-message publish options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    /// Time the message may wait in a queue without a consumer.
    pub ttl: Option<Duration>,
}

/// Consumer options.
#[derive(Debug, Clone, Copy)]
pub struct ConsumeOptions {
    /// Redeliveries after the first failed attempt.
    pub max_redeliveries: u32,
    /// Wait before a failed message is redelivered.
    pub retry_backoff: Duration,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            max_redeliveries: 5,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Exchange the message was last published to.
    pub exchange: String,
    /// Routing key the message was last published with.
    pub routing_key: String,
    /// Raw body.
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

impl Delivery {
    /// Whether this is a redelivery.
    #[must_use]
    pub const fn redelivered(&self) -> bool {
        self.attempt > 1
    }

    /// Decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encoding`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.payload).map_err(|e| TransportError::Encoding(e.to_string()))
    }
}

/// Consumer callback. Returning an error requests redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync + std::fmt::Debug {
    /// Processes one delivery.
    async fn handle(&self, delivery: &Delivery) -> Result<(), BookingError>;
}

/// Topic-based publish/subscribe broker contract.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Declares a topic exchange. Idempotent.
    async fn declare_exchange(&self, name: &str) -> Result<(), TransportError>;

    /// Declares a queue. Idempotent.
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<(), TransportError>;

    /// Routes messages from `exchange` whose routing key matches `pattern`
    /// (`*` = one word, `#` = zero or more words) into `queue`.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), TransportError>;

    /// Publishes a message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError>;

    /// Starts consuming `queue` with `handler`.
    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        options: ConsumeOptions,
    ) -> Result<(), TransportError>;
}

/// Topic pattern match over `.`-separated words.
#[must_use]
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    words_match(&pattern, &key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            words_match(rest, key) || key.split_first().is_some_and(|(_, tail)| words_match(pattern, tail))
        }
        (Some((&"*", rest)), Some((_, tail))) => words_match(rest, tail),
        (Some((word, rest)), Some((candidate, tail))) => word == candidate && words_match(rest, tail),
        _ => false,
    }
}
