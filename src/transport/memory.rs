//! In-process broker with per-message TTL and dead-letter routing.
//!
//! A TTL message that lands on a queue without a consumer waits out its TTL
//! on a timer and is then re-published to the queue's dead-letter target.
//! Queues with a consumer deliver immediately. Each queue is an unbounded
//! channel drained by a single consumer task.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    ConsumeOptions, DEFAULT_EXCHANGE, DeadLetter, Delivery, MessageHandler, PublishOptions,
    QueueOptions, Transport, TransportError, topic_matches,
};

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    ttl: Option<Duration>,
    attempt: u32,
}

#[derive(Debug)]
struct Queue {
    sender: mpsc::UnboundedSender<Message>,
    receiver: Option<mpsc::UnboundedReceiver<Message>>,
    dead_letter: Option<DeadLetter>,
    consumed: bool,
}

#[derive(Debug)]
struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
}

/// Broker living in the current process.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates a broker with only the default exchange.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Closed("broker state poisoned".to_string()))
    }

    /// Routes `message` from its exchange into every matching queue.
    fn route(&self, message: &Message) -> Result<(), TransportError> {
        let targets: Vec<String> = {
            let state = self.lock()?;
            if message.exchange == DEFAULT_EXCHANGE {
                if !state.queues.contains_key(&message.routing_key) {
                    return Err(TransportError::UnknownQueue(message.routing_key.clone()));
                }
                vec![message.routing_key.clone()]
            } else {
                if !state.exchanges.contains(&message.exchange) {
                    return Err(TransportError::UnknownExchange(message.exchange.clone()));
                }
                let mut queues: Vec<String> = state
                    .bindings
                    .iter()
                    .filter(|b| {
                        b.exchange == message.exchange
                            && topic_matches(&b.pattern, &message.routing_key)
                    })
                    .map(|b| b.queue.clone())
                    .collect();
                queues.sort_unstable();
                queues.dedup();
                queues
            }
        };

        if targets.is_empty() {
            tracing::debug!(
                exchange = %message.exchange,
                routing_key = %message.routing_key,
                "message matched no binding, dropped"
            );
        }
        for queue in targets {
            self.enqueue(&queue, message.clone())?;
        }
        Ok(())
    }

    fn enqueue(&self, queue_name: &str, message: Message) -> Result<(), TransportError> {
        let state = self.lock()?;
        let queue = state
            .queues
            .get(queue_name)
            .ok_or_else(|| TransportError::UnknownQueue(queue_name.to_string()))?;

        match message.ttl {
            Some(ttl) if !queue.consumed => {
                let broker = self.clone();
                let queue_name = queue_name.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    broker.dead_letter(&queue_name, message);
                });
                Ok(())
            }
            _ => queue
                .sender
                .send(message)
                .map_err(|_| TransportError::Closed(format!("queue {queue_name} closed"))),
        }
    }

    /// Re-publishes a message to the queue's dead-letter target, or drops it.
    fn dead_letter(&self, queue_name: &str, message: Message) {
        let target = match self.lock() {
            Ok(state) => state
                .queues
                .get(queue_name)
                .and_then(|q| q.dead_letter.clone()),
            Err(err) => {
                tracing::error!(queue = queue_name, error = %err, "dead-letter lookup failed");
                return;
            }
        };

        let Some(target) = target else {
            tracing::warn!(
                queue = queue_name,
                routing_key = %message.routing_key,
                "message discarded without dead-letter target"
            );
            return;
        };

        let rerouted = Message {
            exchange: target.exchange,
            routing_key: target.routing_key,
            payload: message.payload,
            ttl: None,
            attempt: 1,
        };
        if let Err(err) = self.route(&rerouted) {
            tracing::error!(queue = queue_name, error = %err, "dead-letter routing failed");
        }
    }

    fn redeliver_later(&self, queue_name: &str, mut message: Message, backoff: Duration) {
        message.attempt = message.attempt.saturating_add(1);
        let broker = self.clone();
        let queue_name = queue_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if let Err(err) = broker.enqueue(&queue_name, message) {
                tracing::error!(queue = %queue_name, error = %err, "redelivery failed");
            }
        });
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn declare_exchange(&self, name: &str) -> Result<(), TransportError> {
        self.lock()?.exchanges.insert(name.to_string());
        Ok(())
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        state.queues.entry(name.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            Queue {
                sender,
                receiver: Some(receiver),
                dead_letter: options.dead_letter,
                consumed: false,
            }
        });
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if !state.exchanges.contains(exchange) {
            return Err(TransportError::UnknownExchange(exchange.to_string()));
        }
        if !state.queues.contains_key(queue) {
            return Err(TransportError::UnknownQueue(queue.to_string()));
        }
        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.pattern == pattern);
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                pattern: pattern.to_string(),
                queue: queue.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        self.route(&Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            ttl: options.ttl,
            attempt: 1,
        })
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        options: ConsumeOptions,
    ) -> Result<(), TransportError> {
        let mut receiver = {
            let mut state = self.lock()?;
            let entry = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;
            let receiver = entry
                .receiver
                .take()
                .ok_or_else(|| TransportError::AlreadyConsumed(queue.to_string()))?;
            entry.consumed = true;
            receiver
        };

        let broker = self.clone();
        let queue_name = queue.to_string();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let delivery = Delivery {
                    exchange: message.exchange.clone(),
                    routing_key: message.routing_key.clone(),
                    payload: message.payload.clone(),
                    attempt: message.attempt,
                };
                let Err(err) = handler.handle(&delivery).await else {
                    continue;
                };
                if message.attempt <= options.max_redeliveries {
                    tracing::warn!(
                        queue = %queue_name,
                        attempt = message.attempt,
                        error = %err,
                        "handler failed, scheduling redelivery"
                    );
                    broker.redeliver_later(&queue_name, message, options.retry_backoff);
                } else {
                    tracing::error!(
                        queue = %queue_name,
                        attempt = message.attempt,
                        error = %err,
                        "handler failed, redeliveries exhausted"
                    );
                    broker.dead_letter(&queue_name, message);
                }
            }
            tracing::debug!(queue = %queue_name, "consumer stopped");
        });
        Ok(())
    }
}
