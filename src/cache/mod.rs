//! Availability cache: a best-effort key/field store.
//!
//! Nothing read from here is authoritative. Callers treat every
//! [`CacheError`] as a reason to log and fall back, never to fail.

pub mod memory;
pub mod redis_cache;
pub mod seat_availability;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;
pub use seat_availability::SeatAvailabilityCache;

/// Failure talking to the cache backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The backend could not be reached or rejected the command.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Minimal hash-of-fields contract.
#[async_trait]
pub trait KeyValueCache: Send + Sync + std::fmt::Debug {
    /// Sets one field of the hash at `key`.
    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;

    /// Sets several fields of the hash at `key`.
    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<(), CacheError> {
        for (field, value) in fields {
            self.set_field(key, field, value).await?;
        }
        Ok(())
    }

    /// Every field of the hash at `key`. Missing keys yield an empty map.
    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    /// Expires the whole hash at `key` after `ttl`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
}
