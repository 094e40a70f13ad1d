//! Redis-backed cache.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::{CacheError, KeyValueCache};

/// Cache over a Redis connection manager. Clones share the connection.
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connects to `redis_url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the URL is invalid or the
    /// first connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(format!("redis connection failed: {e}")))?;
        Ok(Self { conn_manager })
    }
}

fn unavailable(err: &redis::RedisError) -> CacheError {
    CacheError::Unavailable(err.to_string())
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .hset(key, field, value)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(())
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<(), CacheError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .hset_multiple(key, fields)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(())
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.conn_manager.clone();
        conn.hgetall(key).await.map_err(|e| unavailable(&e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let seconds = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        let _: () = conn
            .expire(key, seconds)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(())
    }
}
