//! Per-session seat status hash: `session:{id}:seats` → `{seat_id: status}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheError, KeyValueCache};
use crate::domain::{SeatId, SeatStatus, SessionId};

/// Typed view over a [`KeyValueCache`] for seat statuses.
#[derive(Debug, Clone)]
pub struct SeatAvailabilityCache {
    cache: Arc<dyn KeyValueCache>,
}

impl SeatAvailabilityCache {
    /// Wraps a raw cache.
    #[must_use]
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    /// Cache key of a session's seat hash.
    #[must_use]
    pub fn key(session_id: SessionId) -> String {
        format!("session:{session_id}:seats")
    }

    /// Writes the same status for every seat in `seat_ids` and refreshes the key TTL.
    ///
    /// # Errors
    ///
    /// Returns the backend [`CacheError`].
    pub async fn set_statuses(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        status: SeatStatus,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entries: Vec<(SeatId, SeatStatus)> =
            seat_ids.iter().map(|&seat_id| (seat_id, status)).collect();
        self.set_entries(session_id, &entries, ttl).await
    }

    /// Writes individual statuses and refreshes the key TTL.
    ///
    /// # Errors
    ///
    /// Returns the backend [`CacheError`].
    pub async fn set_entries(
        &self,
        session_id: SessionId,
        entries: &[(SeatId, SeatStatus)],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let key = Self::key(session_id);
        let fields: Vec<(String, String)> = entries
            .iter()
            .map(|(seat_id, status)| (seat_id.to_string(), status.as_str().to_string()))
            .collect();
        self.cache.set_fields(&key, &fields).await?;
        self.cache.expire(&key, ttl).await
    }

    /// Every cached seat status of a session. Fields that do not parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns the backend [`CacheError`].
    pub async fn get_statuses(
        &self,
        session_id: SessionId,
    ) -> Result<HashMap<SeatId, SeatStatus>, CacheError> {
        let raw = self.cache.get_all_fields(&Self::key(session_id)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(field, value)| {
                let seat_id = uuid::Uuid::parse_str(&field).ok()?;
                let status = value.parse::<SeatStatus>().ok()?;
                Some((SeatId::from(seat_id), status))
            })
            .collect())
    }
}
