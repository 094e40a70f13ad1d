//! Availability read model.
//!
//! Answers "what is free right now" from the cache when it covers every
//! seat, and from the store otherwise. The store computation is the arbiter;
//! the cache is only ever an optimization.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::SeatAvailabilityCache;
use crate::domain::{
    Clock, Seat, SeatAvailability, SeatId, SeatStatus, SessionAvailability, SessionId,
};
use crate::error::BookingError;
use crate::store::Store;

/// Serves per-seat availability for a session.
#[derive(Debug, Clone)]
pub struct AvailabilityService {
    store: Arc<dyn Store>,
    cache: SeatAvailabilityCache,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
}

impl AvailabilityService {
    /// Creates the read model.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: SeatAvailabilityCache,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            cache_ttl,
        }
    }

    /// Status of every seat of a session, in seat order.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown session,
    /// [`BookingError::Infra`] if the store fallback fails.
    pub async fn load(&self, session_id: SessionId) -> Result<SessionAvailability, BookingError> {
        if self.store.load_session(session_id).await?.is_none() {
            return Err(BookingError::not_found("Session not found."));
        }
        let seats = self.store.load_seats(session_id).await?;

        match self.cache.get_statuses(session_id).await {
            Ok(cached) if covers(&cached, &seats) => {
                tracing::debug!(session_id = %session_id, "availability served from cache");
                return Ok(assemble(session_id, seats, &cached));
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "availability cache read failed");
            }
        }

        let computed = self.compute(session_id, &seats).await?;
        self.repopulate(session_id, &computed).await;
        Ok(assemble(session_id, seats, &computed))
    }

    /// Sold beats reserved beats available.
    async fn compute(
        &self,
        session_id: SessionId,
        seats: &[Seat],
    ) -> Result<HashMap<SeatId, SeatStatus>, BookingError> {
        let seat_ids: Vec<SeatId> = seats.iter().map(|s| s.id).collect();
        let (sold, locked) = futures_util::try_join!(
            self.store.sold_seat_ids(session_id, &seat_ids),
            self.store.active_locked_seat_ids(&seat_ids, self.clock.now()),
        )?;
        let sold: HashSet<SeatId> = sold.into_iter().collect();
        let locked: HashSet<SeatId> = locked.into_iter().collect();

        Ok(seat_ids
            .into_iter()
            .map(|id| {
                let status = if sold.contains(&id) {
                    SeatStatus::Sold
                } else if locked.contains(&id) {
                    SeatStatus::Reserved
                } else {
                    SeatStatus::Available
                };
                (id, status)
            })
            .collect())
    }

    async fn repopulate(&self, session_id: SessionId, statuses: &HashMap<SeatId, SeatStatus>) {
        let entries: Vec<(SeatId, SeatStatus)> =
            statuses.iter().map(|(&id, &status)| (id, status)).collect();
        if let Err(err) = self
            .cache
            .set_entries(session_id, &entries, self.cache_ttl)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %err, "availability cache refill failed");
        }
    }
}

fn covers(cached: &HashMap<SeatId, SeatStatus>, seats: &[Seat]) -> bool {
    seats.iter().all(|seat| cached.contains_key(&seat.id))
}

fn assemble(
    session_id: SessionId,
    seats: Vec<Seat>,
    statuses: &HashMap<SeatId, SeatStatus>,
) -> SessionAvailability {
    SessionAvailability {
        session_id,
        seats: seats
            .into_iter()
            .map(|seat| SeatAvailability {
                status: statuses
                    .get(&seat.id)
                    .copied()
                    .unwrap_or(SeatStatus::Available),
                id: seat.id,
                label: seat.label,
            })
            .collect(),
    }
}
