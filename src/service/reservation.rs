//! Reservation engine.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::SeatAvailabilityCache;
use crate::domain::events::ReservationCreated;
use crate::domain::{
    Clock, DomainEvent, NewReservation, Reservation, ReservationFilter, ReservationId, SeatId,
    SeatStatus, SessionId, UserId, normalize_idempotency_key, normalize_seat_ids,
};
use crate::error::BookingError;
use crate::store::constraints::{RESERVATION_IDEMPOTENCY_KEY, SEAT_LOCK_ACTIVE_SEAT};
use crate::store::{Page, PageRequest, Store};
use crate::transport::EventPublisher;

use super::ExpirationService;

/// Input of [`ReservationService::create`].
#[derive(Debug, Clone)]
pub struct CreateReservation {
    /// Session the seats belong to.
    pub session_id: SessionId,
    /// Requesting user.
    pub user_id: UserId,
    /// Requested seats, in any order.
    pub seat_ids: Vec<SeatId>,
    /// Optional client retry key.
    pub idempotency_key: Option<String>,
}

/// Creates reservations and serves reservation reads.
#[derive(Debug, Clone)]
pub struct ReservationService {
    store: Arc<dyn Store>,
    cache: SeatAvailabilityCache,
    expiration: Arc<ExpirationService>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
}

impl ReservationService {
    /// Creates the engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: SeatAvailabilityCache,
        expiration: Arc<ExpirationService>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            expiration,
            publisher,
            clock,
            hold_ttl,
        }
    }

    /// Reserves seats for a user.
    ///
    /// Retrying with the same idempotency key and the same request returns
    /// the original reservation unchanged.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BadInput`]: empty or duplicate seat list, seats outside the session, or an oversized key.
    /// - [`BookingError::NotFound`]: unknown session or user.
    /// - [`BookingError::Conflict`]: a seat is sold or held, or the key was used for another request.
    /// - [`BookingError::Infra`]: store failure.
    pub async fn create(&self, request: CreateReservation) -> Result<Reservation, BookingError> {
        let seat_ids = normalize_seat_ids(&request.seat_ids)?;
        let idempotency_key = normalize_idempotency_key(request.idempotency_key.as_deref())?;

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self
                .store
                .find_by_idempotency_key(request.user_id, key)
                .await?
            {
                return replay(existing, request.session_id, &seat_ids);
            }
        }

        self.check_seats_belong(request.session_id, &seat_ids).await?;
        self.sweep_stale_locks(&seat_ids).await?;
        if let Err(err) = self.check_availability(request.session_id, &seat_ids).await {
            return self
                .replay_on_conflict(
                    request.user_id,
                    idempotency_key.as_deref(),
                    request.session_id,
                    &seat_ids,
                    err,
                )
                .await;
        }

        let now = self.clock.now();
        let hold = chrono::Duration::from_std(self.hold_ttl)
            .map_err(|e| BookingError::infra(format!("invalid hold duration: {e}")))?;
        let new = NewReservation {
            id: ReservationId::new(),
            session_id: request.session_id,
            user_id: request.user_id,
            seat_ids,
            expires_at: now + hold,
            idempotency_key,
            created_at: now,
        };

        let reservation = match self.store.insert_reservation(&new).await {
            Ok(reservation) => reservation,
            Err(err) if err.violates(RESERVATION_IDEMPOTENCY_KEY) => {
                return self.resolve_key_race(&new).await;
            }
            Err(err) if err.violates(SEAT_LOCK_ACTIVE_SEAT) => {
                return self
                    .replay_on_conflict(
                        new.user_id,
                        new.idempotency_key.as_deref(),
                        new.session_id,
                        &new.seat_ids,
                        err.into(),
                    )
                    .await;
            }
            Err(err) => {
                tracing::debug!(session_id = %new.session_id, error = %err, "reservation insert rejected");
                return Err(err.into());
            }
        };

        tracing::info!(
            reservation_id = %reservation.id,
            session_id = %reservation.session_id,
            user_id = %reservation.user_id,
            seat_count = reservation.seat_ids.len(),
            expires_at = %reservation.expires_at,
            "reservation created"
        );
        self.after_commit(&reservation).await;
        Ok(reservation)
    }

    /// Loads a reservation.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if it does not exist.
    pub async fn load(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        self.store
            .load_reservation(id)
            .await?
            .ok_or_else(|| BookingError::not_found("Reservation not found."))
    }

    /// Lists reservations, newest first.
    ///
    /// # Errors
    ///
    /// [`BookingError::Infra`] on store failure.
    pub async fn list(
        &self,
        filter: &ReservationFilter,
        page: PageRequest,
    ) -> Result<Page<Reservation>, BookingError> {
        Ok(self.store.list_reservations(filter, page).await?)
    }

    async fn check_seats_belong(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
    ) -> Result<(), BookingError> {
        if self.store.load_session(session_id).await?.is_none() {
            return Err(BookingError::not_found("Session not found."));
        }
        let seats = self.store.load_seats(session_id).await?;
        let known: HashSet<SeatId> = seats.iter().map(|s| s.id).collect();
        if seat_ids.iter().any(|id| !known.contains(id)) {
            return Err(BookingError::bad_input(
                "Some seats were not found for this session.",
            ));
        }
        Ok(())
    }

    /// Expires reservations whose elapsed locks still cover the requested seats.
    async fn sweep_stale_locks(&self, seat_ids: &[SeatId]) -> Result<(), BookingError> {
        let stale = self
            .store
            .stale_lock_reservation_ids(seat_ids, self.clock.now())
            .await?;
        for id in stale {
            self.expiration.expire_if_needed(id).await?;
        }
        Ok(())
    }

    /// Advisory pre-check. The seat-lock constraint is the real guard.
    async fn check_availability(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
    ) -> Result<(), BookingError> {
        let (sold, locked) = futures_util::try_join!(
            self.store.sold_seat_ids(session_id, seat_ids),
            self.store.active_locked_seat_ids(seat_ids, self.clock.now()),
        )?;
        if !sold.is_empty() {
            return Err(BookingError::conflict("Some seats are already sold."));
        }
        if !locked.is_empty() {
            return Err(BookingError::conflict("Some seats are already reserved."));
        }
        Ok(())
    }

    /// Another request with the same key committed first: answer with the winner.
    async fn resolve_key_race(&self, new: &NewReservation) -> Result<Reservation, BookingError> {
        let key = new.idempotency_key.as_deref().unwrap_or_default();
        let winner = self
            .store
            .find_by_idempotency_key(new.user_id, key)
            .await?
            .ok_or_else(|| BookingError::conflict("Idempotency key already used."))?;
        tracing::info!(
            reservation_id = %winner.id,
            user_id = %new.user_id,
            "concurrent retry resolved to existing reservation"
        );
        replay(winner, new.session_id, &new.seat_ids)
    }

    /// A request with the same key may have committed after our key lookup,
    /// in which case its locks are what we conflicted with.
    async fn replay_on_conflict(
        &self,
        user_id: UserId,
        key: Option<&str>,
        session_id: SessionId,
        seat_ids: &[SeatId],
        err: BookingError,
    ) -> Result<Reservation, BookingError> {
        let Some(key) = key.filter(|_| matches!(err, BookingError::Conflict(_))) else {
            return Err(err);
        };
        match self.store.find_by_idempotency_key(user_id, key).await? {
            Some(winner) => {
                tracing::info!(
                    reservation_id = %winner.id,
                    user_id = %user_id,
                    "seat conflict resolved to same-key reservation"
                );
                replay(winner, session_id, seat_ids)
            }
            None => Err(err),
        }
    }

    async fn after_commit(&self, reservation: &Reservation) {
        let event = DomainEvent::ReservationCreated(ReservationCreated {
            id: reservation.id,
            session_id: reservation.session_id,
            user_id: reservation.user_id,
            seat_ids: reservation.seat_ids.clone(),
            expires_at: reservation.expires_at,
        });
        let (cached, (), ()) = futures_util::join!(
            self.cache.set_statuses(
                reservation.session_id,
                &reservation.seat_ids,
                SeatStatus::Reserved,
                self.hold_ttl,
            ),
            self.expiration.schedule_best_effort(reservation),
            self.publisher.publish_best_effort(&event),
        );
        if let Err(err) = cached {
            tracing::warn!(
                reservation_id = %reservation.id,
                error = %err,
                "availability cache update failed"
            );
        }
    }
}

fn replay(
    existing: Reservation,
    session_id: SessionId,
    seat_ids: &[SeatId],
) -> Result<Reservation, BookingError> {
    if existing.matches_request(session_id, seat_ids) {
        Ok(existing)
    } else {
        Err(BookingError::conflict(
            "Idempotency key already used for a different request.",
        ))
    }
}
