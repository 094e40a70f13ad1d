//! Expiration engine.
//!
//! Holds are released by a broker-managed delay: each reservation publishes
//! an expiration signal to the delay queue with a TTL equal to its remaining
//! hold time, and the signal is dead-lettered onto the expired queue once
//! that TTL elapses. The consumer then calls
//! [`ExpirationService::expire_if_needed`], whose conditional update makes any
//! number of deliveries safe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::SeatAvailabilityCache;
use crate::domain::events::{ReservationExpired, SeatReleased};
use crate::domain::{Clock, DomainEvent, Reservation, ReservationId, ReservationStatus, SeatStatus};
use crate::error::BookingError;
use crate::store::Store;
use crate::transport::{
    DEFAULT_EXCHANGE, Delivery, EventPublisher, MessageHandler, PublishOptions, Transport,
    TransportError,
};

/// Schedules and applies reservation expiry.
#[derive(Debug, Clone)]
pub struct ExpirationService {
    store: Arc<dyn Store>,
    cache: SeatAvailabilityCache,
    transport: Arc<dyn Transport>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    delay_queue: String,
    cache_ttl: Duration,
}

impl ExpirationService {
    /// Creates the engine. `delay_queue` must be declared with a dead-letter
    /// route to the expired queue.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: SeatAvailabilityCache,
        transport: Arc<dyn Transport>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        delay_queue: impl Into<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            transport,
            publisher,
            clock,
            delay_queue: delay_queue.into(),
            cache_ttl,
        }
    }

    /// Publishes the expiration signal for `reservation` to the delay queue.
    /// Already-due reservations get a zero TTL.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] if the signal cannot be published.
    pub async fn schedule(&self, reservation: &Reservation) -> Result<(), TransportError> {
        let signal = DomainEvent::ReservationExpired(ReservationExpired {
            reservation_id: reservation.id,
            session_id: reservation.session_id,
            user_id: reservation.user_id,
            seat_ids: reservation.seat_ids.clone(),
        });
        let payload = signal
            .to_payload()
            .map_err(|e| TransportError::Encoding(e.to_string()))?;
        let ttl = (reservation.expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        self.transport
            .publish(
                DEFAULT_EXCHANGE,
                &self.delay_queue,
                payload,
                PublishOptions { ttl: Some(ttl) },
            )
            .await
    }

    /// [`ExpirationService::schedule`], logging instead of failing.
    pub async fn schedule_best_effort(&self, reservation: &Reservation) {
        if let Err(err) = self.schedule(reservation).await {
            tracing::warn!(
                reservation_id = %reservation.id,
                expires_at = %reservation.expires_at,
                error = %err,
                "expiration scheduling failed"
            );
        }
    }

    /// Expires the reservation if it is still `RESERVED` and due.
    ///
    /// Returns `true` only for the call that performed the transition.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Infra`] if the flip or the lock release fails;
    /// the consumer relies on this to get the message redelivered.
    pub async fn expire_if_needed(&self, id: ReservationId) -> Result<bool, BookingError> {
        let now = self.clock.now();
        let Some(expired) = self.store.expire_if_due(id, now).await? else {
            tracing::debug!(reservation_id = %id, "expiration skipped, not due or not pending");
            return Ok(false);
        };

        tracing::info!(
            reservation_id = %expired.id,
            session_id = %expired.session_id,
            seat_count = expired.seat_ids.len(),
            "reservation expired"
        );
        self.announce_release(&expired).await;
        Ok(true)
    }

    /// Best-effort side effects of a committed expiry: cache the seats as
    /// available and publish `seat.released`.
    pub(crate) async fn announce_release(&self, reservation: &Reservation) {
        let event = DomainEvent::SeatReleased(SeatReleased {
            reservation_id: reservation.id,
            session_id: reservation.session_id,
            seat_ids: reservation.seat_ids.clone(),
        });
        let (cached, ()) = futures_util::join!(
            self.cache.set_statuses(
                reservation.session_id,
                &reservation.seat_ids,
                SeatStatus::Available,
                self.cache_ttl,
            ),
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

    /// Re-publishes the expiration signal of every pending reservation.
    ///
    /// Run once at start-up so that signals lost with a previous broker
    /// instance cannot strand a hold.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Infra`] if the pending set cannot be read.
    pub async fn reschedule_pending(&self) -> Result<usize, BookingError> {
        let pending = self.store.pending_reservations().await?;
        for reservation in &pending {
            self.schedule_best_effort(reservation).await;
        }
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "pending expirations rescheduled");
        }
        Ok(pending.len())
    }

    /// Handles one expiration signal. A reservation that is still pending
    /// but not yet due is scheduled again.
    async fn on_signal(&self, signal: &ReservationExpired) -> Result<(), BookingError> {
        if self.expire_if_needed(signal.reservation_id).await? {
            return Ok(());
        }
        let Some(reservation) = self.store.load_reservation(signal.reservation_id).await? else {
            tracing::warn!(reservation_id = %signal.reservation_id, "expiration signal for unknown reservation");
            return Ok(());
        };
        if reservation.status == ReservationStatus::Reserved && !reservation.is_due(self.clock.now()) {
            self.schedule(&reservation)
                .await
                .map_err(|e| BookingError::infra(e.to_string()))?;
        }
        Ok(())
    }
}

/// Consumer of the expired queue.
#[derive(Debug, Clone)]
pub struct ExpiredMessageHandler {
    expiration: Arc<ExpirationService>,
}

impl ExpiredMessageHandler {
    /// Wraps the engine.
    #[must_use]
    pub fn new(expiration: Arc<ExpirationService>) -> Self {
        Self { expiration }
    }
}

#[async_trait]
impl MessageHandler for ExpiredMessageHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), BookingError> {
        let signal: ReservationExpired = match delivery.json() {
            Ok(signal) => signal,
            Err(err) => {
                tracing::error!(
                    routing_key = %delivery.routing_key,
                    error = %err,
                    "malformed expiration signal discarded"
                );
                return Ok(());
            }
        };
        self.expiration.on_signal(&signal).await
    }
}
