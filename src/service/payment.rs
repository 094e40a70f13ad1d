//! Payment confirmation engine.
//!
//! Confirmation runs in one store transaction that holds a write lock on the
//! reservation row, so it serializes against a concurrent expiry of the same
//! reservation. The global uniqueness of sale seats is the last line of
//! defense against selling a seat twice.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::SeatAvailabilityCache;
use crate::domain::events::PaymentConfirmed;
use crate::domain::{
    Clock, DomainEvent, Reservation, ReservationId, ReservationStatus, Sale, SaleFilter, SaleId,
    SeatStatus, UserId, max_amount, total_amount,
};
use crate::error::BookingError;
use crate::store::{Page, PageRequest, Store};
use crate::transport::EventPublisher;

use super::ExpirationService;

/// Confirms payments and serves sale reads.
#[derive(Debug, Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    cache: SeatAvailabilityCache,
    expiration: Arc<ExpirationService>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
}

impl PaymentService {
    /// Creates the engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: SeatAvailabilityCache,
        expiration: Arc<ExpirationService>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            expiration,
            publisher,
            clock,
            cache_ttl,
        }
    }

    /// Promotes a reservation to a sale.
    ///
    /// Confirming an already confirmed reservation returns the existing sale
    /// and emits nothing.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`]: unknown reservation or session.
    /// - [`BookingError::Conflict`]: the reservation expired, or a seat was sold meanwhile.
    /// - [`BookingError::BadInput`]: the reservation holds no seats, or its total is out of range.
    /// - [`BookingError::Infra`]: store failure.
    pub async fn confirm(&self, reservation_id: ReservationId) -> Result<Sale, BookingError> {
        let now = self.clock.now();
        let mut tx = self.store.begin_payment().await?;

        let reservation = tx
            .lock_reservation(reservation_id)
            .await?
            .ok_or_else(|| BookingError::not_found("Reservation not found."))?;

        match reservation.status {
            ReservationStatus::Confirmed => {
                // A replay marks no new seats, so the cache is left untouched.
                let existing = tx.load_sale_by_reservation(reservation_id).await?;
                drop(tx);
                return match existing {
                    Some(sale) => {
                        tracing::debug!(
                            reservation_id = %reservation_id,
                            sale_id = %sale.id,
                            "confirmation replayed"
                        );
                        Ok(sale)
                    }
                    None => Err(BookingError::conflict("Reservation already confirmed.")),
                };
            }
            ReservationStatus::Expired => {
                return Err(BookingError::conflict("Reservation expired."));
            }
            ReservationStatus::Reserved if reservation.is_due(now) => {
                let flipped = tx.expire_if_due(reservation_id, now).await?;
                tx.commit().await?;
                if flipped {
                    tracing::info!(
                        reservation_id = %reservation_id,
                        session_id = %reservation.session_id,
                        "reservation expired at confirmation"
                    );
                    let expired = Reservation {
                        status: ReservationStatus::Expired,
                        ..reservation
                    };
                    self.expiration.announce_release(&expired).await;
                }
                return Err(BookingError::conflict("Reservation expired."));
            }
            ReservationStatus::Reserved => {}
        }

        if reservation.seat_ids.is_empty() {
            return Err(BookingError::bad_input("Reservation has no seats."));
        }

        let sold = tx
            .sold_seat_ids(reservation.session_id, &reservation.seat_ids)
            .await?;
        if !sold.is_empty() {
            return Err(BookingError::conflict("Some seats are already sold."));
        }

        let session = tx
            .load_session(reservation.session_id)
            .await?
            .ok_or_else(|| BookingError::not_found("Session not found."))?;

        let total = total_amount(session.price, reservation.seat_ids.len());
        if total > max_amount() {
            return Err(BookingError::bad_input(
                "Total amount exceeds the supported range.",
            ));
        }

        let sale = Sale {
            id: SaleId::new(),
            session_id: reservation.session_id,
            user_id: reservation.user_id,
            reservation_id: Some(reservation.id),
            seat_ids: reservation.seat_ids.clone(),
            total_amount: total,
            created_at: now,
        };
        tx.insert_sale(&sale).await?;

        if !tx.mark_confirmed(reservation_id).await? {
            return Err(BookingError::conflict("Reservation is no longer pending."));
        }
        tx.commit().await?;

        tracing::info!(
            reservation_id = %reservation_id,
            sale_id = %sale.id,
            session_id = %sale.session_id,
            seat_count = sale.seat_ids.len(),
            total_amount = %sale.total_amount,
            "payment confirmed"
        );

        let event = DomainEvent::PaymentConfirmed(PaymentConfirmed {
            sale_id: sale.id,
            reservation_id,
            session_id: sale.session_id,
            user_id: sale.user_id,
            seat_ids: sale.seat_ids.clone(),
            total_amount: sale.total_amount,
        });
        futures_util::join!(
            self.mark_sold(&sale),
            self.publisher.publish_best_effort(&event),
        );
        Ok(sale)
    }

    /// Loads a sale.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if it does not exist.
    pub async fn load_sale(&self, id: SaleId) -> Result<Sale, BookingError> {
        self.store
            .load_sale(id)
            .await?
            .ok_or_else(|| BookingError::not_found("Sale not found."))
    }

    /// A user's purchases, newest first.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown user.
    pub async fn purchase_history(
        &self,
        user_id: UserId,
        filter: &SaleFilter,
        page: PageRequest,
    ) -> Result<Page<Sale>, BookingError> {
        if self.store.load_user(user_id).await?.is_none() {
            return Err(BookingError::not_found("User not found."));
        }
        Ok(self.store.purchase_history(user_id, filter, page).await?)
    }

    async fn mark_sold(&self, sale: &Sale) {
        if let Err(err) = self
            .cache
            .set_statuses(
                sale.session_id,
                &sale.seat_ids,
                SeatStatus::Sold,
                self.cache_ttl,
            )
            .await
        {
            tracing::warn!(sale_id = %sale.id, error = %err, "availability cache update failed");
        }
    }
}
