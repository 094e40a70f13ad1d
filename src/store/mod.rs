//! Store layer: the authoritative relational state.
//!
//! Every double-booking defense ultimately rests on the uniqueness
//! constraints enforced here. The contracts are split per entity and
//! implemented twice: [`PgStore`] on PostgreSQL and [`MemoryStore`] in
//! process, both raising [`StoreError::UniqueViolation`] with the same
//! constraint names so the engines can classify failures uniformly.

pub mod constraints;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    NewReservation, Reservation, ReservationFilter, ReservationId, Sale, SaleFilter, SaleId, Seat,
    SeatId, Session, SessionId, User, UserId,
};
use crate::error::BookingError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Failure raised by a store implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint or unique index rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// A foreign key constraint rejected the write.
    #[error("foreign key constraint violated: {constraint}")]
    ForeignKeyViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Name of the violated constraint, if this is a constraint failure.
    #[must_use]
    pub fn constraint(&self) -> Option<&str> {
        match self {
            Self::UniqueViolation { constraint } | Self::ForeignKeyViolation { constraint } => {
                Some(constraint)
            }
            Self::Database(_) => None,
        }
    }

    /// Whether this is a violation of the named constraint.
    #[must_use]
    pub fn violates(&self, name: &str) -> bool {
        self.constraint() == Some(name)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            let constraint = db.constraint().unwrap_or_default().to_string();
            match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return Self::UniqueViolation { constraint };
                }
                sqlx::error::ErrorKind::ForeignKeyViolation => {
                    return Self::ForeignKeyViolation { constraint };
                }
                _ => {}
            }
        }
        Self::Database(err.to_string())
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        if let Some(mapped) = err.constraint().and_then(constraints::classify) {
            return mapped;
        }
        tracing::error!(error = %err, "store failure");
        Self::infra(err.to_string())
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Page number, 1-indexed.
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
}

impl PageRequest {
    /// Rows to skip.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * (self.per_page as u64)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

/// A page of results plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total matching rows across all pages.
    pub total: u64,
}

/// Sessions and their seats.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a session and all its seats atomically.
    async fn insert_session(&self, session: &Session, seats: &[Seat]) -> Result<(), StoreError>;

    /// Loads a session.
    async fn load_session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    /// Loads every seat of a session in creation order.
    async fn load_seats(&self, session_id: SessionId) -> Result<Vec<Seat>, StoreError>;
}

/// Users.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user. Fails on a duplicate email.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    /// Loads a user.
    async fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError>;
}

/// Reservations, their seats and their seat locks.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Finds the reservation a user created with `key`.
    async fn find_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Seats of `session_id` among `seat_ids` that have a sale seat.
    async fn sold_seat_ids(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, StoreError>;

    /// Seats among `seat_ids` held by an unreleased, unexpired lock of a
    /// reservation that is still `RESERVED`.
    async fn active_locked_seat_ids(
        &self,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, StoreError>;

    /// `RESERVED` reservations owning an unreleased but elapsed lock on any of `seat_ids`.
    async fn stale_lock_reservation_ids(
        &self,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationId>, StoreError>;

    /// Inserts the reservation, one reservation seat and one seat lock per
    /// seat in a single transaction.
    async fn insert_reservation(&self, new: &NewReservation) -> Result<Reservation, StoreError>;

    /// Flips `RESERVED -> EXPIRED` if `expires_at <= now` and releases the
    /// reservation's seat locks, atomically. Returns the expired
    /// reservation, or `None` when nothing changed.
    async fn expire_if_due(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Loads a reservation with its seats.
    async fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Lists reservations newest first.
    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
        page: PageRequest,
    ) -> Result<Page<Reservation>, StoreError>;

    /// Every reservation still `RESERVED`, oldest expiry first.
    async fn pending_reservations(&self) -> Result<Vec<Reservation>, StoreError>;
}

/// Sales and the payment transaction.
#[async_trait]
pub trait SaleStore: Send + Sync {
    /// Opens a payment transaction. Dropping it without
    /// [`PaymentTx::commit`] rolls back.
    async fn begin_payment(&self) -> Result<Box<dyn PaymentTx>, StoreError>;

    /// Loads a sale with its seats.
    async fn load_sale(&self, id: SaleId) -> Result<Option<Sale>, StoreError>;

    /// A user's sales, newest first.
    async fn purchase_history(
        &self,
        user_id: UserId,
        filter: &SaleFilter,
        page: PageRequest,
    ) -> Result<Page<Sale>, StoreError>;
}

/// Append-only log of every published event.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Appends one event.
    async fn append_event(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Operations available inside a payment transaction.
///
/// The reservation row stays write-locked from [`PaymentTx::lock_reservation`]
/// until commit or drop.
#[async_trait]
pub trait PaymentTx: Send {
    /// Loads the reservation with a pessimistic write lock.
    async fn lock_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Sale created from `reservation_id`, if any.
    async fn load_sale_by_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Sale>, StoreError>;

    /// Conditional `RESERVED -> EXPIRED` flip plus lock release. Returns whether a row changed.
    async fn expire_if_due(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Seats of `session_id` among `seat_ids` that already have a sale seat.
    async fn sold_seat_ids(
        &mut self,
        session_id: SessionId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, StoreError>;

    /// Loads a session.
    async fn load_session(&mut self, id: SessionId) -> Result<Option<Session>, StoreError>;

    /// Inserts the sale and one sale seat per seat.
    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError>;

    /// Conditional `RESERVED -> CONFIRMED` flip. Returns whether a row changed.
    async fn mark_confirmed(&mut self, id: ReservationId) -> Result<bool, StoreError>;

    /// Commits every write made through this transaction.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Everything the engines need from the store.
pub trait Store:
    SessionStore + UserStore + ReservationStore + SaleStore + EventLogStore + std::fmt::Debug
{
}

impl<T> Store for T where
    T: SessionStore + UserStore + ReservationStore + SaleStore + EventLogStore + std::fmt::Debug
{
}
