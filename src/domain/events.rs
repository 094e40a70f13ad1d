//! Domain events published on the events exchange.
//!
//! The routing key of every event is its [`DomainEvent::name`]; the message
//! body is the bare payload struct serialized as camelCase JSON. Field names
//! are a wire contract shared with other consumers and must not change.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ReservationId, SaleId, SeatId, SessionId, UserId};

/// Routing key of [`ReservationCreated`].
pub const RESERVATION_CREATED: &str = "reservation.created";
/// Routing key of [`ReservationExpired`].
pub const RESERVATION_EXPIRED: &str = "reservation.expired";
/// Routing key of [`SeatReleased`].
pub const SEAT_RELEASED: &str = "seat.released";
/// Routing key of [`PaymentConfirmed`].
pub const PAYMENT_CONFIRMED: &str = "payment.confirmed";

/// A reservation was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCreated {
    /// Reservation identifier.
    pub id: ReservationId,
    /// Session identifier.
    pub session_id: SessionId,
    /// Owner.
    pub user_id: UserId,
    /// Held seats.
    pub seat_ids: Vec<SeatId>,
    /// End of the hold window.
    pub expires_at: DateTime<Utc>,
}

/// Expiration signal. Travels through the delay queue and is dead-lettered
/// onto the events exchange once its TTL elapses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationExpired {
    /// Reservation identifier.
    pub reservation_id: ReservationId,
    /// Session identifier.
    pub session_id: SessionId,
    /// Owner.
    pub user_id: UserId,
    /// Held seats.
    pub seat_ids: Vec<SeatId>,
}

/// Seat locks of an expired reservation were released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatReleased {
    /// Reservation whose locks were released.
    pub reservation_id: ReservationId,
    /// Session identifier.
    pub session_id: SessionId,
    /// Released seats.
    pub seat_ids: Vec<SeatId>,
}

/// A reservation was promoted to a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmed {
    /// New sale.
    pub sale_id: SaleId,
    /// Originating reservation.
    pub reservation_id: ReservationId,
    /// Session identifier.
    pub session_id: SessionId,
    /// Buyer.
    pub user_id: UserId,
    /// Sold seats.
    pub seat_ids: Vec<SeatId>,
    /// Amount charged, serialized as a string with two decimals.
    pub total_amount: Decimal,
}

/// Any event the engines emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// See [`ReservationCreated`].
    ReservationCreated(ReservationCreated),
    /// See [`ReservationExpired`].
    ReservationExpired(ReservationExpired),
    /// See [`SeatReleased`].
    SeatReleased(SeatReleased),
    /// See [`PaymentConfirmed`].
    PaymentConfirmed(PaymentConfirmed),
}

impl DomainEvent {
    /// Event name, used as routing key and as `event_name` in the audit log.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReservationCreated(_) => RESERVATION_CREATED,
            Self::ReservationExpired(_) => RESERVATION_EXPIRED,
            Self::SeatReleased(_) => SEAT_RELEASED,
            Self::PaymentConfirmed(_) => PAYMENT_CONFIRMED,
        }
    }

    /// Session the event concerns.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        match self {
            Self::ReservationCreated(e) => e.session_id,
            Self::ReservationExpired(e) => e.session_id,
            Self::SeatReleased(e) => e.session_id,
            Self::PaymentConfirmed(e) => e.session_id,
        }
    }

    /// Serializes the payload (without any envelope).
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::ReservationCreated(e) => serde_json::to_vec(e),
            Self::ReservationExpired(e) => serde_json::to_vec(e),
            Self::SeatReleased(e) => serde_json::to_vec(e),
            Self::PaymentConfirmed(e) => serde_json::to_vec(e),
        }
    }
}
