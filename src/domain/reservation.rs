//! Reservations: temporary holds on a set of seats.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ReservationId, SeatId, SessionId, UserId};
use crate::error::BookingError;

/// Reservation lifecycle state.
///
/// The only legal transitions are `Reserved -> Expired` and
/// `Reserved -> Confirmed`. Both targets are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Seats are held until `expires_at`.
    Reserved,
    /// The hold lapsed and its seat locks were released.
    Expired,
    /// Payment was confirmed and a sale exists.
    Confirmed,
}

impl ReservationStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "RESERVED",
            Self::Expired => "EXPIRED",
            Self::Confirmed => "CONFIRMED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESERVED" => Ok(Self::Reserved),
            "EXPIRED" => Ok(Self::Expired),
            "CONFIRMED" => Ok(Self::Confirmed),
            other => Err(BookingError::bad_input(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }
}

/// A reservation together with the seats it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Reservation identifier.
    pub id: ReservationId,
    /// Session the seats belong to.
    pub session_id: SessionId,
    /// Owner.
    pub user_id: UserId,
    /// Current state.
    pub status: ReservationStatus,
    /// End of the hold window.
    pub expires_at: DateTime<Utc>,
    /// Client-supplied retry key, unique per user.
    pub idempotency_key: Option<String>,
    /// Held seats, sorted. Immutable after creation.
    pub seat_ids: Vec<SeatId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Whether the hold window has elapsed at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether this reservation answers the same request as `session_id` + `seat_ids`.
    ///
    /// `seat_ids` must already be normalized.
    #[must_use]
    pub fn matches_request(&self, session_id: SessionId, seat_ids: &[SeatId]) -> bool {
        self.session_id == session_id && self.seat_ids.as_slice() == seat_ids
    }
}

/// Everything needed to persist a new reservation, its seats and its locks atomically.
#[derive(Debug, Clone)]
pub struct NewReservation {
    /// Pre-generated identifier.
    pub id: ReservationId,
    /// Session the seats belong to.
    pub session_id: SessionId,
    /// Owner.
    pub user_id: UserId,
    /// Normalized seat set.
    pub seat_ids: Vec<SeatId>,
    /// End of the hold window; also the expiry of every seat lock.
    pub expires_at: DateTime<Utc>,
    /// Optional retry key.
    pub idempotency_key: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Filters for listing reservations.
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    /// Only reservations of this user.
    pub user_id: Option<UserId>,
    /// Only reservations for this session.
    pub session_id: Option<SessionId>,
    /// Only reservations in this state.
    pub status: Option<ReservationStatus>,
}

/// Validates and normalizes a requested seat list.
///
/// The result is de-duplicated and sorted. A list that shrinks under
/// de-duplication is rejected rather than silently corrected.
///
/// # Errors
///
/// Returns [`BookingError::BadInput`] if the list is empty or contains duplicates.
pub fn normalize_seat_ids(requested: &[SeatId]) -> Result<Vec<SeatId>, BookingError> {
    if requested.is_empty() {
        return Err(BookingError::bad_input("At least one seat is required."));
    }
    let mut seat_ids = requested.to_vec();
    seat_ids.sort_unstable();
    seat_ids.dedup();
    if seat_ids.len() != requested.len() {
        return Err(BookingError::bad_input("Duplicated seats in request."));
    }
    Ok(seat_ids)
}

/// Longest idempotency key accepted, in characters.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Trims an idempotency key and treats a blank one as absent.
///
/// # Errors
///
/// Returns [`BookingError::BadInput`] if the key is longer than
/// [`MAX_IDEMPOTENCY_KEY_LEN`] characters.
pub fn normalize_idempotency_key(key: Option<&str>) -> Result<Option<String>, BookingError> {
    let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
        return Ok(None);
    };
    if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(BookingError::bad_input(format!(
            "Idempotency key must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters."
        )));
    }
    Ok(Some(key.to_string()))
}
