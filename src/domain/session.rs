//! Sessions, their seats and the per-seat availability status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{SeatId, SessionId, max_amount};
use crate::error::BookingError;

/// Fewest seats a session may be created with.
pub const MIN_SEATS_PER_SESSION: usize = 16;
/// Longest session title, in characters.
pub const MAX_TITLE_LEN: usize = 200;
/// Longest room name, in characters.
pub const MAX_ROOM_LEN: usize = 100;
/// Longest seat label, in characters.
pub const MAX_SEAT_LABEL_LEN: usize = 20;

/// A scheduled session that owns a fixed set of seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Title shown to customers.
    pub title: String,
    /// Start time.
    pub starts_at: DateTime<Utc>,
    /// Room the session runs in.
    pub room: String,
    /// Flat price per seat, two decimal places.
    pub price: Decimal,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A seat belonging to exactly one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    /// Seat identifier.
    pub id: SeatId,
    /// Owning session.
    pub session_id: SessionId,
    /// Short label, unique within the session (e.g. `S1`).
    pub label: String,
}

/// Input for creating a session together with its seats.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Title shown to customers.
    pub title: String,
    /// Start time.
    pub starts_at: DateTime<Utc>,
    /// Room the session runs in.
    pub room: String,
    /// Flat price per seat.
    pub price: Decimal,
    /// Seat labels, in display order.
    pub seat_labels: Vec<String>,
}

impl NewSession {
    /// Validates the session input.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::BadInput`] when a text field is blank or too
    /// long, when the price is not positive, exceeds [`max_amount`] or has
    /// more than two decimals, when fewer than [`MIN_SEATS_PER_SESSION`]
    /// labels are given, or when labels repeat after trimming.
    pub fn validate(&self) -> Result<(), BookingError> {
        check_text("Title", &self.title, MAX_TITLE_LEN)?;
        check_text("Room", &self.room, MAX_ROOM_LEN)?;
        if self.price <= Decimal::ZERO || self.price.normalize().scale() > 2 {
            return Err(BookingError::bad_input(
                "Price must be positive with at most 2 decimal places.",
            ));
        }
        if self.price > max_amount() {
            return Err(BookingError::bad_input(format!(
                "Price must not exceed {}.",
                max_amount()
            )));
        }
        if self.seat_labels.len() < MIN_SEATS_PER_SESSION {
            return Err(BookingError::bad_input(format!(
                "At least {MIN_SEATS_PER_SESSION} seats are required."
            )));
        }
        for label in &self.seat_labels {
            check_text("Seat label", label, MAX_SEAT_LABEL_LEN)?;
        }
        let mut labels: Vec<&str> = self.seat_labels.iter().map(|l| l.trim()).collect();
        labels.sort_unstable();
        labels.dedup();
        if labels.len() != self.seat_labels.len() {
            return Err(BookingError::bad_input("Duplicated seat labels."));
        }
        Ok(())
    }
}

/// Rejects blank text and text longer than `max` characters once trimmed.
fn check_text(field: &str, value: &str, max: usize) -> Result<(), BookingError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BookingError::bad_input(format!("{field} is required.")));
    }
    if value.chars().count() > max {
        return Err(BookingError::bad_input(format!(
            "{field} must be at most {max} characters."
        )));
    }
    Ok(())
}

/// Generates the default labels `S1..Sn`.
#[must_use]
pub fn generate_seat_labels(count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("S{n}")).collect()
}

/// Availability of a single seat as reported to clients and stored in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    /// Free to reserve.
    Available,
    /// Held by an unexpired reservation.
    Reserved,
    /// Permanently sold.
    Sold,
}

impl SeatStatus {
    /// Wire/cache representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Reserved => "RESERVED",
            Self::Sold => "SOLD",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(Self::Available),
            "RESERVED" => Ok(Self::Reserved),
            "SOLD" => Ok(Self::Sold),
            other => Err(BookingError::bad_input(format!("unknown seat status: {other}"))),
        }
    }
}

/// One seat's status in an availability answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatAvailability {
    /// Seat identifier.
    pub id: SeatId,
    /// Seat label.
    pub label: String,
    /// Current status.
    pub status: SeatStatus,
}

/// Availability of every seat in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAvailability {
    /// Session identifier.
    pub session_id: SessionId,
    /// Seats in session order.
    pub seats: Vec<SeatAvailability>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_session(labels: Vec<String>, price: Decimal) -> NewSession {
        NewSession {
            title: "Night Show".to_string(),
            starts_at: Utc::now(),
            room: "Room 1".to_string(),
            price,
            seat_labels: labels,
        }
    }

    #[test]
    fn generated_labels_are_one_based() {
        let labels = generate_seat_labels(3);
        assert_eq!(labels, vec!["S1", "S2", "S3"]);
    }

    #[test]
    fn validate_accepts_sixteen_seats() {
        let session = new_session(generate_seat_labels(16), dec!(25.50));
        assert!(session.validate().is_ok());
    }

    #[test]
    fn validate_rejects_small_rooms() {
        let session = new_session(generate_seat_labels(15), dec!(10));
        assert!(matches!(session.validate(), Err(BookingError::BadInput(_))));
    }

    #[test]
    fn validate_rejects_duplicate_labels() {
        let mut labels = generate_seat_labels(16);
        labels.push("S1".to_string());
        let session = new_session(labels, dec!(10));
        assert_eq!(
            session.validate(),
            Err(BookingError::bad_input("Duplicated seat labels."))
        );
    }

    #[test]
    fn validate_rejects_bad_prices() {
        let zero = new_session(generate_seat_labels(16), dec!(0));
        assert!(zero.validate().is_err());
        let fractional = new_session(generate_seat_labels(16), dec!(9.999));
        assert!(fractional.validate().is_err());
        let trailing_zeros = new_session(generate_seat_labels(16), dec!(9.5000));
        assert!(trailing_zeros.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_or_long_labels() {
        let mut blank = generate_seat_labels(16);
        blank.push("  ".to_string());
        assert_eq!(
            new_session(blank, dec!(10)).validate(),
            Err(BookingError::bad_input("Seat label is required."))
        );

        let mut long = generate_seat_labels(16);
        long.push("L".repeat(MAX_SEAT_LABEL_LEN + 1));
        assert!(matches!(
            new_session(long, dec!(10)).validate(),
            Err(BookingError::BadInput(_))
        ));

        let mut padded = generate_seat_labels(16);
        padded.push(" S1 ".to_string());
        assert_eq!(
            new_session(padded, dec!(10)).validate(),
            Err(BookingError::bad_input("Duplicated seat labels."))
        );
    }

    #[test]
    fn validate_bounds_text_fields() {
        let mut session = new_session(generate_seat_labels(16), dec!(10));
        session.title = "T".repeat(MAX_TITLE_LEN);
        session.room = "R".repeat(MAX_ROOM_LEN);
        assert!(session.validate().is_ok());

        session.title.push('T');
        assert_eq!(
            session.validate(),
            Err(BookingError::bad_input("Title must be at most 200 characters."))
        );

        session.title = "Night Show".to_string();
        session.room = "R".repeat(MAX_ROOM_LEN + 1);
        assert!(matches!(session.validate(), Err(BookingError::BadInput(_))));
    }

    #[test]
    fn validate_caps_price() {
        assert!(new_session(generate_seat_labels(16), max_amount()).validate().is_ok());
        let too_high = new_session(generate_seat_labels(16), dec!(10000000000.00));
        assert!(matches!(too_high.validate(), Err(BookingError::BadInput(_))));
    }

    #[test]
    fn seat_status_parses_cache_values() {
        assert_eq!("SOLD".parse::<SeatStatus>(), Ok(SeatStatus::Sold));
        assert_eq!("AVAILABLE".parse::<SeatStatus>(), Ok(SeatStatus::Available));
        assert!("sold".parse::<SeatStatus>().is_err());
    }
}
