//! Names of the storage constraints the engines react to.
//!
//! These must match `migrations/` exactly; the in-memory store raises the
//! same names.

use crate::error::BookingError;

/// Partial unique index: one unreleased lock per seat.
pub const SEAT_LOCK_ACTIVE_SEAT: &str = "uniq_seat_locks_active_seat";
/// Partial unique index on `(user_id, idempotency_key)`.
pub const RESERVATION_IDEMPOTENCY_KEY: &str = "uniq_reservations_user_idempotency_key";
/// A seat is sold at most once, globally.
pub const SALE_SEAT_SEAT: &str = "uniq_sale_seats_seat";
/// A seat appears once per sale.
pub const SALE_SEAT_SALE_SEAT: &str = "uniq_sale_seats_sale_seat";
/// At most one sale per reservation.
pub const SALE_RESERVATION: &str = "uniq_sales_reservation";
/// Unique user email.
pub const USER_EMAIL: &str = "uniq_users_email";
/// Unique seat label within a session.
pub const SEAT_SESSION_LABEL: &str = "uniq_seats_session_label";
/// `reservations.user_id` references `users`.
pub const RESERVATION_USER_FK: &str = "fk_reservations_user";
/// `reservations.session_id` references `sessions`.
pub const RESERVATION_SESSION_FK: &str = "fk_reservations_session";
/// `reservation_seats.seat_id` references `seats`.
pub const RESERVATION_SEAT_SEAT_FK: &str = "fk_reservation_seats_seat";

/// Maps a violated constraint to the caller-facing error, if it is one the
/// engines know about.
#[must_use]
pub fn classify(constraint: &str) -> Option<BookingError> {
    let err = match constraint {
        SEAT_LOCK_ACTIVE_SEAT => BookingError::conflict("Some seats are already reserved."),
        SALE_SEAT_SEAT | SALE_SEAT_SALE_SEAT => {
            BookingError::conflict("Some seats are already sold.")
        }
        RESERVATION_IDEMPOTENCY_KEY => BookingError::conflict("Idempotency key already used."),
        SALE_RESERVATION => BookingError::conflict("Reservation already confirmed."),
        USER_EMAIL => BookingError::conflict("Email already registered."),
        SEAT_SESSION_LABEL => BookingError::bad_input("Duplicated seat labels."),
        RESERVATION_USER_FK => BookingError::not_found("User not found."),
        RESERVATION_SESSION_FK => BookingError::not_found("Session not found."),
        RESERVATION_SEAT_SEAT_FK => {
            BookingError::not_found("Some seats were not found for this session.")
        }
        _ => return None,
    };
    Some(err)
}
