//! Session, seat, availability and user DTOs.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{
    NewSession, Seat, SeatStatus, Session, SessionAvailability, User, generate_seat_labels,
};
use crate::error::BookingError;
use crate::service::NewUser;

/// Upper bound on `seatsCount`.
pub const MAX_GENERATED_SEATS: usize = 2_000;

/// Request body for `POST /sessions`.
///
/// Give either explicit `seatLabels` or a `seatsCount` (labels `S1..Sn`).
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Movie or event title.
    pub title: String,
    /// Start time (RFC 3339).
    pub starts_at: DateTime<Utc>,
    /// Room name.
    pub room: String,
    /// Ticket price as a decimal string, e.g. `"25.00"`.
    pub price: String,
    /// Explicit seat labels.
    #[serde(default)]
    pub seat_labels: Option<Vec<String>>,
    /// Number of seats to generate when no labels are given.
    #[serde(default)]
    pub seats_count: Option<usize>,
}

impl CreateSessionRequest {
    /// Converts into the service input.
    ///
    /// # Errors
    ///
    /// [`BookingError::BadInput`] for an unparsable price or when no seats are described.
    pub fn into_new_session(self) -> Result<NewSession, BookingError> {
        let price = Decimal::from_str(self.price.trim())
            .map_err(|_| BookingError::bad_input("Price is not a valid decimal."))?;
        let seat_labels = match (self.seat_labels, self.seats_count) {
            (Some(labels), _) => labels.into_iter().map(|l| l.trim().to_string()).collect(),
            (None, Some(count)) if count > MAX_GENERATED_SEATS => {
                return Err(BookingError::bad_input(format!(
                    "At most {MAX_GENERATED_SEATS} seats can be generated."
                )));
            }
            (None, Some(count)) => generate_seat_labels(count),
            (None, None) => {
                return Err(BookingError::bad_input(
                    "Either seatLabels or seatsCount is required.",
                ));
            }
        };
        Ok(NewSession {
            title: self.title,
            starts_at: self.starts_at,
            room: self.room,
            price,
            seat_labels,
        })
    }
}

/// A seat.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeatDto {
    /// Seat identifier.
    pub id: Uuid,
    /// Seat label.
    pub label: String,
}

/// Response body for session endpoints.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// Session identifier.
    pub id: Uuid,
    /// Title.
    pub title: String,
    /// Start time.
    pub starts_at: DateTime<Utc>,
    /// Room name.
    pub room: String,
    /// Ticket price.
    pub price: String,
    /// Seats in session order.
    pub seats: Vec<SeatDto>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl SessionResponse {
    /// Builds the response from a session and its seats.
    #[must_use]
    pub fn new(session: Session, seats: Vec<Seat>) -> Self {
        Self {
            id: session.id.into(),
            title: session.title,
            starts_at: session.starts_at,
            room: session.room,
            price: session.price.to_string(),
            seats: seats
                .into_iter()
                .map(|s| SeatDto {
                    id: s.id.into(),
                    label: s.label,
                })
                .collect(),
            created_at: session.created_at,
        }
    }
}

/// One seat in an availability answer.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeatAvailabilityDto {
    /// Seat identifier.
    pub id: Uuid,
    /// Seat label.
    pub label: String,
    /// `AVAILABLE`, `RESERVED` or `SOLD`.
    pub status: String,
}

/// Response body for `GET /sessions/{id}/availability`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    /// Session identifier.
    pub session_id: Uuid,
    /// Seats in session order.
    pub seats: Vec<SeatAvailabilityDto>,
    /// Number of seats currently available.
    pub available_count: usize,
}

impl From<SessionAvailability> for AvailabilityResponse {
    fn from(availability: SessionAvailability) -> Self {
        let available_count = availability
            .seats
            .iter()
            .filter(|s| s.status == SeatStatus::Available)
            .count();
        Self {
            session_id: availability.session_id.into(),
            seats: availability
                .seats
                .into_iter()
                .map(|s| SeatAvailabilityDto {
                    id: s.id.into(),
                    label: s.label,
                    status: s.status.as_str().to_string(),
                })
                .collect(),
            available_count,
        }
    }
}

/// Request body for `POST /users`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    /// Display name.
    pub name: String,
    /// Email address, unique.
    pub email: String,
}

impl From<CreateUserRequest> for NewUser {
    fn from(req: CreateUserRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
        }
    }
}

/// Response body for user endpoints.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    /// User identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id.into(),
            name: user.name,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn request(labels: Option<Vec<String>>, count: Option<usize>) -> CreateSessionRequest {
        CreateSessionRequest {
            title: "Show".to_string(),
            starts_at: Utc::now(),
            room: "A".to_string(),
            price: " 12.50 ".to_string(),
            seat_labels: labels,
            seats_count: count,
        }
    }

    #[test]
    fn seats_count_generates_labels() {
        let Ok(new) = request(None, Some(16)).into_new_session() else {
            panic!("request must convert");
        };
        assert_eq!(new.seat_labels.len(), 16);
        assert_eq!(new.price.to_string(), "12.50");
    }

    #[test]
    fn explicit_labels_win() {
        let Ok(new) = request(Some(vec![" A1 ".to_string()]), Some(16)).into_new_session() else {
            panic!("request must convert");
        };
        assert_eq!(new.seat_labels, vec!["A1".to_string()]);
    }

    #[test]
    fn missing_seat_description_is_rejected() {
        assert!(matches!(
            request(None, None).into_new_session(),
            Err(BookingError::BadInput(_))
        ));
        let mut bad_price = request(None, Some(16));
        bad_price.price = "abc".to_string();
        assert!(matches!(
            bad_price.into_new_session(),
            Err(BookingError::BadInput(_))
        ));
    }
}
