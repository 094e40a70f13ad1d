//! Reservation DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common_dto::{PaginationMeta, PaginationParams};
use crate::domain::{Reservation, ReservationFilter, ReservationStatus, to_uuids};
use crate::error::BookingError;

/// Request body for `POST /reservations`. The optional retry key travels in
/// the `Idempotency-Key` header.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    /// Session the seats belong to.
    pub session_id: Uuid,
    /// Requesting user.
    pub user_id: Uuid,
    /// Seats to hold.
    pub seat_ids: Vec<Uuid>,
}

/// A reservation.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    /// Reservation identifier.
    pub id: Uuid,
    /// Session identifier.
    pub session_id: Uuid,
    /// Owner.
    pub user_id: Uuid,
    /// `RESERVED`, `EXPIRED` or `CONFIRMED`.
    pub status: String,
    /// End of the hold window.
    pub expires_at: DateTime<Utc>,
    /// Retry key the reservation was created with.
    pub idempotency_key: Option<String>,
    /// Held seats.
    pub seat_ids: Vec<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id.into(),
            session_id: r.session_id.into(),
            user_id: r.user_id.into(),
            status: r.status.as_str().to_string(),
            expires_at: r.expires_at,
            idempotency_key: r.idempotency_key,
            seat_ids: to_uuids(&r.seat_ids),
            created_at: r.created_at,
        }
    }
}

/// Query parameters for `GET /reservations`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct ReservationListQuery {
    /// Only reservations of this user.
    pub user_id: Option<Uuid>,
    /// Only reservations for this session.
    pub session_id: Option<Uuid>,
    /// Only reservations in this status.
    pub status: Option<String>,
    /// Page number (1-indexed).
    pub page: Option<u32>,
    /// Items per page (max 100).
    pub per_page: Option<u32>,
}

impl ReservationListQuery {
    /// Store filter.
    ///
    /// # Errors
    ///
    /// [`BookingError::BadInput`] for an unknown status.
    pub fn filter(&self) -> Result<ReservationFilter, BookingError> {
        let status = self
            .status
            .as_deref()
            .map(|s| s.trim().to_ascii_uppercase().parse::<ReservationStatus>())
            .transpose()?;
        Ok(ReservationFilter {
            user_id: self.user_id.map(Into::into),
            session_id: self.session_id.map(Into::into),
            status,
        })
    }

    /// Requested page with defaults applied.
    #[must_use]
    pub fn pagination(&self) -> PaginationParams {
        let defaults = PaginationParams::default();
        PaginationParams {
            page: self.page.unwrap_or(defaults.page),
            per_page: self.per_page.unwrap_or(defaults.per_page),
        }
    }
}

/// Response body for `GET /reservations`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReservationListResponse {
    /// Reservations on this page, newest first.
    pub data: Vec<ReservationResponse>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Response body for `POST /reservations/{id}/expire`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpireReservationResponse {
    /// Whether this call performed the expiry.
    pub expired: bool,
    /// Reservation after the call.
    pub reservation: ReservationResponse,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_is_case_insensitive() {
        let query = ReservationListQuery {
            user_id: None,
            session_id: None,
            status: Some("confirmed".to_string()),
            page: None,
            per_page: Some(5),
        };
        let Ok(filter) = query.filter() else {
            panic!("filter must parse");
        };
        assert_eq!(filter.status, Some(ReservationStatus::Confirmed));
        assert_eq!(query.pagination().page, 1);
        assert_eq!(query.pagination().per_page, 5);
    }

    #[test]
    fn unknown_status_is_bad_input() {
        let query = ReservationListQuery {
            user_id: None,
            session_id: None,
            status: Some("pending".to_string()),
            page: None,
            per_page: None,
        };
        assert!(matches!(query.filter(), Err(BookingError::BadInput(_))));
    }
}
