//! Booking error types with HTTP status code mapping.
//!
//! [`BookingError`] is the central error type for the service. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 4001,
///     "message": "Some seats are already reserved."
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see [`BookingError`] code ranges).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category   | HTTP Status               |
/// |-----------|------------|---------------------------|
/// | 1000–1999 | Validation | 400 Bad Request           |
/// | 2000–2999 | Not Found  | 404 Not Found             |
/// | 3000–3999 | Server     | 500 Internal Server Error |
/// | 4000–4999 | Conflict   | 409 Conflict              |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    /// Malformed or duplicate seat list, seats outside the session, empty update.
    #[error("{0}")]
    BadInput(String),

    /// Missing session, reservation, seat, sale or user.
    #[error("{0}")]
    NotFound(String),

    /// Seat already sold or reserved, reservation expired, idempotency key reused.
    #[error("{0}")]
    Conflict(String),

    /// Store or transaction failure that matched no known constraint.
    #[error("infrastructure error: {0}")]
    Infra(String),
}

impl BookingError {
    /// Shorthand for [`BookingError::BadInput`].
    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::BadInput(message.into())
    }

    /// Shorthand for [`BookingError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Shorthand for [`BookingError::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Shorthand for [`BookingError::Infra`].
    pub fn infra(message: impl Into<String>) -> Self {
        Self::Infra(message.into())
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::BadInput(_) => 1001,
            Self::NotFound(_) => 2001,
            Self::Infra(_) => 3000,
            Self::Conflict(_) => 4001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Infra(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to API callers. Infrastructure detail stays in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Infra(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.public_message(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(BookingError::bad_input("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(BookingError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(BookingError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            BookingError::infra("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn infra_message_is_not_leaked() {
        let err = BookingError::infra("connection refused on 10.0.0.4:5432");
        assert_eq!(err.public_message(), "internal error");
        assert_eq!(
            BookingError::conflict("Reservation expired.").public_message(),
            "Reservation expired."
        );
    }

    #[test]
    fn into_response_sets_status() {
        let response = BookingError::conflict("Some seats are already sold.").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
