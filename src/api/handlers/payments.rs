//! Payment and sale handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::dto::{ConfirmPaymentRequest, SaleResponse, json_body};
use crate::app_state::AppState;
use crate::domain::{ReservationId, SaleId};
use crate::error::{BookingError, ErrorResponse};

/// `POST /payments/confirm`: Turn a reservation into a sale.
///
/// # Errors
///
/// Returns [`BookingError::Conflict`] if the reservation expired or a seat
/// was sold meanwhile, [`BookingError::NotFound`] for an unknown reservation.
#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    tag = "Payments",
    summary = "Confirm payment",
    description = "Confirms a pending reservation and records the sale. Confirming twice returns the same sale.",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Sale recorded", body = SaleResponse),
        (status = 404, description = "Reservation not found", body = ErrorResponse),
        (status = 409, description = "Reservation expired or seats sold", body = ErrorResponse),
    )
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    payload: Result<Json<ConfirmPaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, BookingError> {
    let req = json_body(payload)?;
    let sale = state
        .engines
        .payments
        .confirm(ReservationId::from_uuid(req.reservation_id))
        .await?;
    Ok(Json(SaleResponse::from(sale)))
}

/// `GET /sales/{id}`: Get a sale.
///
/// # Errors
///
/// Returns [`BookingError::NotFound`] if the sale does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/sales/{id}",
    tag = "Payments",
    summary = "Get a sale",
    params(
        ("id" = Uuid, Path, description = "Sale UUID"),
    ),
    responses(
        (status = 200, description = "Sale", body = SaleResponse),
        (status = 404, description = "Sale not found", body = ErrorResponse),
    )
)]
pub async fn get_sale(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let sale = state.engines.payments.load_sale(SaleId::from_uuid(id)).await?;
    Ok(Json(SaleResponse::from(sale)))
}

/// Payment routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments/confirm", post(confirm_payment))
        .route("/sales/{id}", get(get_sale))
}
