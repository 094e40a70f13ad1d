//! Reservation handlers: create, list, get, expire.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::dto::{
    CreateReservationRequest, ExpireReservationResponse, PaginationMeta, ReservationListQuery,
    ReservationListResponse, ReservationResponse, json_body,
};
use crate::app_state::AppState;
use crate::domain::{ReservationId, SeatId, SessionId, UserId};
use crate::error::{BookingError, ErrorResponse};
use crate::service::CreateReservation;

/// Header carrying the client retry key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, BookingError> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| BookingError::bad_input("Idempotency-Key must be visible ASCII."))
        })
        .transpose()
}

/// `POST /reservations`: Hold seats for a user.
///
/// # Errors
///
/// Returns [`BookingError`] per the reservation rules: `BadInput` for bad seat
/// lists, `NotFound` for unknown session or user, `Conflict` for taken seats.
#[utoipa::path(
    post,
    path = "/api/v1/reservations",
    tag = "Reservations",
    summary = "Reserve seats",
    description = "Atomically holds all requested seats until the hold expires. Repeating the request with the same `Idempotency-Key` returns the original reservation.",
    request_body = CreateReservationRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Client retry key, unique per user"),
    ),
    responses(
        (status = 201, description = "Reservation created or replayed", body = ReservationResponse),
        (status = 400, description = "Invalid seat list", body = ErrorResponse),
        (status = 404, description = "Session or user not found", body = ErrorResponse),
        (status = 409, description = "Seats unavailable or key reused", body = ErrorResponse),
    )
)]
pub async fn create_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateReservationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, BookingError> {
    let req = json_body(payload)?;
    let reservation = state
        .engines
        .reservations
        .create(CreateReservation {
            session_id: SessionId::from_uuid(req.session_id),
            user_id: UserId::from_uuid(req.user_id),
            seat_ids: req.seat_ids.into_iter().map(SeatId::from_uuid).collect(),
            idempotency_key: idempotency_key(&headers)?,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ReservationResponse::from(reservation)),
    ))
}

/// `GET /reservations`: List reservations.
///
/// # Errors
///
/// Returns [`BookingError::BadInput`] for an unknown status filter.
#[utoipa::path(
    get,
    path = "/api/v1/reservations",
    tag = "Reservations",
    summary = "List reservations",
    description = "Paginated reservations, newest first, filtered by user, session or status.",
    params(ReservationListQuery),
    responses(
        (status = 200, description = "Paginated reservations", body = ReservationListResponse),
        (status = 400, description = "Invalid filter", body = ErrorResponse),
    )
)]
pub async fn list_reservations(
    State(state): State<AppState>,
    Query(query): Query<ReservationListQuery>,
) -> Result<impl IntoResponse, BookingError> {
    let filter = query.filter()?;
    let page = query.pagination().page_request();
    let reservations = state.engines.reservations.list(&filter, page).await?;

    Ok(Json(ReservationListResponse {
        data: reservations
            .items
            .into_iter()
            .map(ReservationResponse::from)
            .collect(),
        pagination: PaginationMeta::new(page, reservations.total),
    }))
}

/// `GET /reservations/{id}`: Get a reservation with its seats.
///
/// # Errors
///
/// Returns [`BookingError::NotFound`] if the reservation does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/reservations/{id}",
    tag = "Reservations",
    summary = "Get a reservation",
    params(
        ("id" = Uuid, Path, description = "Reservation UUID"),
    ),
    responses(
        (status = 200, description = "Reservation", body = ReservationResponse),
        (status = 404, description = "Reservation not found", body = ErrorResponse),
    )
)]
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let reservation = state
        .engines
        .reservations
        .load(ReservationId::from_uuid(id))
        .await?;
    Ok(Json(ReservationResponse::from(reservation)))
}

/// `POST /reservations/{id}/expire`: Expire the reservation if its hold elapsed.
///
/// # Errors
///
/// Returns [`BookingError::NotFound`] if the reservation does not exist.
#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/expire",
    tag = "Reservations",
    summary = "Expire a reservation if due",
    description = "Applies the expiry transition when the reservation is still RESERVED and its hold has elapsed. A no-op otherwise.",
    params(
        ("id" = Uuid, Path, description = "Reservation UUID"),
    ),
    responses(
        (status = 200, description = "Reservation after the call", body = ExpireReservationResponse),
        (status = 404, description = "Reservation not found", body = ErrorResponse),
    )
)]
pub async fn expire_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let id = ReservationId::from_uuid(id);
    let expired = state.engines.expiration.expire_if_needed(id).await?;
    let reservation = state.engines.reservations.load(id).await?;
    Ok(Json(ExpireReservationResponse {
        expired,
        reservation: reservation.into(),
    }))
}

/// Reservation routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/reservations",
            post(create_reservation).get(list_reservations),
        )
        .route("/reservations/{id}", get(get_reservation))
        .route("/reservations/{id}/expire", post(expire_reservation))
}
