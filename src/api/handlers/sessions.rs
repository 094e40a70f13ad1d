//! Session handlers: create, get, availability.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::dto::{AvailabilityResponse, CreateSessionRequest, SessionResponse, json_body};
use crate::app_state::AppState;
use crate::domain::SessionId;
use crate::error::{BookingError, ErrorResponse};

/// `POST /sessions`: Create a session and its seats.
///
/// # Errors
///
/// Returns [`BookingError::BadInput`] on invalid input.
#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    tag = "Sessions",
    summary = "Create a session",
    description = "Creates a session with at least 16 seats, either from explicit `seatLabels` or generated from `seatsCount`.",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionResponse),
        (status = 400, description = "Invalid session", body = ErrorResponse),
    )
)]
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, BookingError> {
    let input = json_body(payload)?.into_new_session()?;
    let (session, seats) = state.engines.catalog.create_session(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new(session, seats)),
    ))
}

/// `GET /sessions/{id}`: Session details with seats.
///
/// # Errors
///
/// Returns [`BookingError::NotFound`] if the session does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    tag = "Sessions",
    summary = "Get a session",
    params(
        ("id" = Uuid, Path, description = "Session UUID"),
    ),
    responses(
        (status = 200, description = "Session details", body = SessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let (session, seats) = state
        .engines
        .catalog
        .load_session(SessionId::from_uuid(id))
        .await?;
    Ok(Json(SessionResponse::new(session, seats)))
}

/// `GET /sessions/{id}/availability`: Per-seat status.
///
/// # Errors
///
/// Returns [`BookingError::NotFound`] if the session does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/availability",
    tag = "Sessions",
    summary = "Seat availability",
    description = "Returns AVAILABLE, RESERVED or SOLD for every seat of the session.",
    params(
        ("id" = Uuid, Path, description = "Session UUID"),
    ),
    responses(
        (status = 200, description = "Seat availability", body = AvailabilityResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn get_availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let availability = state
        .engines
        .availability
        .load(SessionId::from_uuid(id))
        .await?;
    Ok(Json(AvailabilityResponse::from(availability)))
}

/// Session routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/availability", get(get_availability))
}
