//! User handlers: register, get, purchase history.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::dto::{
    CreateUserRequest, PaginationMeta, SaleHistoryQuery, SaleListResponse, SaleResponse,
    UserResponse, json_body,
};
use crate::app_state::AppState;
use crate::domain::UserId;
use crate::error::{BookingError, ErrorResponse};

/// `POST /users`: Register a user.
///
/// # Errors
///
/// Returns [`BookingError::BadInput`] on invalid input or
/// [`BookingError::Conflict`] if the email is taken.
#[utoipa::path(
    post,
    path = "/api/v1/users",
    tag = "Users",
    summary = "Register a user",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid user", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, BookingError> {
    let input = json_body(payload)?;
    let user = state.engines.catalog.create_user(input.into()).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// `GET /users/{id}`: Get a user.
///
/// # Errors
///
/// Returns [`BookingError::NotFound`] if the user does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    tag = "Users",
    summary = "Get a user",
    params(
        ("id" = Uuid, Path, description = "User UUID"),
    ),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let user = state.engines.catalog.load_user(UserId::from_uuid(id)).await?;
    Ok(Json(UserResponse::from(user)))
}

/// `GET /users/{id}/sales`: Purchase history.
///
/// # Errors
///
/// Returns [`BookingError::NotFound`] if the user does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/sales",
    tag = "Users",
    summary = "Purchase history",
    description = "Sales of a user, newest first, optionally filtered by session.",
    params(
        ("id" = Uuid, Path, description = "User UUID"),
        SaleHistoryQuery,
    ),
    responses(
        (status = 200, description = "Paginated sales", body = SaleListResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn list_user_sales(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SaleHistoryQuery>,
) -> Result<impl IntoResponse, BookingError> {
    let page = query.pagination().page_request();
    let sales = state
        .engines
        .payments
        .purchase_history(UserId::from_uuid(id), &query.filter(), page)
        .await?;

    Ok(Json(SaleListResponse {
        data: sales.items.into_iter().map(SaleResponse::from).collect(),
        pagination: PaginationMeta::new(page, sales.total),
    }))
}

/// User routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/sales", get(list_user_sales))
}
