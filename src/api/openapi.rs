//! OpenAPI document assembled from the handler annotations.

use utoipa::OpenApi;

use super::dto::{
    AvailabilityResponse, ConfirmPaymentRequest, CreateReservationRequest, CreateSessionRequest,
    CreateUserRequest, ExpireReservationResponse, PaginationMeta, ReservationListResponse,
    ReservationResponse, SaleListResponse, SaleResponse, SeatAvailabilityDto, SeatDto,
    SessionResponse, UserResponse,
};
use super::handlers::{payments, reservations, sessions, system, users};
use crate::error::{ErrorBody, ErrorResponse};

/// The service's OpenAPI description.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "Seat Reservation Engine",
        description = "Seat holds with TTL expiry, idempotent retries and atomic payment confirmation."
    ),
    paths(
        system::health_handler,
        sessions::create_session,
        sessions::get_session,
        sessions::get_availability,
        users::create_user,
        users::get_user,
        users::list_user_sales,
        reservations::create_reservation,
        reservations::list_reservations,
        reservations::get_reservation,
        reservations::expire_reservation,
        payments::confirm_payment,
        payments::get_sale,
    ),
    components(schemas(
        ErrorResponse,
        ErrorBody,
        PaginationMeta,
        CreateSessionRequest,
        SessionResponse,
        SeatDto,
        AvailabilityResponse,
        SeatAvailabilityDto,
        CreateUserRequest,
        UserResponse,
        CreateReservationRequest,
        ReservationResponse,
        ReservationListResponse,
        ExpireReservationResponse,
        ConfirmPaymentRequest,
        SaleResponse,
        SaleListResponse,
        system::HealthResponse,
    )),
    tags(
        (name = "Sessions", description = "Sessions, seats and availability"),
        (name = "Users", description = "Users and purchase history"),
        (name = "Reservations", description = "Seat holds"),
        (name = "Payments", description = "Payment confirmation and sales"),
        (name = "System", description = "Operational endpoints"),
    )
)]
pub struct ApiDoc;
