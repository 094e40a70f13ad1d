//! REST endpoint handlers organized by resource.

pub mod payments;
pub mod reservations;
pub mod sessions;
pub mod system;
pub mod users;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(sessions::routes())
        .merge(users::routes())
        .merge(reservations::routes())
        .merge(payments::routes())
}
