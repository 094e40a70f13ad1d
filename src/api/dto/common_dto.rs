//! Shared DTO types used across multiple endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::BookingError;
use crate::store::PageRequest;

/// Pagination query parameters for list endpoints.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct PaginationParams {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    /// Current page number.
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
    /// Total number of items.
    pub total: u64,
    /// Total number of pages.
    pub total_pages: u64,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    /// Clamps `page` to at least 1 and `per_page` to `1..=100`.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, 100),
        }
    }

    /// Store-level page request.
    #[must_use]
    pub fn page_request(&self) -> PageRequest {
        let clamped = self.clamped();
        PageRequest {
            page: clamped.page,
            per_page: clamped.per_page,
        }
    }
}

impl PaginationMeta {
    /// Metadata for `page` out of `total` matching items.
    #[must_use]
    pub fn new(page: PageRequest, total: u64) -> Self {
        Self {
            page: page.page,
            per_page: page.per_page,
            total,
            total_pages: total.div_ceil(u64::from(page.per_page.max(1))),
        }
    }
}

/// Unwraps a JSON body, reporting malformed input as [`BookingError::BadInput`].
///
/// # Errors
///
/// Returns [`BookingError::BadInput`] with the parser's message.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, BookingError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| BookingError::bad_input(rejection.body_text()))
}
