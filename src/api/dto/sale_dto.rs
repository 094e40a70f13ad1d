//! Payment and sale DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common_dto::{PaginationMeta, PaginationParams};
use crate::domain::{Sale, SaleFilter, to_uuids};

/// Request body for `POST /payments/confirm`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    /// Reservation to confirm.
    pub reservation_id: Uuid,
}

/// A sale.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaleResponse {
    /// Sale identifier.
    pub id: Uuid,
    /// Session identifier.
    pub session_id: Uuid,
    /// Buyer.
    pub user_id: Uuid,
    /// Reservation the sale was confirmed from.
    pub reservation_id: Option<Uuid>,
    /// Sold seats.
    pub seat_ids: Vec<Uuid>,
    /// Total charged, e.g. `"50.00"`.
    pub total_amount: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Sale> for SaleResponse {
    fn from(sale: Sale) -> Self {
        Self {
            id: sale.id.into(),
            session_id: sale.session_id.into(),
            user_id: sale.user_id.into(),
            reservation_id: sale.reservation_id.map(Into::into),
            seat_ids: to_uuids(&sale.seat_ids),
            total_amount: sale.total_amount.to_string(),
            created_at: sale.created_at,
        }
    }
}

/// Query parameters for `GET /users/{id}/sales`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct SaleHistoryQuery {
    /// Only sales for this session.
    pub session_id: Option<Uuid>,
    /// Page number (1-indexed).
    pub page: Option<u32>,
    /// Items per page (max 100).
    pub per_page: Option<u32>,
}

impl SaleHistoryQuery {
    /// Store filter.
    #[must_use]
    pub fn filter(&self) -> SaleFilter {
        SaleFilter {
            session_id: self.session_id.map(Into::into),
        }
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

/// Response body for `GET /users/{id}/sales`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SaleListResponse {
    /// Sales on this page, newest first.
    pub data: Vec<SaleResponse>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}
