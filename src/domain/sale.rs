//! Sales and users.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{ReservationId, SaleId, SeatId, SessionId, UserId};

/// A confirmed purchase of one or more seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    /// Sale identifier.
    pub id: SaleId,
    /// Session the seats belong to.
    pub session_id: SessionId,
    /// Buyer.
    pub user_id: UserId,
    /// Reservation this sale was confirmed from, if any.
    pub reservation_id: Option<ReservationId>,
    /// Sold seats, sorted.
    pub seat_ids: Vec<SeatId>,
    /// `price × seat count`, two decimal places.
    pub total_amount: Decimal,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Filters for a user's purchase history.
#[derive(Debug, Clone, Default)]
pub struct SaleFilter {
    /// Only sales for this session.
    pub session_id: Option<SessionId>,
}

/// Computes `price × seat_count` fixed to two decimal places.
#[must_use]
pub fn total_amount(price: Decimal, seat_count: usize) -> Decimal {
    let mut total = (price * Decimal::from(seat_count)).round_dp(2);
    total.rescale(2);
    total
}

/// Largest amount stored for a price or a sale total: ten integer digits and two decimals.
#[must_use]
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

/// Longest user name accepted, in characters.
pub const MAX_USER_NAME_LEN: usize = 120;
/// Longest email accepted, in characters.
pub const MAX_EMAIL_LEN: usize = 255;

/// A registered user. Only relevant to the engine as a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Unique email.
    pub email: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_is_fixed_to_two_decimals() {
        assert_eq!(total_amount(dec!(20), 1).to_string(), "20.00");
        assert_eq!(total_amount(dec!(12.5), 3).to_string(), "37.50");
    }

    #[test]
    fn amount_ceiling_has_two_decimals() {
        assert_eq!(max_amount().to_string(), "9999999999.99");
        assert!(total_amount(max_amount(), 2) > max_amount());
    }

    #[test]
    fn total_serializes_as_string() {
        let sale = Sale {
            id: SaleId::new(),
            session_id: SessionId::new(),
            user_id: UserId::new(),
            reservation_id: None,
            seat_ids: vec![SeatId::new(), SeatId::new()],
            total_amount: total_amount(dec!(19.9), 2),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&sale).unwrap_or_default();
        assert_eq!(json["totalAmount"], "39.80");
        assert!(json["reservationId"].is_null());
    }
}
