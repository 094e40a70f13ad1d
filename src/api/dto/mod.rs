//! Data Transfer Objects for REST request/response serialization.
//!
//! Field names are camelCase. Money amounts are serialized as JSON strings
//! with two decimal places to avoid floating-point rounding on the client.

pub mod common_dto;
pub mod reservation_dto;
pub mod sale_dto;
pub mod session_dto;

pub use common_dto::*;
pub use reservation_dto::*;
pub use sale_dto::*;
pub use session_dto::*;
