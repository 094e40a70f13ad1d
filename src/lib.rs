//! # seat-reservation-engine
//!
//! Seat reservation backend: time-limited seat holds, idempotent retries,
//! broker-driven hold expiry and atomic payment confirmation.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── Engines (service/)
//!     │     reservations · expiration · payments · availability · catalog
//!     │
//!     ├── Store (store/)          PostgreSQL or in-memory, constraint-named errors
//!     ├── Cache (cache/)          Redis or in-memory, best-effort availability
//!     └── Transport (transport/)  topic exchange, TTL delay queue, dead-lettering
//! ```
//!
//! The store is the only source of truth. Cache writes and event publishes
//! happen after commit and never fail the operation that triggered them.

pub mod api;
pub mod app_state;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod store;
pub mod transport;
