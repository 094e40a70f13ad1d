//! Shared application state injected into all Axum handlers.

use crate::service::Engines;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Booking engines.
    pub engines: Engines,
    /// `"postgres"` or `"memory"`, reported by the health check.
    pub storage_backend: &'static str,
}
