//! Service layer: business logic orchestration.
//!
//! Each engine owns one slice of the booking lifecycle and talks to the
//! outside world only through the [`Store`], [`KeyValueCache`] and
//! [`Transport`] contracts. [`Engines`] wires them together over a shared
//! clock and configuration.

pub mod audit;
pub mod availability;
pub mod catalog;
pub mod expiration;
pub mod payment;
pub mod reservation;

#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use audit::AuditConsumer;
pub use availability::AvailabilityService;
pub use catalog::{CatalogService, NewUser};
pub use expiration::{ExpirationService, ExpiredMessageHandler};
pub use payment::PaymentService;
pub use reservation::{CreateReservation, ReservationService};

use crate::cache::{KeyValueCache, SeatAvailabilityCache};
use crate::config::BookingConfig;
use crate::domain::Clock;
use crate::store::Store;
use crate::transport::{ConsumeOptions, EventPublisher, Topology, Transport, TransportError};

/// Every engine, sharing one store, cache, broker and clock.
#[derive(Debug, Clone)]
pub struct Engines {
    /// Sessions and users.
    pub catalog: Arc<CatalogService>,
    /// Reservation creation and reads.
    pub reservations: Arc<ReservationService>,
    /// Hold expiry.
    pub expiration: Arc<ExpirationService>,
    /// Payment confirmation and sale reads.
    pub payments: Arc<PaymentService>,
    /// Availability read model.
    pub availability: Arc<AvailabilityService>,
}

impl Engines {
    /// Builds all engines. The topology is expected to be declared already.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn KeyValueCache>,
        transport: Arc<dyn Transport>,
        topology: &Topology,
        clock: Arc<dyn Clock>,
        booking: BookingConfig,
    ) -> Self {
        let seat_cache = SeatAvailabilityCache::new(cache);
        let publisher = EventPublisher::new(Arc::clone(&transport), &topology.events_exchange);

        let expiration = Arc::new(ExpirationService::new(
            Arc::clone(&store),
            seat_cache.clone(),
            transport,
            publisher.clone(),
            Arc::clone(&clock),
            &topology.delay_queue,
            booking.availability_cache_ttl,
        ));

        Self {
            catalog: Arc::new(CatalogService::new(Arc::clone(&store), Arc::clone(&clock))),
            reservations: Arc::new(ReservationService::new(
                Arc::clone(&store),
                seat_cache.clone(),
                Arc::clone(&expiration),
                publisher.clone(),
                Arc::clone(&clock),
                booking.hold_ttl,
            )),
            payments: Arc::new(PaymentService::new(
                Arc::clone(&store),
                seat_cache.clone(),
                Arc::clone(&expiration),
                publisher,
                Arc::clone(&clock),
                booking.availability_cache_ttl,
            )),
            availability: Arc::new(AvailabilityService::new(
                store,
                seat_cache,
                clock,
                booking.availability_cache_ttl,
            )),
            expiration,
        }
    }
}

/// Attaches the expiration consumer and, when enabled, the audit consumer.
///
/// # Errors
///
/// Returns the [`TransportError`] of the first subscription that fails.
pub async fn start_consumers(
    transport: &dyn Transport,
    topology: &Topology,
    engines: &Engines,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    options: ConsumeOptions,
    audit_enabled: bool,
) -> Result<(), TransportError> {
    transport
        .subscribe(
            &topology.expired_queue,
            Arc::new(ExpiredMessageHandler::new(Arc::clone(&engines.expiration))),
            options,
        )
        .await?;
    tracing::info!(queue = %topology.expired_queue, "expiration consumer started");

    if audit_enabled {
        transport
            .subscribe(
                &topology.audit_queue,
                Arc::new(AuditConsumer::new(store, clock)),
                options,
            )
            .await?;
        tracing::info!(queue = %topology.audit_queue, "audit consumer started");
    }
    Ok(())
}
