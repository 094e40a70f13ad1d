//! seat-reservation-engine server entry point.
//!
//! Wires the store, cache and broker, starts the queue consumers and serves
//! the REST API.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use seat_reservation_engine::api;
use seat_reservation_engine::app_state::AppState;
use seat_reservation_engine::cache::{KeyValueCache, MemoryCache, RedisCache};
use seat_reservation_engine::config::AppConfig;
use seat_reservation_engine::domain::{Clock, SystemClock};
use seat_reservation_engine::service::{Engines, start_consumers};
use seat_reservation_engine::store::{MemoryStore, PgStore, Store};
use seat_reservation_engine::transport::{ConsumeOptions, MemoryBroker, Topology, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, "starting seat-reservation-engine");

    // Store
    let (store, storage_backend): (Arc<dyn Store>, &'static str) = if config.persistence_enabled {
        let pg = PgStore::connect(&config.database)
            .await
            .context("connecting to PostgreSQL")?;
        pg.ping().await.context("PostgreSQL health check")?;
        if config.database.run_migrations {
            pg.migrate().await.context("applying migrations")?;
            tracing::info!("database migrations applied");
        }
        let store: Arc<dyn Store> = Arc::new(pg);
        (store, "postgres")
    } else {
        tracing::warn!("persistence disabled, state lives in memory");
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        (store, "memory")
    };

    // Availability cache
    let cache: Arc<dyn KeyValueCache> = match config.redis_url.as_deref() {
        Some(url) => match RedisCache::connect(url).await {
            Ok(redis) => Arc::new(redis),
            Err(err) => {
                tracing::warn!(error = %err, "redis unavailable, using in-memory cache");
                Arc::new(MemoryCache::new())
            }
        },
        None => Arc::new(MemoryCache::new()),
    };

    // Broker
    let transport: Arc<dyn Transport> = Arc::new(MemoryBroker::new());
    let topology = Topology::from_config(&config.messaging);
    topology
        .declare(transport.as_ref())
        .await
        .context("declaring broker topology")?;

    // Build service layer
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engines = Engines::new(
        Arc::clone(&store),
        cache,
        Arc::clone(&transport),
        &topology,
        Arc::clone(&clock),
        config.booking,
    );

    start_consumers(
        transport.as_ref(),
        &topology,
        &engines,
        store,
        clock,
        ConsumeOptions {
            max_redeliveries: config.messaging.max_redeliveries,
            retry_backoff: config.messaging.retry_backoff,
        },
        config.messaging.audit_enabled,
    )
    .await
    .context("starting consumers")?;
    engines.expiration.reschedule_pending().await?;

    // Build application state
    let app_state = AppState {
        engines,
        storage_backend,
    };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
