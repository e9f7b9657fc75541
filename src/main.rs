//! wallet_ledger - Event-sourced wallet ledger service
//!
//! Commands append to an event log, mirror to a projected ledger, and
//! publish to an external bus via a transactional outbox.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod aggregate;
pub mod api;
pub mod bus;
mod config;
mod db;
pub mod domain;
mod error;
pub mod event_store;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod lock;
pub mod outbox;
pub mod projector;
pub mod recovery;
pub mod snapshot;

pub use config::Config;
pub use error::{AppError, AppResult};

use api::AppState;
use idempotency::IdempotencyCache;
use lock::DistributedLock;
use projector::{LedgerProjector, ProjectorRuntime, ReadModelProjector};
use recovery::RecoveryScheduler;

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wallet_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    let api_router = api::create_router()
        .layer(middleware::from_fn(api::middleware::logging_middleware))
        .layer(middleware::from_fn(api::middleware::context_middleware));

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api_router)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("starting wallet_ledger server");
    tracing::info!("connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("database schema is not complete, run migrations first");
        return Err(anyhow::anyhow!("database schema incomplete"));
    }
    tracing::info!("database connected successfully");

    let lock = DistributedLock::connect(&config.redis_url).await?;
    let idempotency =
        IdempotencyCache::new(pool.clone()).with_ttl_hours(config.idempotency_ttl_hours);

    let state = AppState {
        pool: pool.clone(),
        lock,
        lock_ttl: config.lock_ttl,
        lock_max_retries: config.lock_max_retries,
        idempotency: idempotency.clone(),
        snapshot_threshold: config.snapshot_threshold,
        debug_capture_dir: config.debug_capture_dir.clone(),
    };

    if config.projectors_auto_start {
        let mut projector_config = projector::ProjectorConfig::default();
        projector_config.poll_interval = config.projector_poll_interval;
        projector_config.batch_size = config.outbox_batch_size;

        let ledger_runtime = Arc::new(ProjectorRuntime::with_config(
            pool.clone(),
            projector_config.clone(),
        ));
        ledger_runtime.start(Arc::new(LedgerProjector::new(pool.clone())));

        let read_model_runtime =
            Arc::new(ProjectorRuntime::with_config(pool.clone(), projector_config));
        read_model_runtime.start(Arc::new(ReadModelProjector::new(pool.clone())));

        tracing::info!("projector workers started");
    }

    Arc::new(RecoveryScheduler::new(pool.clone(), config.recovery_interval)).start();
    tracing::info!("recovery scheduler started");

    jobs::JobScheduler::new(pool.clone(), idempotency).start();
    tracing::info!("maintenance job scheduler started");

    bus::provision_topics(&config.kafka_brokers).await?;
    let publisher = Arc::new(bus::BusPublisher::new(
        pool.clone(),
        &config.kafka_brokers,
        &config.kafka_client_id,
        config.outbox_batch_size,
    )?);
    publisher.start(config.bus_poll_interval);
    tracing::info!("bus publisher started");

    tracing::info!("listening on http://{}", addr);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutting down...");
    pool.close().await;
    tracing::info!("database connections closed, goodbye");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating graceful shutdown...");
        },
    }
}
