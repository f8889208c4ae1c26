//! # Wishboard Binary
//!
//! Assembles the application: configuration, logging, the entity store
//! selected at runtime, the broadcast hub and services, the TTL sweeper and
//! the HTTP server.

#[cfg(not(feature = "web-axum"))]
compile_error!("the wishboard binary needs the `web-axum` feature");

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use api_adapters::{router, AppState, Metrics};
use axum::http::HeaderValue;
use chrono::Utc;
use configs::{LogFormat, LogSettings, Settings, StorageBackend};
use domains::EntityStore;
use services::{BoardService, BroadcastHub, ItemService};
use storage_adapters::MemoryStore;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How long open event streams may delay exit after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load configuration")?;
    init_tracing(&settings.log);

    let store = open_store(&settings).await?;
    let hub = BroadcastHub::new(settings.broadcast.channel_capacity);
    let ttl = chrono::Duration::days(i64::from(settings.board.ttl_days));
    let boards = BoardService::new(store.clone(), hub.clone(), ttl);
    let items = ItemService::new(store, hub.clone());

    spawn_ttl_sweeper(boards.clone(), settings.board.purge_interval());

    let state = AppState {
        boards,
        items,
        hub,
        metrics: Arc::new(Metrics::new()),
        keep_alive: settings.broadcast.keep_alive(),
    };
    let app = router(state)
        .layer(cors_layer(&settings.server.cors_origin)?)
        .layer(TraceLayer::new_for_http());

    let addr = settings.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, backend = ?settings.storage.backend, "wishboard listening");

    let stopping = Arc::new(Notify::new());
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(stopping.clone()))
        .into_future();
    tokio::select! {
        served = server => served.context("server error")?,
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => warn!("event streams still open after grace period, exiting"),
    }

    info!("wishboard stopped");
    Ok(())
}

fn init_tracing(log: &LogSettings) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn EntityStore>> {
    match settings.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::with_lock_timeout(
            settings.storage.lock_timeout(),
        ))),
        StorageBackend::Postgres => open_postgres(settings).await,
    }
}

#[cfg(feature = "db-postgres")]
async fn open_postgres(settings: &Settings) -> anyhow::Result<Arc<dyn EntityStore>> {
    use secrecy::ExposeSecret;
    use storage_adapters::PgStore;

    let url = settings
        .database
        .url
        .as_ref()
        .context("database.url is not set")?;
    let store = PgStore::connect(
        url.expose_secret(),
        settings.database.max_connections,
        settings.storage.lock_timeout(),
    )
    .await
    .context("failed to connect to postgres")?;
    store.migrate().await.context("failed to run migrations")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "db-postgres"))]
async fn open_postgres(_settings: &Settings) -> anyhow::Result<Arc<dyn EntityStore>> {
    anyhow::bail!("storage.backend = \"postgres\" but this build lacks the `db-postgres` feature")
}

fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let allow_origin = if origin == "*" {
        AllowOrigin::any()
    } else {
        let value = HeaderValue::from_str(origin)
            .with_context(|| format!("invalid server.cors_origin {origin:?}"))?;
        AllowOrigin::exact(value)
    };
    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

fn spawn_ttl_sweeper(boards: BoardService, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = boards.purge_expired(Utc::now()).await {
                warn!(error = %err, "TTL sweep failed");
            }
        }
    });
}

async fn shutdown_signal(stopping: Arc<Notify>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    stopping.notify_one();
}
