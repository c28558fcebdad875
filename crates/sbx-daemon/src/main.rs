//! sbx-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, resolves the
//! configuration, picks the store and upstream modes, spawns the background
//! jobs, and starts the HTTP server. All route handlers live in `routes.rs`;
//! shared state types live in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::Method;
use prometheus::Registry;
use sbx_config::BrokerConfig;
use sbx_daemon::{routes, state};
use sbx_engine::{jobs, BrokerMetrics, BrokerService, EngineOptions};
use sbx_store::{MemoryStore, PgStore, SandboxStore};
use sbx_upstream::{CspClient, MockInventory, UpstreamInventory};
use tokio::sync::watch;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = BrokerConfig::from_env().context("resolving configuration")?;

    let registry = Registry::new();
    let metrics =
        Arc::new(BrokerMetrics::new(&registry).context("registering broker metrics")?);

    let store: Arc<dyn SandboxStore> = match &cfg.database_url {
        Some(url) => {
            let pg = PgStore::connect(url, cfg.store_timeout)
                .await
                .context("connecting to the sandbox store")?;
            pg.migrate().await.context("migrating the sandbox store")?;
            info!("store mode: postgres");
            Arc::new(pg)
        }
        None => {
            info!("store mode: in-memory (BROKER_DATABASE_URL not set)");
            Arc::new(MemoryStore::new())
        }
    };

    let upstream: Arc<dyn UpstreamInventory> = match &cfg.csp_api_token {
        Some(token) => {
            info!(base_url = %cfg.csp_base_url, "upstream mode: csp");
            Arc::new(
                CspClient::new(&cfg.csp_base_url, token, cfg.upstream_timeout)
                    .context("building the upstream client")?,
            )
        }
        None => {
            info!("upstream mode: mock fixture (CSP_API_TOKEN not set)");
            Arc::new(MockInventory::with_fixture())
        }
    };

    let service = Arc::new(BrokerService::new(
        store,
        upstream,
        metrics,
        EngineOptions::from_config(&cfg),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    jobs::spawn_sync_loop(
        Arc::clone(&service.sync),
        cfg.sync_interval,
        shutdown_rx.clone(),
    );
    jobs::spawn_cleanup_loop(
        Arc::clone(&service.cleanup),
        cfg.cleanup_interval,
        shutdown_rx,
    );

    let shared = Arc::new(state::AppState::new(&cfg, service, registry));
    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_api());

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    info!("sbx-daemon listening on http://{}", cfg.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Resolve on SIGINT and flip the job shutdown signal so the background
/// loops stop starting new store work while the server drains.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received; draining");
    let _ = shutdown_tx.send(true);
}

/// CORS for the API surface: bearer-authenticated, no credentials, GET/POST.
fn cors_api() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
