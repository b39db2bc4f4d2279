//! ==============================================================================
//! main.rs - agrisense host entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the farm monitoring pipeline together and runs it until ctrl-c.
//!
//! responsibilities:
//!     - load configuration and install logging
//!     - read the AI credential (missing credential halts startup)
//!     - load soil readings + weather (retried until both arrive), then keep
//!       the readings fresh
//!     - prefetch AI insights as soon as data is ready
//!     - serve the JSON API for the dashboard
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                      rust host (this file)                   │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//!     │  │ poller      │  │ web server  │  │ insight coordinator  │  │
//!     │  │ (15s cycle) │  │ (port 3000) │  │ (store watcher)      │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬───────────┘  │
//!     │         │ writes         │ reads              │ reads        │
//!     │         └────────────────┼────────────────────┘              │
//!     │                    ┌─────┴─────┐                             │
//!     │                    │   store   │ <- store.rs                 │
//!     │                    └───────────┘                             │
//!     └──────────────────────────────────────────────────────────────┘
//!            │                   │                     │
//!            ▼                   ▼                     ▼
//!      sensor feed         open-meteo            gemini api
//!
//! ==============================================================================

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agrisense::config::AppConfig;
use agrisense::coordinator::InsightCoordinator;
use agrisense::gateway::HttpGateway;
use agrisense::gemini::GeminiClient;
use agrisense::insight::InsightRequester;
use agrisense::poller::{self, Poller};
use agrisense::server::{self, ApiState};
use agrisense::store::FarmStore;

/// RUST_LOG wins over the configured level when set
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  AgriSense Host - Soil, Weather & AI Agronomy");
    println!("===========================================================");

    // step 1: configuration + logging
    let config = AppConfig::load_or_default();
    init_logging(&config.logging.level);
    config.log_summary();

    // step 2: the AI credential is required before anything starts
    let api_key = match config.ai_credential() {
        Ok(key) => key,
        Err(e) => {
            error!("[STARTUP] Fatal: {}", e);
            return Err(e);
        }
    };

    // step 3: clients, store and insight coordinator
    let gateway = Arc::new(HttpGateway::new(&config.sources)?);
    let generator = Arc::new(GeminiClient::new(&config.ai, api_key)?);
    let store = FarmStore::new();
    let requester = InsightRequester::new(generator, config.farm.location.clone());
    let insights = Arc::new(InsightCoordinator::new(requester, store.clone()));
    info!("[STARTUP] ✓ clients ready (model {})", config.ai.model);

    let shutdown = CancellationToken::new();
    let poller = Arc::new(
        Poller::new(gateway.clone(), store.clone(), shutdown.child_token())
            .with_sensor_logging(config.logging.show_sensor_data),
    );

    // step 4: web server in background
    let api_state = ApiState::new(store.clone(), insights.clone(), poller.phase())
        .with_session_limit(config.server.max_chat_sessions);
    let bind = config.server.bind.clone();
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        info!("[STARTUP] ✓ API live at http://{}", bind);
        if let Err(e) = server::run_server(&bind, api_state, server_shutdown).await {
            error!("[SERVER] web server error: {:#}", e);
        }
    });

    // step 5: insight prefetch follows store revisions
    let watcher = tokio::spawn(insights.clone().watch_store(shutdown.child_token()));

    // step 6: initial load; polling never fetches weather, so a failed
    // load is retried on the poll interval until sensors and weather arrive
    let interval = config.polling.interval();
    let loader = tokio::spawn({
        let gateway = gateway.clone();
        let store = store.clone();
        let cancel = shutdown.child_token();
        async move {
            if poller::load_until_ready(gateway.as_ref(), gateway.as_ref(), &store, interval, &cancel).await {
                info!("[STARTUP] ✓ farm data loaded");
            }
        }
    });

    // step 7: freshness polling until ctrl-c
    let handle = poller.start(interval);
    tokio::signal::ctrl_c().await?;
    info!("[SHUTDOWN] ctrl-c received, stopping");

    shutdown.cancel();
    handle.shutdown().await?;
    let (loader, watcher, server_task) = tokio::join!(loader, watcher, server_task);
    for (task, joined) in [("loader", loader), ("insight watcher", watcher), ("web server", server_task)] {
        if let Err(e) = joined {
            error!("[SHUTDOWN] {} task failed: {}", task, e);
        }
    }
    info!("[SHUTDOWN] ✓ stopped");
    Ok(())
}
