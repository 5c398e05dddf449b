//! Real-time relay for SyncKode collaborative rooms.
//!
//! One websocket per browser tab. The relay keeps room and voice presence,
//! relays document edits, cursors, chat and WebRTC signaling between members,
//! and runs submitted code or allowlisted commands on the host, streaming the
//! output back to the requesting connection.

pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod handlers;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod rooms;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod voice;
pub mod websocket;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::rooms::MemoryRoomDirectory;
use crate::state::RelayState;

#[derive(Clone)]
pub struct AppState {
    pub relay: RelayState,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State for `config` backed by the in-memory room directory.
    pub fn from_config(config: &Config, metrics: Option<PrometheusHandle>) -> Self {
        let directory = MemoryRoomDirectory::with_default_rooms();
        for room in &config.extra_rooms {
            directory.ensure_room(room);
        }
        Self {
            relay: RelayState::new(Arc::new(directory), config.exec.clone()),
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::stats))
        .route("/rooms", get(handlers::list_rooms))
        .route("/metrics", get(handlers::metrics))
        .route("/ws", get(websocket::websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error")
}

pub async fn run(config: Config, metrics: Option<PrometheusHandle>) -> Result<()> {
    tokio::fs::create_dir_all(config.scratch_dir())
        .await
        .with_context(|| format!("failed to create scratch dir {}", config.scratch_dir().display()))?;

    let state = AppState::from_config(&config, metrics);
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!(
        listen_addr = %config.listen_addr,
        scratch_dir = %config.scratch_dir().display(),
        exec_timeout_secs = config.exec.timeout.as_secs(),
        "synckode relay listening"
    );

    serve(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
