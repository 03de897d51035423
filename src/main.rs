//! Prakruti assessment engine: questionnaire sessions, constitution scoring
//! and report export.
//!
//! - Axum HTTP + WebSocket API
//! - Optional remote record store (PostgREST-style, via environment variables)
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                   : u16 (default 3000)
//!   ASSESSMENT_CONFIG_PATH : path to TOML config (export dir, record store, catalog override)
//!   RECORD_STORE_URL       : enables the remote record store together with the key below
//!   RECORD_STORE_API_KEY   : API key sent to the record store
//!   EXPORT_DIR             : where WebSocket exports are written (default "./exports")
//!   SESSION_TTL_SECS       : idle seconds before a session is dropped (default 1800)
//!   LOCAL_STORE_DIR        : keep session scratch stores on disk under this directory
//!   LOG_LEVEL              : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT             : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod catalog;
mod scoring;
mod store;
mod records;
mod session;
mod export;
mod config;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (catalog, record store, export settings).
  let state = Arc::new(AppState::new());
  let _sweeper = state.clone().spawn_session_sweeper();

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "prakruti_engine", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "prakruti_engine", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "prakruti_engine", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "prakruti_engine", "Shutdown signal received");
}
