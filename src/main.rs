//! Exam practice backend.
//!
//! - Axum HTTP + WebSocket API
//! - Gemini question generation and explanations (via environment variables)
//! - First free port out of an ordered candidate list
//!
//! Important env variables (see `edutest::config` for the full list):
//!   GEMINI_API_KEY     : enables the upstream generator
//!   PORT               : single port, overrides PORT_CANDIDATES
//!   PORT_CANDIDATES    : default "5000,5001,5002,3000,3001"
//!   FRONTEND_ORIGINS   : CORS allow-list
//!   EDUTEST_CONFIG_PATH: TOML with prompt templates and exam timing
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};

use tracing::{error, info};

use edutest::config::ServerConfig;
use edutest::listener::bind_first_free;
use edutest::routes::build_router;
use edutest::state::AppState;
use edutest::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  dotenvy::dotenv().ok();
  telemetry::init_tracing(telemetry::SERVER_DEFAULT_FILTER);

  let config = ServerConfig::from_env();
  let candidates: Vec<SocketAddr> =
    config.port_candidates.iter().map(|port| SocketAddr::new(config.bind_addr, *port)).collect();

  // Build shared application state (config, prompts, upstream client).
  let state = Arc::new(AppState::from_config(config));
  let app = build_router(state);

  let listener = bind_first_free(&candidates).await?;
  let addr = listener.local_addr()?;
  info!(target: "edutest", %addr, "HTTP server listening");
  info!(target: "edutest", "Test the API at: http://localhost:{}/api/test", addr.port());

  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  info!(target: "edutest", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "edutest", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "edutest", "Shutdown signal received");
}
