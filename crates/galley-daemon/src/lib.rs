//! Daemon: webhook endpoint, cron scheduler, and chat-update pump.
//!
//! `serve` wires the application graph from validated configuration plus
//! the injected peripheral adapters, registers the webhook with the
//! cloud, spawns the scheduler, and runs the HTTP server until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use galley_chat::Update;
use galley_config::Config;

pub mod adapters;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use state::{build_app, Adapters, AppState};

/// Feed one chat update into the dispatcher. The transport integration
/// calls this for every message/callback it receives.
pub async fn handle_chat_update(state: &AppState, update: Update) {
    if let Err(e) = galley_flows::handle_update(&state.deps, update).await {
        warn!(error = %e, "update handling failed");
    }
}

/// Run the daemon until the process is stopped.
pub async fn serve(config: Config, adapters: Adapters) -> Result<()> {
    let bind_addr = config.bind_addr.clone();
    let webhook_secret = config.webhook_secret.clone();

    let state = Arc::new(build_app(config, adapters).await?);

    scheduler::spawn_scheduler(
        Arc::clone(&state.deps),
        scheduler::standard_jobs(),
    )?;

    // Webhook registration is best-effort at boot: the cloud may not have
    // a token provisioned yet, and the operator can re-register later.
    let callback = format!("http://{bind_addr}/webhook");
    if let Err(e) = state.cloud.register_webhook(&callback, &webhook_secret).await {
        warn!(error = %e, "webhook registration failed; continuing");
    }

    let app = routes::build_router(Arc::clone(&state)).layer(
        tower_http::trace::TraceLayer::new_for_http(),
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr} failed"))?;
    info!("galley daemon listening on http://{bind_addr}");

    axum::serve(listener, app).await.context("server crashed")?;
    Ok(())
}
