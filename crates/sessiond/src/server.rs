// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process wiring: config → registry → store → session manager → the
//! `axum` router serving `/ws` (the only upgrade path, `spec.md` §4.6) plus
//! a liveness endpoint. Shutdown runs `SessionManager::close_all` before
//! `Broadcaster::close_all`, per `spec.md` §5's "On process shutdown" order.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use sessiond_storage::Database;

use crate::config::Config;
use crate::registry::{ProviderOverride, Registry};
use crate::session::SessionManager;
use crate::ws::{self, Broadcaster};

/// Build the provider overrides implied by the config's per-provider
/// `<PRODUCT>_<PROVIDER>_CMD` fields (`spec.md` §6).
fn config_overrides(config: &Config) -> HashMap<String, ProviderOverride> {
    let mut overrides = HashMap::new();
    if let Some(cmd) = &config.claude_cmd {
        overrides.insert("claude".to_owned(), ProviderOverride { command: Some(cmd.clone()), ..Default::default() });
    }
    if let Some(cmd) = &config.codex_cmd {
        overrides.insert("codex".to_owned(), ProviderOverride { command: Some(cmd.clone()), ..Default::default() });
    }
    if let Some(cmd) = &config.gemini_cmd {
        overrides.insert("gemini".to_owned(), ProviderOverride { command: Some(cmd.clone()), ..Default::default() });
    }
    overrides
}

pub(crate) fn build_router(broadcaster: Arc<Broadcaster>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(broadcaster)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run the agent session core until shutdown (`Ctrl-C` or the returned
/// token being cancelled). `main` wires this to the process signal; tests
/// can cancel the token directly.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let db = Arc::new(Database::open(&config.db_path).await?);

    let mut registry = Registry::new();
    registry.apply_overrides(&config_overrides(&config));
    let registry = Arc::new(registry);

    let broadcaster = Arc::new(Broadcaster::new());
    broadcaster.spawn_heartbeat();

    let session_manager = SessionManager::new(Arc::clone(&db), registry, Arc::clone(&broadcaster));
    session_manager.reconcile_on_startup().await?;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_signal.cancel();
    });

    let router = build_router(Arc::clone(&broadcaster));
    let listener = TcpListener::bind(config.addr()).await?;
    tracing::info!(addr = %config.addr(), "sessiond listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    session_manager.close_all().await;
    broadcaster.close_all();

    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
