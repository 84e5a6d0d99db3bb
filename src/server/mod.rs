//! HTTP/WS server wiring (§2.1).
//!
//! Grounded on the teacher's `server::start()` shape: one `Router`,
//! one shared state struct handed to handlers via axum `State`, a
//! `tower_http::trace::TraceLayer` plus a permissive `CorsLayer`. This
//! drops the teacher's JWT auth middleware, device-agent routes, and
//! HTML pages: authentication and HTTPS termination sit in front of
//! this process, same as the log receiver and system-instruction
//! provider (§1).

pub mod operator;
pub mod telephony;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use reqwest::Client;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::call::CallRegistry;
use crate::config::Config;
use crate::tools::ToolTable;

/// State shared across every connection handler. Cheap to clone: every
/// field is an `Arc` or an already-cheap-to-clone client.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http: Client,
    pub registry: Arc<CallRegistry>,
    pub tool_table: Arc<ToolTable>,
}

pub async fn start(config: Config) -> Result<()> {
    let bind_addr = config.bind_addr;
    std::fs::create_dir_all(&config.recordings_dir).with_context(|| {
        format!(
            "failed to create recordings directory {:?}",
            config.recordings_dir
        )
    })?;
    let state = AppState {
        config: Arc::new(config),
        http: Client::new(),
        registry: CallRegistry::new(),
        tool_table: Arc::new(ToolTable::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws/telephony", get(telephony::telephony_ws_handler))
        .route("/ws/operator", get(operator::operator_ws_handler))
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("listening on {bind_addr}");
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    axum::serve(listener, app).await.context("server error")
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(axum::extract::State(state): axum::extract::State<AppState>) -> Json<serde_json::Value> {
    let active_calls = state.registry.list().await.len();
    Json(json!({
        "active_calls": active_calls,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
