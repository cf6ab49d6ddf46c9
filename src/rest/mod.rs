// rest/mod.rs — HTTP surface for heartbeat ingestion and status queries.
//
// Endpoints:
//   POST /heartbeat   (auth)  — accept one heartbeat report
//   GET  /status      (auth)  — latest committed state of every agent
//   GET  /summary     (auth)  — fleet health report
//   GET  /health              — liveness of the daemon itself
//
// The handlers parse/authorize and delegate; all semantics live in the core.

use anyhow::Result;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::DEFAULT_EXPECTED_INTERVAL_HOURS;
use crate::error::MonitorError;
use crate::AppContext;

const AUTH_HEADER: &str = "x-auth-token";

pub async fn start(ctx: Arc<AppContext>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("heartbeat API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/heartbeat", post(receive_heartbeat))
        .route("/status", get(get_status))
        .route("/summary", get(get_summary))
        // Health (no auth)
        .route("/health", get(health))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(ctx)
}

// ─── Auth ─────────────────────────────────────────────────────────────────────

/// Check the X-Auth-Token header. `auth_token: None` disables authentication
/// (local-only, trusted loopback use).
fn check_auth(ctx: &AppContext, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    let Some(expected) = ctx.config.auth_token.as_deref() else {
        return Ok(());
    };
    let supplied = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    if supplied == Some(expected) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid auth token" })),
        ))
    }
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct HeartbeatRequest {
    agent_name: String,
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default = "default_interval")]
    expected_interval_hours: i64,
}

fn default_interval() -> i64 {
    DEFAULT_EXPECTED_INTERVAL_HOURS
}

async fn receive_heartbeat(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> (StatusCode, Json<Value>) {
    if let Err(denied) = check_auth(&ctx, &headers) {
        return denied;
    }

    match ctx
        .ingest
        .ingest(
            &req.agent_name,
            &req.status,
            &req.message,
            req.expected_interval_hours,
        )
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "received",
                "agent": outcome.agent_name,
                "timestamp": ctx.clock.now().to_rfc3339(),
            })),
        ),
        Err(MonitorError::Validation(msg)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })))
        }
        Err(e) => {
            error!(agent = %req.agent_name, error = %e, "heartbeat ingestion failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "heartbeat could not be stored" })),
            )
        }
    }
}

async fn get_status(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if let Err(denied) = check_auth(&ctx, &headers) {
        return denied;
    }

    match ctx.registry.status_snapshot().await {
        Ok(agents) => {
            let total = agents.len();
            (
                StatusCode::OK,
                Json(json!({ "agents": agents, "total": total })),
            )
        }
        Err(e) => {
            error!(error = %e, "status snapshot failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "status unavailable" })),
            )
        }
    }
}

async fn get_summary(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if let Err(denied) = check_auth(&ctx, &headers) {
        return denied;
    }

    match ctx.dispatcher.summarize().await {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::to_value(report).unwrap_or_default()),
        ),
        Err(e) => {
            error!(error = %e, "summary generation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "summary unavailable" })),
            )
        }
    }
}

async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": ctx.started_at.elapsed().as_secs(),
        "timestamp": ctx.clock.now().to_rfc3339(),
    }))
}
