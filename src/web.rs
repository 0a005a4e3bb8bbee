//! HTTP control surface
//!
//! Thin JSON adapter over the in-process engine API plus an SSE endpoint
//! replaying the log broadcast channel to monitoring clients. The engine
//! knows nothing about this layer.

use crate::engine::{EngineError, SyncEngine};
use crate::models::{LogMessage, PerformanceMetrics, ProjectInfo, SyncStatus};
use crate::monitor::Monitor;
use anyhow::{Context as _, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    pub monitor: Monitor,
    pub events: broadcast::Sender<LogMessage>,
    /// Service shutdown token; request-scoped work derives children from it.
    pub shutdown: CancellationToken,
    /// Used when a start request does not name a parallelism.
    pub default_parallelism: usize,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub project: String,
    pub destination: String,
    #[serde(default)]
    pub max_parallelism: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/sync/start", post(start_sync))
        .route("/api/sync/stop", post(stop_sync))
        .route("/api/projects", get(get_projects))
        .route("/api/metrics", get(get_metrics))
        .route("/api/events", get(get_events))
        .with_state(state)
}

/// Serve until `token` fires; in-flight requests drain on shutdown.
pub async fn serve(host: &str, port: u16, state: AppState, token: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;

    info!(address = %format!("http://{host}:{port}"), "web interface listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}

async fn get_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.engine.status())
}

async fn start_sync(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let parallelism = req.max_parallelism.unwrap_or(state.default_parallelism);
    match state.engine.start(&req.project, &req.destination, parallelism) {
        Ok(()) => Ok(StatusCode::OK),
        Err(err @ EngineError::AlreadyRunning) => Err((
            StatusCode::CONFLICT,
            Json(ErrorBody {
                error: err.to_string(),
            }),
        )),
        Err(err) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: err.to_string(),
            }),
        )),
    }
}

async fn stop_sync(State(state): State<AppState>) -> StatusCode {
    state.engine.stop().await;
    StatusCode::OK
}

async fn get_projects(State(state): State<AppState>) -> Json<Vec<ProjectInfo>> {
    // Scans ~28 mountpoints; a service shutdown must be able to cut it
    // short, so the scan runs under a child of the shutdown token.
    let token = state.shutdown.child_token();
    Json(state.engine.find_projects(&token).await)
}

async fn get_metrics(State(state): State<AppState>) -> Json<PerformanceMetrics> {
    Json(state.monitor.metrics())
}

async fn get_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = BroadcastStream::new(state.events.subscribe())
        .filter_map(|msg| msg.ok())
        .map(|msg| Event::default().event("log").json_data(&msg));

    Sse::new(stream).keep_alive(KeepAlive::default())
}
