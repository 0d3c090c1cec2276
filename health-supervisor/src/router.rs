use std::future::ready;
use std::sync::Arc;

use axum::{extract, http::StatusCode, routing::get, Json, Router};
use health::{epoch_seconds, HealthReport, HealthStatus, ProcessHealth};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use time::OffsetDateTime;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::app::ChildHandle;
use crate::error::ApiError;
use crate::launcher::{LaunchState, LaunchTracker};
use crate::metrics::track_metrics;

#[derive(Clone)]
pub struct State {
    pub service: Arc<str>,
    pub application: Arc<str>,
    pub health: Arc<ProcessHealth>,
    pub launcher: Arc<LaunchTracker>,
    pub child: Option<ChildHandle>,
    pub metrics_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub service: String,
    pub message: String,
    pub status: HealthStatus,
    pub uptime: f64,
    pub endpoints: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub status: HealthStatus,
    pub uptime: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub timestamp: f64,
    pub launcher: LaunchState,
    pub application: String,
    pub application_active: bool,
    pub application_pid: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UptimeResponse {
    pub service: String,
    pub status: HealthStatus,
    pub uptime: f64,
    pub uptime_hours: f64,
    pub uptime_days: f64,
}

async fn index(extract::State(state): extract::State<State>) -> Json<IndexResponse> {
    let mut endpoints = vec!["/health", "/status", "/uptime"];
    if state.metrics_enabled {
        endpoints.push("/metrics");
    }

    Json(IndexResponse {
        service: state.service.to_string(),
        message: format!("{} health responder active", state.service),
        status: state.health.status(),
        uptime: state.health.uptime_secs(),
        endpoints,
    })
}

async fn health_check(
    extract::State(state): extract::State<State>,
) -> Result<HealthReport, ApiError> {
    Ok(state.health.report(&state.service)?)
}

async fn status(
    extract::State(state): extract::State<State>,
) -> Result<Json<StatusResponse>, ApiError> {
    let launcher = state.launcher.state();

    Ok(Json(StatusResponse {
        service: state.service.to_string(),
        status: state.health.status(),
        uptime: state.health.uptime_secs(),
        started_at: state.health.started_at_utc(),
        timestamp: epoch_seconds()?,
        launcher,
        application: state.application.to_string(),
        application_active: launcher == LaunchState::Launched,
        application_pid: state.child.as_ref().and_then(ChildHandle::id),
    }))
}

async fn uptime(extract::State(state): extract::State<State>) -> Json<UptimeResponse> {
    let uptime = state.health.uptime_secs();

    Json(UptimeResponse {
        service: state.service.to_string(),
        status: state.health.status(),
        uptime,
        uptime_hours: uptime / 3600.0,
        uptime_days: uptime / 86400.0,
    })
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn routes() -> Router<State> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/uptime", get(uptime))
}

/// A panicking handler answers 500 for that request only.
fn with_layers(routes: Router<State>) -> Router<State> {
    routes
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn(track_metrics))
}

pub fn router(state: State, metrics: Option<PrometheusHandle>) -> Router {
    let router = with_layers(routes()).with_state(state);

    // Don't install metrics unless asked to
    // A global recorder can only be installed once per process, tests run without it.
    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}
