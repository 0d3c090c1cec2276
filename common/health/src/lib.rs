use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Instant, SystemTime, SystemTimeError};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::info;

/// Process-level health state, shared by the HTTP handlers and the
/// background tasks of a supervised service.
///
/// Platform health checks only need to know that the process is up and
/// answering: the state is intentionally tiny. `start_time` is captured once,
/// uptime is derived from it on every read, and the status flag is written
/// once, when the HTTP listener is bound, through `mark_healthy`.
///
/// Everything is either immutable or atomic, so readers never contend with
/// background work for a lock.
#[derive(Debug)]
pub struct ProcessHealth {
    start_time: Instant,
    started_at: OffsetDateTime,
    status: AtomicU8,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Set when the state is created, until the listener is bound
    Starting,
    /// The listener is bound and serving
    Healthy,
    /// Reserved for failure detection, nothing transitions to it yet
    Degraded,
}

impl HealthStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Degraded,
            _ => HealthStatus::Starting,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            HealthStatus::Starting => 0,
            HealthStatus::Healthy => 1,
            HealthStatus::Degraded => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        }
    }
}

impl ProcessHealth {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Build the state for a process that started at `start_time`, for callers
    /// that captured the instant before their own setup ran.
    pub fn started_at(start_time: Instant) -> Self {
        let since_start = start_time.elapsed();
        Self {
            start_time,
            started_at: OffsetDateTime::now_utc() - since_start,
            status: AtomicU8::new(HealthStatus::Starting.as_u8()),
        }
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Wall-clock time the process started, for display only.
    pub fn started_at_utc(&self) -> OffsetDateTime {
        self.started_at
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Record the first successful bind. Calling it again is a no-op.
    pub fn mark_healthy(&self) {
        let previous = self.status.compare_exchange(
            HealthStatus::Starting.as_u8(),
            HealthStatus::Healthy.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if previous.is_ok() {
            info!(
                uptime = self.uptime_secs(),
                "listener bound, process marked healthy"
            );
        }
    }

    /// Seconds since `start_time`, recomputed on every call.
    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Snapshot the state for the `/health` endpoint.
    pub fn report(&self, service: &str) -> Result<HealthReport, SystemTimeError> {
        Ok(HealthReport {
            status: self.status(),
            uptime: self.uptime_secs(),
            timestamp: epoch_seconds()?,
            service: service.to_owned(),
        })
    }
}

impl Default for ProcessHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn epoch_seconds() -> Result<f64, SystemTimeError> {
    Ok(SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)?
        .as_secs_f64())
}

/// Body of the `/health` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime: f64,
    pub timestamp: f64,
    pub service: String,
}

impl IntoResponse for HealthReport {
    /// Health reports are always served with a 200: the platform health check only
    /// looks at reachability, the status field carries the detail.
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
