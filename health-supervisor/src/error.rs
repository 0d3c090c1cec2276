use std::io;
use std::net::AddrParseError;
use std::process::ExitStatus;
use std::time::SystemTimeError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Fatal errors: the supervisor process cannot keep running.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error("invalid bind address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        source: AddrParseError,
    },
    #[error("port {addr} is already in use: {source}")]
    PortUnavailable { addr: String, source: io::Error },
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("failed to install the prometheus recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("failed to start the launcher thread: {0}")]
    Launcher(io::Error),
    #[error("http server exited with an error: {0}")]
    Serve(io::Error),
}

/// Errors of the launched application. They are logged and swallowed by the launcher.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("failed to wait on the application process: {0}")]
    Wait(io::Error),
    #[error("application exited with {0}")]
    Exited(ExitStatus),
    #[error("application panicked: {0}")]
    Panicked(String),
    #[error("application failed: {0}")]
    Failed(String),
}

/// Per-request errors, answered with a 500 without affecting later requests.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("system clock is set before the unix epoch: {0}")]
    Clock(#[from] SystemTimeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!("failed to build response: {}", self);
        match self {
            ApiError::Clock(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        }
        .into_response()
    }
}
