//! Bind the health endpoints right away, then launch the configured application.
use std::sync::Arc;
use std::time::Instant;

use envconfig::Envconfig;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use health::ProcessHealth;
use health_supervisor::app::application_from_config;
use health_supervisor::config::Config;
use health_supervisor::error::SupervisorError;
use health_supervisor::guard::ensure_port_available;
use health_supervisor::server::serve;

async fn shutdown() {
    let interrupt = signal::ctrl_c();

    match signal::unix::signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => tracing::info!("received SIGTERM"),
                _ = interrupt => tracing::info!("received SIGINT"),
            };
        }
        Err(e) => {
            tracing::warn!("failed to register SIGTERM handler: {}", e);
            if let Err(e) = interrupt.await {
                tracing::warn!("failed to listen for SIGINT: {}", e);
            }
        }
    }

    tracing::info!("Shutting down gracefully...");
}

/// Logs go to stdout, filtered by RUST_LOG: colored text when DEBUG is set,
/// JSON lines otherwise.
fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let base_layer = fmt::layer().with_target(true).with_level(true);

    let log_layer = if debug {
        base_layer.with_ansi(true).with_filter(filter).boxed()
    } else {
        base_layer.json().with_filter(filter).boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), SupervisorError> {
    let start_time = Instant::now();

    let config = Config::init_from_env()?;
    init_tracing(config.debug);

    let addr = config.socket_addr()?;
    ensure_port_available(addr)?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| SupervisorError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    let health = Arc::new(ProcessHealth::started_at(start_time));
    let app = application_from_config(&config);
    tracing::info!(
        "starting {}, launching {} after {}ms",
        config.service_name.as_str(),
        app.name(),
        config.grace_period.0.as_millis()
    );

    serve(config, health, app, listener, shutdown()).await
}
