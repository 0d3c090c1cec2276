use std::future::Future;
use std::sync::Arc;

use health::ProcessHealth;
use tokio::net::TcpListener;

use crate::app::Application;
use crate::config::Config;
use crate::error::SupervisorError;
use crate::launcher::DeferredLauncher;
use crate::metrics::setup_metrics_recorder;
use crate::router;

/// Serve the health endpoints on an already bound listener and schedule the
/// application launch. Returns once `shutdown` resolves and the listener is closed.
pub async fn serve<F>(
    config: Config,
    health: Arc<ProcessHealth>,
    app: Box<dyn Application>,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), SupervisorError>
where
    F: Future<Output = ()> + Send + 'static,
{
    health.mark_healthy();

    // Installed before the launcher exists so its first state is recorded.
    let metrics = if config.export_prometheus {
        Some(setup_metrics_recorder()?)
    } else {
        None
    };

    let launcher = DeferredLauncher::new(app, config.grace_period.0, health.start_time());
    let state = router::State {
        service: Arc::from(config.service_name.as_str()),
        application: Arc::from(launcher.application_name()),
        health,
        launcher: launcher.tracker(),
        child: launcher.child_handle(),
        metrics_enabled: config.export_prometheus,
    };

    let child = launcher.child_handle();
    // The join handle is dropped: the launcher thread is detached.
    launcher.spawn().map_err(SupervisorError::Launcher)?;

    let app = router::router(state, metrics);

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {}", addr),
        Err(e) => tracing::warn!("listening on an unknown address: {}", e),
    }

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(SupervisorError::Serve);

    // The application never outlives the supervisor.
    if let Some(child) = child {
        child.stop();
    }

    served
}
