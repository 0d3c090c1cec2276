//! Deferred start of the supervised application.
//!
//! The launcher owns a dedicated OS thread: it sleeps until the grace period
//! (measured from process start) has elapsed, then prepares and runs the
//! application. Errors and panics are caught, logged and recorded in the shared
//! [`LaunchTracker`]; they never reach the HTTP server, which keeps answering
//! health checks whatever happens here. There is no retry.

use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::app::{Application, ChildHandle};
use crate::error::LaunchError;
use crate::metrics;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchState {
    /// Waiting for the grace period to elapse
    Pending,
    /// Grace period over, the application is being prepared
    Launching,
    /// The application is running, or has stopped cleanly
    Launched,
    /// The application failed to prepare or run. Terminal.
    Failed,
}

impl LaunchState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LaunchState::Launching,
            2 => LaunchState::Launched,
            3 => LaunchState::Failed,
            _ => LaunchState::Pending,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            LaunchState::Pending => 0,
            LaunchState::Launching => 1,
            LaunchState::Launched => 2,
            LaunchState::Failed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchState::Pending => "pending",
            LaunchState::Launching => "launching",
            LaunchState::Launched => "launched",
            LaunchState::Failed => "failed",
        }
    }
}

/// Launch state shared between the launcher thread (sole writer) and the
/// HTTP handlers.
#[derive(Debug, Default)]
pub struct LaunchTracker {
    state: AtomicU8,
}

impl LaunchTracker {
    /// A tracker in the `pending` state, recorded right away so the gauge
    /// exists before the grace period ends.
    pub fn new() -> Self {
        let tracker = Self::default();
        metrics::record_launch_state(LaunchState::Pending);
        tracker
    }

    pub fn state(&self) -> LaunchState {
        LaunchState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: LaunchState) {
        self.state.store(state.as_u8(), Ordering::Release);
        metrics::record_launch_state(state);
    }
}

pub struct DeferredLauncher {
    app: Box<dyn Application>,
    grace_period: Duration,
    start_time: Instant,
    tracker: Arc<LaunchTracker>,
}

impl DeferredLauncher {
    pub fn new(app: Box<dyn Application>, grace_period: Duration, start_time: Instant) -> Self {
        Self {
            app,
            grace_period,
            start_time,
            tracker: Arc::new(LaunchTracker::new()),
        }
    }

    pub fn tracker(&self) -> Arc<LaunchTracker> {
        self.tracker.clone()
    }

    pub fn application_name(&self) -> &str {
        self.app.name()
    }

    pub fn child_handle(&self) -> Option<ChildHandle> {
        self.app.child_handle()
    }

    /// Start the launcher thread. The handle can be dropped: the thread is
    /// detached and dies with the process.
    pub fn spawn(self) -> io::Result<JoinHandle<LaunchState>> {
        thread::Builder::new()
            .name("deferred-launcher".into())
            .spawn(move || self.launch())
    }

    /// Wait out the grace period, then prepare and run the application on
    /// the current thread. Returns the final state.
    pub fn launch(mut self) -> LaunchState {
        let remaining = self.grace_period.saturating_sub(self.start_time.elapsed());
        if !remaining.is_zero() {
            info!(
                "launching {} in {:.1}s",
                self.app.name(),
                remaining.as_secs_f64()
            );
            thread::sleep(remaining);
        }

        self.tracker.set(LaunchState::Launching);
        info!("grace period elapsed, launching {}", self.app.name());

        if let Err(err) = guarded(|| self.app.prepare()) {
            return self.fail(err);
        }

        self.tracker.set(LaunchState::Launched);
        metrics::record_launch_result("launched");
        info!("{} launched", self.app.name());

        match guarded(|| self.app.run()) {
            Ok(()) => {
                warn!("{} stopped, only health checks remain", self.app.name());
                LaunchState::Launched
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&self, err: LaunchError) -> LaunchState {
        error!(
            "{} failed, continuing in degraded mode: {}",
            self.app.name(),
            err
        );
        self.tracker.set(LaunchState::Failed);
        metrics::record_launch_result("failed");
        LaunchState::Failed
    }
}

/// Call into the application, turning a panic into a LaunchError.
fn guarded<F>(f: F) -> Result<(), LaunchError>
where
    F: FnOnce() -> Result<(), LaunchError>,
{
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(panic_error(payload)))
}

fn panic_error(payload: Box<dyn Any + Send>) -> LaunchError {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    };
    LaunchError::Panicked(message)
}
