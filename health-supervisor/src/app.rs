use std::process::{Child, Command, ExitStatus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::LaunchError;

/// A long-lived service started by the deferred launcher.
///
/// Both methods are called from the launcher's own thread and may block.
pub trait Application: Send + 'static {
    /// Display name, used in logs and on `/status`.
    fn name(&self) -> &str;

    /// Construct whatever the service needs before running.
    fn prepare(&mut self) -> Result<(), LaunchError> {
        Ok(())
    }

    /// Run the service, returning once it stops.
    fn run(&mut self) -> Result<(), LaunchError>;

    /// Handle on the child process backing the service, if any, so it can be
    /// stopped from outside the launcher thread.
    fn child_handle(&self) -> Option<ChildHandle> {
        None
    }
}

/// How often a running child is checked for exit. The lock is released in
/// between so [`ChildHandle::stop`] is never blocked by the launcher.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct ChildSlot {
    child: Option<Child>,
    stopped: bool,
}

/// A child process shared between the launcher thread, which spawns and
/// waits on it, and the server, which stops it on shutdown.
#[derive(Debug, Clone, Default)]
pub struct ChildHandle {
    slot: Arc<Mutex<ChildSlot>>,
}

impl ChildHandle {
    fn lock(&self) -> MutexGuard<'_, ChildSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `command` unless the handle was stopped already.
    fn spawn(&self, command: &mut Command) -> Result<Option<u32>, std::io::Error> {
        let mut slot = self.lock();
        if slot.stopped {
            return Ok(None);
        }
        let child = command.spawn()?;
        let pid = child.id();
        slot.child = Some(child);
        Ok(Some(pid))
    }

    fn try_wait(&self) -> Result<Option<ExitStatus>, LaunchError> {
        match self.lock().child.as_mut() {
            Some(child) => child.try_wait().map_err(LaunchError::Wait),
            None => Ok(None),
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.lock().child.as_ref().map(Child::id)
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Kill and reap the child if it is still running. Later spawns are refused.
    pub fn stop(&self) {
        let mut slot = self.lock();
        slot.stopped = true;
        let Some(child) = slot.child.as_mut() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                let pid = child.id();
                if let Err(e) = child.kill() {
                    warn!(pid, "failed to kill application: {}", e);
                }
                match child.wait() {
                    Ok(status) => info!(pid, "application stopped: {}", status),
                    Err(e) => warn!(pid, "failed to reap application: {}", e),
                }
            }
            Err(e) => warn!("failed to check application status: {}", e),
        }
    }
}

/// Stands in when no application is configured: the process only serves health checks.
#[derive(Debug, Default)]
pub struct NoopApplication;

impl Application for NoopApplication {
    fn name(&self) -> &str {
        "none"
    }

    fn run(&mut self) -> Result<(), LaunchError> {
        info!("no application configured, serving health checks only");
        Ok(())
    }
}

/// Runs an external program as a child process. The child inherits the
/// supervisor's environment as is.
#[derive(Debug)]
pub struct CommandApplication {
    name: String,
    program: String,
    args: Vec<String>,
    child: ChildHandle,
}

impl CommandApplication {
    /// Split a command line on whitespace into program and arguments.
    /// Returns None for a blank command line.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_owned);
        let program = parts.next()?;
        Some(Self {
            name: command_line.trim().to_owned(),
            program,
            args: parts.collect(),
            child: ChildHandle::default(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Application for CommandApplication {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self) -> Result<(), LaunchError> {
        let pid = self
            .child
            .spawn(Command::new(&self.program).args(&self.args))
            .map_err(|source| LaunchError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        match pid {
            Some(pid) => {
                info!(pid, "spawned {}", self.name);
                Ok(())
            }
            None => Err(LaunchError::Failed(format!(
                "{} not spawned, shutting down",
                self.name
            ))),
        }
    }

    fn run(&mut self) -> Result<(), LaunchError> {
        if self.child.id().is_none() {
            return Err(LaunchError::Failed(format!(
                "{} was not spawned before running",
                self.name
            )));
        }

        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            thread::sleep(CHILD_POLL_INTERVAL);
        };

        if status.success() || self.child.is_stopped() {
            info!("{} exited: {}", self.name, status);
            Ok(())
        } else {
            Err(LaunchError::Exited(status))
        }
    }

    fn child_handle(&self) -> Option<ChildHandle> {
        Some(self.child.clone())
    }
}

/// Pick the application to launch from the configuration.
pub fn application_from_config(config: &Config) -> Box<dyn Application> {
    match config
        .app_command
        .as_ref()
        .and_then(|command| CommandApplication::from_command_line(command.as_str()))
    {
        Some(app) => Box::new(app),
        None => Box::new(NoopApplication),
    }
}
