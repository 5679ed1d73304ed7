//! Worker process launcher.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::errors::{ErrorKind, SessionError, SessionResult};

/// How long a worker gets after SIGTERM before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Starts the worker as `<interpreter> <script>`.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    interpreter: PathBuf,
    script: PathBuf,
}

impl WorkerLauncher {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            script: config.script.clone(),
        }
    }

    /// Spawns the worker without waiting for it to become ready.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(&self) -> SessionResult<WorkerProcess> {
        if let Err(err) = std::fs::metadata(&self.script) {
            return Err(SessionError::new(
                ErrorKind::ClientNotFound,
                format!("No worker script in {}: {}", self.script.display(), err),
            ));
        }

        info!(
            "Starting worker {} {}",
            self.interpreter.display(),
            self.script.display()
        );

        let child = Command::new(&self.interpreter)
            .arg(&self.script)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SessionError::platform(
                    format_args!(
                        "Starting worker {} {}",
                        self.interpreter.display(),
                        self.script.display()
                    ),
                    e,
                )
            })?;

        let pid = child.id().ok_or_else(|| {
            SessionError::new(
                ErrorKind::PlatformError,
                "Worker exited before its process id could be read",
            )
        })?;

        debug!(pid, "Worker started");
        Ok(WorkerProcess { child, pid })
    }
}

/// A running worker. Killed if dropped while still alive.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    pid: u32,
}

impl WorkerProcess {
    /// Process id, which also names the worker's channel.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// True once the worker has exited.
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// Forcibly kills the worker without waiting for it.
    pub fn terminate(&mut self) {
        warn!(pid = self.pid, "Killing worker");
        if let Err(err) = self.child.start_kill() {
            debug!(pid = self.pid, "Worker already gone: {}", err);
        }
    }

    /// Waits up to `grace` for the worker to exit, then terminates it.
    ///
    /// The child is always reaped before this returns.
    pub async fn shutdown(mut self, grace: Duration) {
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = self.pid, %status, "Worker exited");
                return;
            }
            Ok(Err(err)) => warn!(pid = self.pid, "Failed to wait for worker: {}", err),
            Err(_) => warn!(
                pid = self.pid,
                "Worker still running {:?} after session end",
                grace
            ),
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM).is_ok() {
                if let Ok(Ok(status)) = timeout(TERMINATE_GRACE, self.child.wait()).await {
                    debug!(pid = self.pid, %status, "Worker exited after SIGTERM");
                    return;
                }
            }
        }

        if let Err(err) = self.child.kill().await {
            warn!(pid = self.pid, "Failed to kill worker: {}", err);
        }
    }
}
