//! Channel server: a private Unix socket named after the worker's pid.

use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::errors::{ErrorKind, SessionError, SessionResult};

/// Overrides the directory channels are created in.
pub const CHANNEL_DIR_ENV: &str = "PIPEPLOT_CHANNEL_DIR";

const DIR_MODE: u32 = 0o700;
const SOCKET_MODE: u32 = 0o600;

/// Directory shared by host and worker for channel sockets.
pub fn channel_prefix() -> PathBuf {
    match std::env::var_os(CHANNEL_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir().join("pipeplot"),
    }
}

/// Channel path for the worker with process id `identity`.
pub fn channel_path(identity: u32) -> PathBuf {
    channel_prefix().join(identity.to_string())
}

/// Listening end of a worker channel.
///
/// Accepts one connection at a time; the socket file is removed on drop.
/// When a peer pid is set, connections from any other process are dropped.
#[derive(Debug)]
pub struct ChannelServer {
    path: PathBuf,
    listener: UnixListener,
    peer: Option<u32>,
}

impl ChannelServer {
    /// Opens the channel for the worker with process id `identity`.
    ///
    /// Only that process is accepted as a peer.
    pub fn open(identity: u32) -> SessionResult<Self> {
        Ok(Self::open_at(channel_path(identity))?.with_peer(identity))
    }

    /// Opens a channel at an explicit socket path, accepting any peer.
    ///
    /// The parent directory is created with mode 0700 if missing. An existing
    /// parent must be a directory owned by the current user and writable by
    /// nobody else. Must be called from within a tokio runtime.
    pub fn open_at(path: impl Into<PathBuf>) -> SessionResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            prepare_dir(parent)?;
        }

        if fs::symlink_metadata(&path).is_ok() {
            debug!("Removing stale channel {}", path.display());
            fs::remove_file(&path).map_err(|e| {
                SessionError::platform(
                    format_args!("Removing stale channel {}", path.display()),
                    e,
                )
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            SessionError::platform(format_args!("Creating channel {}", path.display()), e)
        })?;
        let server = Self {
            path,
            listener,
            peer: None,
        };
        set_mode(&server.path, SOCKET_MODE)?;

        info!("Channel open at {}", server.path.display());
        Ok(server)
    }

    /// Restricts the channel to connections from process `pid`.
    pub fn with_peer(mut self, pid: u32) -> Self {
        self.peer = Some(pid);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn peer(&self) -> Option<u32> {
        self.peer
    }

    /// Waits up to `wait` for the worker to connect.
    ///
    /// Connections from processes other than the expected peer are closed and
    /// do not extend the wait.
    pub async fn accept(&self, wait: Duration) -> SessionResult<UnixStream> {
        let deadline = Instant::now() + wait;

        loop {
            let stream = match timeout_at(deadline, self.listener.accept()).await {
                Ok(Ok((stream, _addr))) => stream,
                Ok(Err(e)) => {
                    return Err(SessionError::platform("Accepting worker connection", e))
                }
                Err(_) => {
                    return Err(SessionError::new(
                        ErrorKind::ServerTimeout,
                        format!(
                            "No response from the worker after {} seconds",
                            wait.as_secs_f64()
                        ),
                    ))
                }
            };

            let Some(expected) = self.peer else {
                debug!("Worker connected to {}", self.path.display());
                return Ok(stream);
            };
            match peer_pid(&stream) {
                Some(pid) if pid == expected => {
                    debug!(pid, "Worker connected to {}", self.path.display());
                    return Ok(stream);
                }
                other => warn!(
                    expected,
                    peer = ?other,
                    "Rejected connection from a foreign process"
                ),
            }
        }
    }
}

impl Drop for ChannelServer {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!("Could not remove channel {}: {}", self.path.display(), err);
        }
    }
}

fn peer_pid(stream: &UnixStream) -> Option<u32> {
    let cred = stream.peer_cred().ok()?;
    cred.pid().and_then(|pid| u32::try_from(pid).ok())
}

/// Creates `dir` private to the current user, or checks that it already is.
fn prepare_dir(dir: &Path) -> SessionResult<()> {
    match fs::symlink_metadata(dir) {
        Ok(meta) => check_private(dir, &meta),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(dir)
                .map_err(|e| {
                    SessionError::platform(
                        format_args!("Creating channel directory {}", dir.display()),
                        e,
                    )
                })?;
            set_mode(dir, DIR_MODE)?;
            let meta = fs::symlink_metadata(dir).map_err(|e| {
                SessionError::platform(
                    format_args!("Inspecting channel directory {}", dir.display()),
                    e,
                )
            })?;
            check_private(dir, &meta)
        }
        Err(err) => Err(SessionError::platform(
            format_args!("Inspecting channel directory {}", dir.display()),
            err,
        )),
    }
}

fn check_private(dir: &Path, meta: &fs::Metadata) -> SessionResult<()> {
    let problem = if !meta.is_dir() {
        Some("it is not a directory".to_string())
    } else if meta.uid() != nix::unistd::getuid().as_raw() {
        Some(format!("it is owned by uid {}", meta.uid()))
    } else if meta.mode() & 0o022 != 0 {
        Some(format!("its mode is {:o}", meta.mode() & 0o777))
    } else {
        None
    };

    match problem {
        None => Ok(()),
        Some(problem) => Err(SessionError::new(
            ErrorKind::PlatformError,
            format!("Channel directory {} is not private: {}", dir.display(), problem),
        )
        .with_remedy(format!(
            "Remove the directory or point {} at a directory only you can write to",
            CHANNEL_DIR_ENV
        ))),
    }
}

fn set_mode(path: &Path, mode: u32) -> SessionResult<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        SessionError::platform(
            format_args!("Setting mode {:o} on {}", mode, path.display()),
            e,
        )
    })?;
    debug!("Set permissions {:o} on {}", mode, path.display());
    Ok(())
}
