/// Configuration for plot sessions.
/// Loaded from .pipeplot/config.toml, ~/.pipeplot/config.toml, or defaults.
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Time a worker gets to connect before the session gives up on it.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Time a worker gets to exit on its own after the session ends.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlotConfig {
    /// How to start the worker
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Session timing
    #[serde(default)]
    pub session: SessionConfig,
}

impl PlotConfig {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            let local = PathBuf::from(".pipeplot/config.toml");
            if local.exists() {
                return Some(local);
            }

            dirs::home_dir().map(|h| h.join(".pipeplot/config.toml"))
        });

        match config_path {
            Some(p) if p.exists() => {
                debug!("Loading configuration from {}", p.display());
                let content = std::fs::read_to_string(&p)?;
                Self::from_toml_str(&content)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.interpreter.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "worker.interpreter must not be empty".to_string(),
            ));
        }
        if self.worker.script.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "worker.script must not be empty".to_string(),
            ));
        }
        if self.session.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Worker launch settings.
///
/// The worker runs as `<interpreter> <script>` with no other arguments and
/// inherits the caller's environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,

    /// Entry point of the worker; must exist before a session starts
    #[serde(default = "default_script")]
    pub script: PathBuf,
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("python3")
}

fn default_script() -> PathBuf {
    PathBuf::from("plotter/plot_worker.py")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: default_script(),
        }
    }
}

impl WorkerConfig {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }
}

/// Session timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long each round waits for the worker to connect
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long the worker may keep running once the session is over
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
