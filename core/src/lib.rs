// Pipeplot: hand a numeric table to an external plotting worker
// Core library providing the host session and the worker-side channel client

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod errors;
pub mod launcher;
pub mod plot;
pub mod request;
pub mod session;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use errors::{
    ClientError, ClientResult, ConfigError, ErrorKind, ErrorReport, SessionError, SessionResult,
    WireError, REPORT_FIELD_SIZE, SESSION_COMPLETE,
};

pub use config::{PlotConfig, SessionConfig, WorkerConfig};

pub use request::{PlotRequest, WirePayload};

pub use plot::{plot, Plotter};

pub use session::{Session, SessionState, SessionSummary};

pub use channel::{channel_path, channel_prefix, ChannelServer, CHANNEL_DIR_ENV};

pub use client::{ReceivedTable, WorkerChannel};

pub use launcher::{WorkerLauncher, WorkerProcess};

pub use wire::{LABEL_SIZE, MAX_DATA_SIZE};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
