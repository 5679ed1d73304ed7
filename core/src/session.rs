//! Session loop: repeated exchanges with one worker until it reports a status.
//!
//! A worker replying with code 0 asks for another round. Any other code ends
//! the session; [`SESSION_COMPLETE`](crate::errors::SESSION_COMPLETE) is the
//! only successful ending.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::channel::ChannelServer;
use crate::errors::ErrorReport;
use crate::launcher::WorkerProcess;
use crate::request::WirePayload;
use crate::transport;

/// Where a session stands after its latest exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No status recorded yet; another round follows
    Running,

    /// Worker ended the session cleanly
    Completed,

    /// An error was recorded, by the host or by the worker
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Running => write!(f, "Running"),
            SessionState::Completed => write!(f, "Completed"),
            SessionState::Failed => write!(f, "Failed"),
        }
    }
}

impl SessionState {
    /// State implied by the report's current code.
    pub fn after(report: &ErrorReport) -> Self {
        if report.is_complete() {
            SessionState::Completed
        } else if report.is_recorded() {
            SessionState::Failed
        } else {
            SessionState::Running
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub state: SessionState,
    /// Exchanges attempted, including a failed last one
    pub rounds: u32,
}

impl SessionSummary {
    pub fn is_success(&self) -> bool {
        self.state == SessionState::Completed
    }
}

/// Drives exchanges over one channel with one worker.
pub struct Session<'a> {
    channel: &'a ChannelServer,
    worker: &'a mut WorkerProcess,
    payload: &'a WirePayload,
    connect_timeout: Duration,
}

impl<'a> Session<'a> {
    pub fn new(
        channel: &'a ChannelServer,
        worker: &'a mut WorkerProcess,
        payload: &'a WirePayload,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            worker,
            payload,
            connect_timeout,
        }
    }

    /// Runs rounds until `report` holds a non-zero code.
    ///
    /// Nothing is retried: a failed exchange records its error and ends the
    /// session.
    pub async fn run(self, report: &mut ErrorReport) -> SessionSummary {
        let mut state = SessionState::after(report);
        let mut rounds = 0;

        while state == SessionState::Running {
            rounds += 1;
            debug!(round = rounds, pid = self.worker.pid(), "Starting exchange");

            let result = transport::exchange(
                self.channel,
                self.worker,
                self.payload,
                self.connect_timeout,
                report,
            )
            .await;

            state = SessionState::after(report);
            if result.is_err() && state == SessionState::Running {
                report.ensure_recorded();
                state = SessionState::Failed;
            }
        }

        info!(
            rounds,
            %state,
            code = format_args!("{:#010x}", report.code()),
            "Session ended"
        );
        SessionSummary { state, rounds }
    }
}
