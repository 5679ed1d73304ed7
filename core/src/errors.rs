/// Error types for the pipeplot IPC engine.
///
/// Failures inside a session are carried as [`SessionError`] values and end up in a
/// single [`ErrorReport`], which keeps only the first failure it is given.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::panic::Location;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Size of each text field of a status report on the wire, terminator included.
pub const REPORT_FIELD_SIZE: usize = 1024;

/// Status code a worker puts in its final reply to end the session cleanly.
pub const SESSION_COMPLETE: u32 = 0x0000_FFFF;

/// Error kinds live in the high 16 bits of a status code.
const ERROR_KIND_MASK: u32 = 0xFFFF_0000;

const _: () = assert!(SESSION_COMPLETE & ERROR_KIND_MASK == 0);

/// Failure taxonomy shared by the host and the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The request is missing its buffer, labels or cells
    InputPtrNull,
    /// The worker entry point could not be found
    ClientNotFound,
    /// An OS primitive failed (spawn, bind, accept, write, flush, read)
    PlatformError,
    /// The declared data does not fit the wire capacity
    BufferOverflow,
    /// No worker connected to the channel in time
    ServerTimeout,
    /// A failure path finished without recording a report
    NotFirstError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::InputPtrNull,
        ErrorKind::ClientNotFound,
        ErrorKind::PlatformError,
        ErrorKind::BufferOverflow,
        ErrorKind::ServerTimeout,
        ErrorKind::NotFirstError,
    ];

    /// Status code written into [`ErrorReport::code`].
    pub const fn code(self) -> u32 {
        match self {
            ErrorKind::InputPtrNull => 0x0001_0000,
            ErrorKind::ClientNotFound => 0x0002_0000,
            ErrorKind::PlatformError => 0x0003_0000,
            ErrorKind::BufferOverflow => 0x0004_0000,
            ErrorKind::ServerTimeout => 0x0005_0000,
            ErrorKind::NotFirstError => 0x0006_0000,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            ErrorKind::InputPtrNull => "Input is missing or empty",
            ErrorKind::ClientNotFound => "The plotting worker could not be found",
            ErrorKind::PlatformError => "Error occurred while calling the operating system",
            ErrorKind::BufferOverflow => "The buffer size is not large enough",
            ErrorKind::ServerTimeout => {
                "The plotting worker failed to connect to the channel within the timeout period"
            }
            ErrorKind::NotFirstError => "An error occurred earlier without logging any error info",
        }
    }

    pub const fn remedy(self) -> &'static str {
        match self {
            ErrorKind::InputPtrNull => "Check the input of the function",
            ErrorKind::ClientNotFound => "Check the configured worker script path",
            ErrorKind::PlatformError => "Check the OS error recorded in the context",
            ErrorKind::BufferOverflow => "Reduce the input size",
            ErrorKind::ServerTimeout => {
                "Check the plotting worker and that the channel is configured correctly"
            }
            ErrorKind::NotFirstError => "Ensure the error is logged properly",
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InputPtrNull => write!(f, "InputPtrNull"),
            ErrorKind::ClientNotFound => write!(f, "ClientNotFound"),
            ErrorKind::PlatformError => write!(f, "PlatformError"),
            ErrorKind::BufferOverflow => write!(f, "BufferOverflow"),
            ErrorKind::ServerTimeout => write!(f, "ServerTimeout"),
            ErrorKind::NotFirstError => write!(f, "NotFirstError"),
        }
    }
}

/// Status report returned by a plot session.
///
/// `code == 0` means nothing has been recorded yet. Once the code is non-zero the
/// report is frozen: later failures are dropped so the caller sees the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    code: u32,
    message: String,
    remedy: String,
    context: String,
}

impl ErrorReport {
    /// An empty report with no error recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// A report with every field set, as a worker sends it back.
    pub fn with_status(
        code: u32,
        message: impl AsRef<str>,
        remedy: impl AsRef<str>,
        context: impl AsRef<str>,
    ) -> Self {
        Self {
            code,
            message: truncate_field(message.as_ref()),
            remedy: truncate_field(remedy.as_ref()),
            context: truncate_field(context.as_ref()),
        }
    }

    /// The reply a worker sends after its last round.
    pub fn session_complete() -> Self {
        Self::with_status(SESSION_COMPLETE, "", "", "")
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn remedy(&self) -> &str {
        &self.remedy
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// The error kind behind the code, if it is one of ours.
    pub fn kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.code)
    }

    /// True once any code has been written.
    pub fn is_recorded(&self) -> bool {
        self.code != 0
    }

    /// True when the worker ended the session with [`SESSION_COMPLETE`].
    pub fn is_complete(&self) -> bool {
        self.code == SESSION_COMPLETE
    }

    /// Records a failure unless one is already recorded.
    ///
    /// `detail` is suffixed with the source location. Returns whether the report
    /// was written.
    pub fn report(
        &mut self,
        code: u32,
        message: &str,
        remedy: &str,
        detail: &str,
        location: &Location<'_>,
    ) -> bool {
        if self.code != 0 {
            return false;
        }

        self.code = code;
        self.message = truncate_field(message);
        self.remedy = truncate_field(remedy);
        self.context = truncate_field(&format!(
            "{} ({}, {})",
            detail,
            location.file(),
            location.line()
        ));

        tracing::error!(
            code = format_args!("{:#010x}", code),
            message = %self.message,
            context = %self.context,
            "Recorded session error"
        );
        true
    }

    /// Records `kind` with its standard message and remedy at the caller's location.
    #[track_caller]
    pub fn report_kind(&mut self, kind: ErrorKind, detail: &str) -> bool {
        self.report(
            kind.code(),
            kind.message(),
            kind.remedy(),
            detail,
            Location::caller(),
        )
    }

    /// Records a session error at the location where it was raised.
    pub fn record_error(&mut self, err: &SessionError) -> bool {
        let detail = match err.source_ref() {
            Some(source) => format!("{}: {}", err.detail(), source),
            None => err.detail().to_string(),
        };
        self.report(
            err.kind().code(),
            err.kind().message(),
            err.remedy(),
            &detail,
            err.location(),
        )
    }

    /// Takes a worker's reply wholesale if nothing is recorded yet.
    pub(crate) fn absorb(&mut self, reply: ErrorReport) -> bool {
        if self.code != 0 {
            return false;
        }
        *self = reply;
        true
    }

    /// Flags a failure path that never recorded anything.
    #[track_caller]
    pub fn ensure_recorded(&mut self) {
        if self.code == 0 {
            self.report_kind(
                ErrorKind::NotFirstError,
                "Session failed without recording an error",
            );
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#010x}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            write!(f, ": {}", self.context)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorReport {}

fn truncate_field(text: &str) -> String {
    let limit = REPORT_FIELD_SIZE - 1;
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// A failure raised inside a plot session.
#[derive(Error, Debug)]
#[error("{kind}: {detail}")]
pub struct SessionError {
    kind: ErrorKind,
    detail: String,
    remedy: Option<String>,
    #[source]
    source: Option<io::Error>,
    location: &'static Location<'static>,
}

impl SessionError {
    #[track_caller]
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            remedy: None,
            source: None,
            location: Location::caller(),
        }
    }

    /// An OS-level failure of `operation`; the OS error text ends up in the report context.
    #[track_caller]
    pub fn platform(operation: impl fmt::Display, source: io::Error) -> Self {
        Self {
            kind: ErrorKind::PlatformError,
            detail: format!("{} failed", operation),
            remedy: None,
            source: Some(source),
            location: Location::caller(),
        }
    }

    pub fn with_remedy(mut self, remedy: impl Into<String>) -> Self {
        self.remedy = Some(remedy.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn remedy(&self) -> &str {
        self.remedy.as_deref().unwrap_or(self.kind.remedy())
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    fn source_ref(&self) -> Option<&io::Error> {
        self.source.as_ref()
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Malformed frame contents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("{what} frame has {actual} bytes, expected {expected}")]
    Length {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what} frame declares {declared} values, capacity is {capacity}")]
    Capacity {
        what: &'static str,
        declared: u64,
        capacity: usize,
    },
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors seen by the worker side of the channel.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Channel {} did not accept a connection within {:?}", .0.display(), .1)]
    ConnectTimeout(PathBuf, Duration),

    #[error("Host closed the channel while waiting for the {0} frame")]
    Closed(&'static str),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for worker-side operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let mut report = ErrorReport::new();
        assert!(!report.is_recorded());

        assert!(report.report_kind(ErrorKind::ServerTimeout, "first"));
        assert!(!report.report_kind(ErrorKind::PlatformError, "second"));

        assert_eq!(report.kind(), Some(ErrorKind::ServerTimeout));
        assert!(report.context().starts_with("first ("));
        assert_eq!(report.message(), ErrorKind::ServerTimeout.message());
    }

    #[test]
    fn test_context_carries_location() {
        let mut report = ErrorReport::new();
        report.report_kind(ErrorKind::InputPtrNull, "Input struct is empty");

        assert!(report.context().contains("errors.rs"));
        assert!(report.context().starts_with("Input struct is empty ("));
    }

    #[test]
    fn test_record_session_error_includes_os_text() {
        let err = SessionError::platform(
            "writing header to channel",
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed by peer"),
        );
        let mut report = ErrorReport::new();
        assert!(report.record_error(&err));

        assert_eq!(report.code(), ErrorKind::PlatformError.code());
        assert!(report
            .context()
            .contains("writing header to channel failed: pipe closed by peer"));
        assert_eq!(report.remedy(), ErrorKind::PlatformError.remedy());
    }

    #[test]
    fn test_custom_remedy() {
        let err = SessionError::new(ErrorKind::ClientNotFound, "missing")
            .with_remedy("Install the worker");
        assert_eq!(err.remedy(), "Install the worker");
        assert_eq!(err.to_string(), "ClientNotFound: missing");
    }

    #[test]
    fn test_absorb_respects_first_error() {
        let mut report = ErrorReport::new();
        assert!(report.absorb(ErrorReport::with_status(0x0007_0000, "render", "", "")));
        assert!(!report.absorb(ErrorReport::session_complete()));
        assert_eq!(report.code(), 0x0007_0000);
        assert_eq!(report.kind(), None);
    }

    #[test]
    fn test_fields_truncated_on_char_boundary() {
        let long = "é".repeat(800);
        let report = ErrorReport::with_status(1, &long, "", "");

        assert!(report.message().len() <= REPORT_FIELD_SIZE - 1);
        assert_eq!(report.message().len(), 1022);
        assert!(report.message().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_ensure_recorded() {
        let mut report = ErrorReport::new();
        report.ensure_recorded();
        assert_eq!(report.kind(), Some(ErrorKind::NotFirstError));

        let mut report = ErrorReport::with_status(0x0004_0000, "overflow", "", "");
        report.ensure_recorded();
        assert_eq!(report.kind(), Some(ErrorKind::BufferOverflow));
    }

    #[test]
    fn test_session_complete_outside_error_kind_space() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.code() & !ERROR_KIND_MASK, 0, "{kind}");
            assert_ne!(kind.code(), SESSION_COMPLETE);
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(SESSION_COMPLETE), None);
        assert!(ErrorReport::session_complete().is_complete());
    }

    #[test]
    fn test_report_display() {
        let mut report = ErrorReport::new();
        report.report(0x0002_0000, "not found", "look again", "no script", Location::caller());
        let text = report.to_string();
        assert!(text.starts_with("[0x00020000] not found: no script ("));
    }
}
