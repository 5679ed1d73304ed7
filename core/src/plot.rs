//! Top-level plot operation.

use std::time::Duration;
use tracing::{info, warn};

use crate::channel::ChannelServer;
use crate::config::PlotConfig;
use crate::errors::{ErrorKind, ErrorReport, SessionError};
use crate::launcher::{WorkerLauncher, WorkerProcess};
use crate::request::{PlotRequest, WirePayload};
use crate::session::Session;

/// Sends plot requests to a freshly started worker, one session per call.
#[derive(Debug, Clone, Default)]
pub struct Plotter {
    config: PlotConfig,
}

impl Plotter {
    pub fn new(config: PlotConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlotConfig {
        &self.config
    }

    /// Runs a whole session and returns once every resource is released.
    ///
    /// Requests are validated before anything is spawned. On failure the
    /// returned report holds the first error recorded.
    pub async fn plot_async(&self, request: &PlotRequest) -> Result<(), ErrorReport> {
        let mut report = ErrorReport::new();

        match WirePayload::build(request) {
            Ok(payload) => self.run_session(&payload, &mut report).await,
            Err(err) => {
                report.record_error(&err);
            }
        }

        if report.is_complete() {
            info!(
                columns = request.column_count,
                rows = request.row_count,
                "Plot delivered"
            );
            return Ok(());
        }
        report.ensure_recorded();
        Err(report)
    }

    /// Blocking form of [`plot_async`](Self::plot_async).
    ///
    /// Runs on a private current-thread runtime, so it must not be called from
    /// inside another tokio runtime.
    pub fn plot(&self, request: &PlotRequest) -> Result<(), ErrorReport> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                let mut report = ErrorReport::new();
                report.record_error(&SessionError::platform("Starting session runtime", e));
                report
            })?;
        runtime.block_on(self.plot_async(request))
    }

    async fn run_session(&self, payload: &WirePayload, report: &mut ErrorReport) {
        let mut worker = match WorkerLauncher::new(&self.config.worker).launch() {
            Ok(worker) => worker,
            Err(err) => {
                report.record_error(&err);
                return;
            }
        };

        let channel = match ChannelServer::open(worker.pid()) {
            Ok(channel) => channel,
            Err(err) => {
                report.record_error(&err);
                release(worker, Duration::ZERO).await;
                return;
            }
        };

        let summary = Session::new(
            &channel,
            &mut worker,
            payload,
            self.config.session.connect_timeout(),
        )
        .run(report)
        .await;

        drop(channel);
        let grace = if summary.is_success() {
            self.config.session.shutdown_grace()
        } else {
            Duration::ZERO
        };
        release(worker, grace).await;
    }
}

async fn release(worker: WorkerProcess, grace: Duration) {
    let pid = worker.pid();
    worker.shutdown(grace).await;
    if grace.is_zero() {
        warn!(pid, "Worker stopped after a failed session");
    }
}

/// Plots `request` with the configuration found by [`PlotConfig::load`].
pub fn plot(request: &PlotRequest) -> Result<(), ErrorReport> {
    match PlotConfig::load(None) {
        Ok(config) => Plotter::new(config).plot(request),
        Err(err) => {
            let mut report = ErrorReport::new();
            report.report_kind(
                ErrorKind::PlatformError,
                &format!("Loading plot configuration failed: {}", err),
            );
            Err(report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use std::path::PathBuf;

    fn plotter_with_script(script: PathBuf) -> Plotter {
        let mut config = PlotConfig::default();
        config.worker = WorkerConfig::new("/bin/sh", script);
        config.session.connect_timeout_ms = 200;
        Plotter::new(config)
    }

    #[test]
    fn test_empty_request_is_input_ptr_null() {
        let plotter = plotter_with_script(PathBuf::from("/nonexistent/worker"));
        let report = plotter.plot(&PlotRequest::default()).unwrap_err();
        assert_eq!(report.kind(), Some(ErrorKind::InputPtrNull));
    }

    #[test]
    fn test_oversized_request_reports_size() {
        let plotter = plotter_with_script(PathBuf::from("/nonexistent/worker"));
        let request = PlotRequest::new(2, 70_000, vec!["a".into(), "b".into()], vec![0.0; 4]);

        let report = plotter.plot(&request).unwrap_err();
        assert_eq!(report.kind(), Some(ErrorKind::BufferOverflow));
        assert!(report.context().contains("140000"));
    }

    #[test]
    fn test_missing_script_is_client_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let plotter = plotter_with_script(dir.path().join("plot_worker.py"));
        let request = PlotRequest::from_columns(vec![("x", vec![1.0])]);

        let report = plotter.plot(&request).unwrap_err();
        assert_eq!(report.kind(), Some(ErrorKind::ClientNotFound));
    }

    #[test]
    fn test_silent_worker_times_out() {
        use std::io::Write;

        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "exec sleep 30").unwrap();
        let plotter = plotter_with_script(script.path().to_path_buf());
        let request = PlotRequest::from_columns(vec![("x", vec![1.0, 2.0])]);

        let started = std::time::Instant::now();
        let report = plotter.plot(&request).unwrap_err();
        assert_eq!(report.kind(), Some(ErrorKind::ServerTimeout));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_plot_async_in_runtime() {
        let plotter = plotter_with_script(PathBuf::from("/nonexistent/worker"));
        let request = PlotRequest::from_columns(vec![("x", vec![1.0])]);

        let report = plotter.plot_async(&request).await.unwrap_err();
        assert_eq!(report.kind(), Some(ErrorKind::ClientNotFound));
    }
}
