//! One framed exchange with the worker: connect, send, flush, read status, reset.

use futures::{SinkExt, StreamExt};
use std::io;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::channel::ChannelServer;
use crate::codec::FrameCodec;
use crate::errors::{ErrorKind, ErrorReport, SessionError, SessionResult};
use crate::launcher::WorkerProcess;
use crate::request::WirePayload;
use crate::wire;

/// Runs one exchange and folds its outcome into `report`.
///
/// A successful exchange hands the worker's reply to `report`; a failed one
/// records the failure. Either way `report` keeps the first error it saw.
/// If the worker never connects it is killed before this returns.
pub async fn exchange(
    channel: &ChannelServer,
    worker: &mut WorkerProcess,
    payload: &WirePayload,
    connect_timeout: Duration,
    report: &mut ErrorReport,
) -> SessionResult<()> {
    match transfer(channel, worker, payload, connect_timeout).await {
        Ok(reply) => {
            debug!(code = reply.code(), "Worker replied");
            report.absorb(reply);
            Ok(())
        }
        Err(err) => {
            report.record_error(&err);
            Err(err)
        }
    }
}

async fn transfer(
    channel: &ChannelServer,
    worker: &mut WorkerProcess,
    payload: &WirePayload,
    connect_timeout: Duration,
) -> SessionResult<ErrorReport> {
    let stream = match channel.accept(connect_timeout).await {
        Ok(stream) => stream,
        Err(err) => {
            if err.kind() == ErrorKind::ServerTimeout {
                worker.terminate();
            }
            return Err(err);
        }
    };
    let mut framed = Framed::new(stream, FrameCodec::default());

    framed
        .feed(payload.header())
        .await
        .map_err(|e| SessionError::platform("Writing header to channel", e))?;
    framed
        .feed(payload.values())
        .await
        .map_err(|e| SessionError::platform("Writing data buffer to channel", e))?;
    framed
        .feed(payload.labels())
        .await
        .map_err(|e| SessionError::platform("Writing labels to channel", e))?;
    framed
        .flush()
        .await
        .map_err(|e| SessionError::platform("Flushing channel", e))?;
    debug!("Request delivered to worker");

    let frame = match framed.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Err(SessionError::platform("Reading status from channel", e)),
        None => {
            return Err(SessionError::platform(
                "Reading status from channel",
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "worker closed the channel before replying",
                ),
            ))
        }
    };
    let reply = wire::decode_report(&frame).map_err(|e| {
        SessionError::platform(
            "Decoding status reply",
            io::Error::new(io::ErrorKind::InvalidData, e),
        )
    })?;

    disconnect(framed);
    Ok(reply)
}

/// Drops the worker's connection, discarding anything it left unread, so the
/// channel can accept the next round.
fn disconnect(framed: Framed<UnixStream, FrameCodec>) {
    let parts = framed.into_parts();
    if !parts.read_buf.is_empty() {
        debug!(
            bytes = parts.read_buf.len(),
            "Discarding unread bytes from worker"
        );
    }
    drop(parts.io);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WorkerChannel;
    use crate::config::WorkerConfig;
    use crate::errors::SESSION_COMPLETE;
    use crate::launcher::WorkerLauncher;
    use crate::request::PlotRequest;
    use bytes::Bytes;
    use std::io::Write;

    struct Fixture {
        _dir: tempfile::TempDir,
        _script: tempfile::NamedTempFile,
        channel: ChannelServer,
        worker: WorkerProcess,
        payload: WirePayload,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let channel = ChannelServer::open_at(dir.path().join("chan")).unwrap();

        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "exec sleep 30").unwrap();
        let worker = WorkerLauncher::new(&WorkerConfig::new("/bin/sh", script.path()))
            .launch()
            .unwrap();

        let request = PlotRequest::from_columns(vec![
            ("x", vec![1.0, 2.0, 3.0]),
            ("y", vec![4.0, 5.0, 6.0]),
        ]);
        let payload = WirePayload::build(&request).unwrap();

        Fixture {
            _dir: dir,
            _script: script,
            channel,
            worker,
            payload,
        }
    }

    #[tokio::test]
    async fn test_exchange_delivers_request_and_reads_reply() {
        let mut fx = fixture();
        let path = fx.channel.path().to_path_buf();

        let peer = tokio::spawn(async move {
            let mut channel = WorkerChannel::connect(&path, Duration::from_secs(5))
                .await
                .unwrap();
            let table = channel.receive().await.unwrap();
            channel
                .reply(&ErrorReport::session_complete())
                .await
                .unwrap();
            table
        });

        let mut report = ErrorReport::new();
        exchange(
            &fx.channel,
            &mut fx.worker,
            &fx.payload,
            Duration::from_secs(5),
            &mut report,
        )
        .await
        .unwrap();

        assert_eq!(report.code(), SESSION_COMPLETE);
        let table = peer.await.unwrap();
        assert_eq!(table.labels, vec!["x", "y"]);
        assert_eq!(table.values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        fx.worker.terminate();
    }

    #[tokio::test]
    async fn test_exchange_timeout_kills_worker() {
        let mut fx = fixture();
        let mut report = ErrorReport::new();

        let err = exchange(
            &fx.channel,
            &mut fx.worker,
            &fx.payload,
            Duration::from_millis(100),
            &mut report,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServerTimeout);
        assert_eq!(report.kind(), Some(ErrorKind::ServerTimeout));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fx.worker.has_exited());
    }

    #[tokio::test]
    async fn test_peer_hangup_is_platform_error() {
        let mut fx = fixture();
        let path = fx.channel.path().to_path_buf();

        let peer = tokio::spawn(async move {
            let mut channel = WorkerChannel::connect(&path, Duration::from_secs(5))
                .await
                .unwrap();
            channel.receive().await.unwrap();
        });

        let mut report = ErrorReport::new();
        let err = exchange(
            &fx.channel,
            &mut fx.worker,
            &fx.payload,
            Duration::from_secs(5),
            &mut report,
        )
        .await
        .unwrap_err();
        peer.await.unwrap();

        assert_eq!(err.kind(), ErrorKind::PlatformError);
        assert!(report.context().contains("Reading status from channel failed"));
        fx.worker.terminate();
    }

    #[tokio::test]
    async fn test_malformed_reply_is_platform_error() {
        let mut fx = fixture();
        let path = fx.channel.path().to_path_buf();

        let peer = tokio::spawn(async move {
            let stream = UnixStream::connect(&path).await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::default());
            for _ in 0..3 {
                framed.next().await.unwrap().unwrap();
            }
            framed.send(Bytes::from_static(b"short")).await.unwrap();
        });

        let mut report = ErrorReport::new();
        let err = exchange(
            &fx.channel,
            &mut fx.worker,
            &fx.payload,
            Duration::from_secs(5),
            &mut report,
        )
        .await
        .unwrap_err();
        peer.await.unwrap();

        assert_eq!(err.kind(), ErrorKind::PlatformError);
        assert!(report.context().contains("reply frame has 5 bytes"));
        fx.worker.terminate();
    }

    #[tokio::test]
    async fn test_existing_error_not_overwritten() {
        let mut fx = fixture();
        let mut report = ErrorReport::with_status(0x0007_0000, "render failed", "", "");

        let _ = exchange(
            &fx.channel,
            &mut fx.worker,
            &fx.payload,
            Duration::from_millis(50),
            &mut report,
        )
        .await;

        assert_eq!(report.code(), 0x0007_0000);
        assert_eq!(report.message(), "render failed");
    }
}
