//! Worker side of the channel.
//!
//! A worker connects to the channel named after its own pid, receives the
//! header, values and labels, then answers with one status reply. Each round
//! uses a fresh connection; the host drops the connection after reading the
//! reply.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::channel::channel_path;
use crate::codec::FrameCodec;
use crate::errors::{ClientError, ClientResult, ErrorReport};
use crate::wire::{self, Header};

/// Delay between attempts while the host has not bound the channel yet.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// A table as the worker receives it, trimmed to its declared size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedTable {
    pub column_count: u32,
    pub row_count: u32,
    pub labels: Vec<String>,
    /// Column-major values
    pub values: Vec<f64>,
}

impl ReceivedTable {
    /// One slice per column.
    pub fn columns(&self) -> Vec<&[f64]> {
        if self.row_count == 0 {
            return Vec::new();
        }
        self.values.chunks(self.row_count as usize).collect()
    }
}

/// A worker's connection to the host channel.
pub struct WorkerChannel {
    framed: Framed<UnixStream, FrameCodec>,
}

impl WorkerChannel {
    /// Connects to `path`, retrying until the host is listening or `wait` elapses.
    pub async fn connect(path: impl AsRef<Path>, wait: Duration) -> ClientResult<Self> {
        let path = path.as_ref();
        let deadline = Instant::now() + wait;

        loop {
            match UnixStream::connect(path).await {
                Ok(stream) => {
                    debug!("Connected to {}", path.display());
                    return Ok(Self {
                        framed: Framed::new(stream, FrameCodec::default()),
                    });
                }
                Err(err) if is_not_ready(&err) => {
                    if Instant::now() >= deadline {
                        return Err(ClientError::ConnectTimeout(PathBuf::from(path), wait));
                    }
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Connects to the channel named after this process.
    pub async fn connect_own(wait: Duration) -> ClientResult<Self> {
        Self::connect(channel_path(std::process::id()), wait).await
    }

    /// Reads one request: header, values, labels.
    pub async fn receive(&mut self) -> ClientResult<ReceivedTable> {
        let header = Header::decode(&self.next_frame("header").await?)?;
        let values = wire::decode_values(&self.next_frame("values").await?, header.cell_count())?;
        let labels = wire::decode_labels(&self.next_frame("labels").await?, header.column_count)?;

        debug!(
            columns = header.column_count,
            rows = header.row_count,
            "Received table"
        );
        Ok(ReceivedTable {
            column_count: header.column_count,
            row_count: header.row_count,
            labels,
            values,
        })
    }

    /// Sends the status reply and closes the connection.
    pub async fn reply(mut self, report: &ErrorReport) -> ClientResult<()> {
        self.framed.send(wire::encode_report(report)).await?;
        debug!(code = report.code(), "Sent status");
        Ok(())
    }

    async fn next_frame(&mut self, what: &'static str) -> ClientResult<bytes::Bytes> {
        match self.framed.next().await {
            Some(frame) => Ok(frame?),
            None => Err(ClientError::Closed(what)),
        }
    }
}

fn is_not_ready(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}
