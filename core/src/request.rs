//! Plot requests and their wire payloads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, SessionError, SessionResult};
use crate::wire::{self, Header, LABEL_SIZE, MAX_DATA_SIZE};

/// A numeric table to be plotted by the worker.
///
/// `buffer` is column-major: the first `row_count` values are column 0, the next
/// `row_count` are column 1, and so on. `labels` holds one entry per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotRequest {
    pub column_count: u32,
    pub row_count: u32,
    pub labels: Vec<String>,
    pub buffer: Vec<f64>,
}

impl PlotRequest {
    pub fn new(
        column_count: u32,
        row_count: u32,
        labels: Vec<String>,
        buffer: Vec<f64>,
    ) -> Self {
        Self {
            column_count,
            row_count,
            labels,
            buffer,
        }
    }

    /// Builds a request from `(label, column)` pairs of equal length.
    pub fn from_columns<L: Into<String>>(columns: Vec<(L, Vec<f64>)>) -> Self {
        let row_count = columns.first().map(|(_, c)| c.len()).unwrap_or(0) as u32;
        let mut labels = Vec::with_capacity(columns.len());
        let mut buffer = Vec::new();
        for (label, column) in columns {
            labels.push(label.into());
            buffer.extend(column);
        }
        Self {
            column_count: labels.len() as u32,
            row_count,
            labels,
            buffer,
        }
    }

    /// Number of cells the header declares.
    pub fn cell_count(&self) -> u64 {
        u64::from(self.column_count) * u64::from(self.row_count)
    }

    /// Checks the request against the wire limits.
    pub fn validate(&self) -> SessionResult<()> {
        if self.buffer.is_empty() || self.labels.is_empty() {
            return Err(SessionError::new(
                ErrorKind::InputPtrNull,
                "Input buffer or label table is empty",
            ));
        }

        let cells = self.cell_count();
        if cells > MAX_DATA_SIZE as u64 {
            return Err(SessionError::new(
                ErrorKind::BufferOverflow,
                format!(
                    "Buffer size of {} is larger than maximum of {}",
                    cells, MAX_DATA_SIZE
                ),
            ));
        }

        if cells == 0 {
            return Err(SessionError::new(
                ErrorKind::InputPtrNull,
                format!(
                    "Request declares {} columns of {} rows",
                    self.column_count, self.row_count
                ),
            ));
        }

        if (self.buffer.len() as u64) < cells {
            return Err(SessionError::new(
                ErrorKind::InputPtrNull,
                format!(
                    "Buffer holds {} values but {} columns of {} rows were declared",
                    self.buffer.len(),
                    self.column_count,
                    self.row_count
                ),
            ));
        }

        if self.labels.len() != self.column_count as usize {
            return Err(SessionError::new(
                ErrorKind::InputPtrNull,
                format!(
                    "Label table holds {} labels for {} columns",
                    self.labels.len(),
                    self.column_count
                ),
            ));
        }

        if let Some((index, label)) = self
            .labels
            .iter()
            .enumerate()
            .find(|(_, label)| label.len() > LABEL_SIZE - 1)
        {
            return Err(SessionError::new(
                ErrorKind::BufferOverflow,
                format!(
                    "Label {} is {} bytes, maximum is {}",
                    index,
                    label.len(),
                    LABEL_SIZE - 1
                ),
            ));
        }

        Ok(())
    }
}

/// The serialized header, numeric buffer and label table of one request.
///
/// Built once per session and resent unchanged on every round.
#[derive(Debug, Clone)]
pub struct WirePayload {
    header: Bytes,
    values: Bytes,
    labels: Bytes,
}

impl WirePayload {
    pub fn build(request: &PlotRequest) -> SessionResult<Self> {
        request.validate()?;

        let cells = request.cell_count() as usize;
        let header = Header {
            column_count: request.column_count,
            row_count: request.row_count,
        };

        Ok(Self {
            header: header.encode(),
            values: wire::encode_values(&request.buffer[..cells]),
            labels: wire::encode_labels(&request.labels),
        })
    }

    pub fn header(&self) -> Bytes {
        self.header.clone()
    }

    pub fn values(&self) -> Bytes {
        self.values.clone()
    }

    pub fn labels(&self) -> Bytes {
        self.labels.clone()
    }
}
