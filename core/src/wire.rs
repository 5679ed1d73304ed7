//! Fixed-layout records exchanged over the channel.
//!
//! One exchange is three messages from host to worker followed by one reply:
//!
//! | message | layout | bytes |
//! |---------|--------|-------|
//! | header  | `u32` columns, `u32` rows | 8 |
//! | values  | [`MAX_DATA_SIZE`] `f64`, column-major, zero tail | 1 MiB |
//! | labels  | one [`LABEL_SIZE`]-byte NUL-terminated record per column | 128 × columns |
//! | reply   | `u32` code, three [`REPORT_FIELD_SIZE`]-byte strings | 3076 |
//!
//! All integers and floats are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ErrorReport, WireError, REPORT_FIELD_SIZE};

/// Capacity of the numeric payload, in values.
pub const MAX_DATA_SIZE: usize = 131_072;

/// Width of one label record, terminator included.
pub const LABEL_SIZE: usize = 128;

pub const HEADER_LEN: usize = 8;
pub const VALUES_LEN: usize = MAX_DATA_SIZE * std::mem::size_of::<f64>();
pub const REPORT_LEN: usize = 4 + 3 * REPORT_FIELD_SIZE;

/// Table shape sent ahead of the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub column_count: u32,
    pub row_count: u32,
}

impl Header {
    pub fn cell_count(&self) -> u64 {
        u64::from(self.column_count) * u64::from(self.row_count)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_u32_le(self.column_count);
        buf.put_u32_le(self.row_count);
        buf.freeze()
    }

    pub fn decode(mut frame: &[u8]) -> Result<Self, WireError> {
        check_len("header", HEADER_LEN, frame.len())?;
        Ok(Self {
            column_count: frame.get_u32_le(),
            row_count: frame.get_u32_le(),
        })
    }
}

/// Encodes `values` into the full-capacity numeric payload.
///
/// The caller guarantees `values.len() <= MAX_DATA_SIZE`.
pub fn encode_values(values: &[f64]) -> Bytes {
    let mut buf = BytesMut::zeroed(VALUES_LEN);
    for (slot, value) in buf.chunks_exact_mut(8).zip(values) {
        slot.copy_from_slice(&value.to_le_bytes());
    }
    buf.freeze()
}

/// Reads the first `count` values of a numeric payload.
pub fn decode_values(frame: &[u8], count: u64) -> Result<Vec<f64>, WireError> {
    check_len("values", VALUES_LEN, frame.len())?;
    if count > MAX_DATA_SIZE as u64 {
        return Err(WireError::Capacity {
            what: "values",
            declared: count,
            capacity: MAX_DATA_SIZE,
        });
    }
    let mut frame = frame;
    Ok((0..count).map(|_| frame.get_f64_le()).collect())
}

/// Encodes one fixed-width record per label.
///
/// Labels longer than `LABEL_SIZE - 1` bytes are cut; requests are validated
/// before they get here.
pub fn encode_labels<S: AsRef<str>>(labels: &[S]) -> Bytes {
    let mut buf = BytesMut::with_capacity(labels.len() * LABEL_SIZE);
    for label in labels {
        put_fixed_str(&mut buf, label.as_ref(), LABEL_SIZE);
    }
    buf.freeze()
}

pub fn decode_labels(frame: &[u8], column_count: u32) -> Result<Vec<String>, WireError> {
    let expected = column_count as usize * LABEL_SIZE;
    check_len("labels", expected, frame.len())?;
    Ok(frame.chunks_exact(LABEL_SIZE).map(read_fixed_str).collect())
}

pub fn encode_report(report: &ErrorReport) -> Bytes {
    let mut buf = BytesMut::with_capacity(REPORT_LEN);
    buf.put_u32_le(report.code());
    put_fixed_str(&mut buf, report.message(), REPORT_FIELD_SIZE);
    put_fixed_str(&mut buf, report.remedy(), REPORT_FIELD_SIZE);
    put_fixed_str(&mut buf, report.context(), REPORT_FIELD_SIZE);
    buf.freeze()
}

pub fn decode_report(frame: &[u8]) -> Result<ErrorReport, WireError> {
    check_len("reply", REPORT_LEN, frame.len())?;
    let mut code_bytes = &frame[..4];
    let code = code_bytes.get_u32_le();
    let mut fields = frame[4..].chunks_exact(REPORT_FIELD_SIZE).map(read_fixed_str);
    let message = fields.next().unwrap_or_default();
    let remedy = fields.next().unwrap_or_default();
    let context = fields.next().unwrap_or_default();
    Ok(ErrorReport::with_status(code, message, remedy, context))
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), WireError> {
    if expected == actual {
        Ok(())
    } else {
        Err(WireError::Length {
            what,
            expected,
            actual,
        })
    }
}

/// Writes `text` into a `width`-byte NUL-padded field, keeping at least one NUL.
fn put_fixed_str(buf: &mut BytesMut, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(width - 1);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, width - len);
}

fn read_fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SESSION_COMPLETE;

    #[test]
    fn test_header_layout() {
        let header = Header {
            column_count: 2,
            row_count: 3,
        };
        let bytes = header.encode();
        assert_eq!(&bytes[..], &[2, 0, 0, 0, 3, 0, 0, 0]);
        assert_eq!(Header::decode(&bytes).unwrap(), header);
        assert_eq!(header.cell_count(), 6);
    }

    #[test]
    fn test_header_wrong_length() {
        let err = Header::decode(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            WireError::Length {
                what: "header",
                expected: 8,
                actual: 3
            }
        );
    }

    #[test]
    fn test_values_zero_padded_to_capacity() {
        let bytes = encode_values(&[1.0, 2.5]);
        assert_eq!(bytes.len(), VALUES_LEN);
        assert_eq!(&bytes[..8], &1.0f64.to_le_bytes());
        assert_eq!(&bytes[8..16], &2.5f64.to_le_bytes());
        assert!(bytes[16..].iter().all(|&b| b == 0));

        assert_eq!(decode_values(&bytes, 3).unwrap(), vec![1.0, 2.5, 0.0]);
    }

    #[test]
    fn test_values_capacity_checked() {
        let bytes = encode_values(&[]);
        let err = decode_values(&bytes, MAX_DATA_SIZE as u64 + 1).unwrap_err();
        assert!(matches!(err, WireError::Capacity { .. }));
    }

    #[test]
    fn test_label_records() {
        let long = "a".repeat(200);
        let bytes = encode_labels(&["x", long.as_str()]);
        assert_eq!(bytes.len(), 2 * LABEL_SIZE);
        assert_eq!(bytes[0], b'x');
        assert!(bytes[1..LABEL_SIZE].iter().all(|&b| b == 0));
        assert_eq!(bytes[2 * LABEL_SIZE - 1], 0);

        let labels = decode_labels(&bytes, 2).unwrap();
        assert_eq!(labels[0], "x");
        assert_eq!(labels[1].len(), LABEL_SIZE - 1);
    }

    #[test]
    fn test_labels_count_mismatch() {
        let bytes = encode_labels(&["x"]);
        assert!(decode_labels(&bytes, 2).is_err());
    }

    #[test]
    fn test_report_record() {
        let report = ErrorReport::with_status(SESSION_COMPLETE, "done", "", "rendered 2 columns");
        let bytes = encode_report(&report);
        assert_eq!(bytes.len(), REPORT_LEN);
        assert_eq!(&bytes[..4], &[0xFF, 0xFF, 0, 0]);
        assert_eq!(&bytes[4..8], b"done");
        assert_eq!(bytes[8], 0);

        let decoded = decode_report(&bytes).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn test_short_reply_rejected() {
        let err = decode_report(&[0u8; 100]).unwrap_err();
        assert!(err.to_string().contains("reply frame has 100 bytes"));
    }
}
