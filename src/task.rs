//! Task representation shared by both sides of the pipeline and its wire codec.
//!
//! A [`Task`] travels over the channel as a fixed-size binary record with an explicit
//! format version, so the wire layout is specified independently of any in-memory
//! representation. All multi-byte fields are big-endian.

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Fixed payload size carried by every task on a channel (64x64 RGB frame).
///
/// The channel's message size is derived from this constant and must never vary
/// within one channel's lifetime.
pub const PAYLOAD_SIZE: usize = 64 * 64 * 3;

/// Version byte prepended to every encoded record.
pub const WIRE_FORMAT_VERSION: u8 = 1;

/// Size in bytes of one encoded task record:
/// version (1) + id (4) + send_time (8) + max_interval (4) + payload.
pub const WIRE_SIZE: usize = 1 + 4 + 8 + 4 + PAYLOAD_SIZE;

/// Unit of work exchanged over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Unique within a producer's run; monotonically increasing per producer.
    pub id: i32,
    /// Nanoseconds since the Unix epoch, stamped immediately before transmission.
    pub send_time_ns: i64,
    /// Expected maximum permissible latency in milliseconds (SLA hint derived
    /// from the scheduling deadline; 0 when the policy carries no deadline).
    pub max_interval: i32,
    /// Fixed-size opaque byte buffer, always [`PAYLOAD_SIZE`] bytes long.
    pub payload: Vec<u8>,
}

/// Errors produced while decoding a wire record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("record is {found} bytes, expected {expected}")]
    WrongLength { found: usize, expected: usize },
    #[error("unsupported wire format version {0}")]
    VersionMismatch(u8),
    #[error("payload is {0} bytes, expected {PAYLOAD_SIZE}")]
    WrongPayloadSize(usize),
}

impl Task {
    /// Serialize the task into one fixed-size wire record.
    ///
    /// Fails when the payload does not match the channel-wide fixed size, so an
    /// oversized message can never reach the transport.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.payload.len() != PAYLOAD_SIZE {
            return Err(CodecError::WrongPayloadSize(self.payload.len()));
        }
        let mut buf = Vec::with_capacity(WIRE_SIZE);
        buf.push(WIRE_FORMAT_VERSION);
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&self.send_time_ns.to_be_bytes());
        buf.extend_from_slice(&self.max_interval.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse one wire record back into a task.
    pub fn decode(record: &[u8]) -> Result<Task, CodecError> {
        if record.len() != WIRE_SIZE {
            return Err(CodecError::WrongLength {
                found: record.len(),
                expected: WIRE_SIZE,
            });
        }
        if record[0] != WIRE_FORMAT_VERSION {
            return Err(CodecError::VersionMismatch(record[0]));
        }
        let id = i32::from_be_bytes(record[1..5].try_into().unwrap());
        let send_time_ns = i64::from_be_bytes(record[5..13].try_into().unwrap());
        let max_interval = i32::from_be_bytes(record[13..17].try_into().unwrap());
        let payload = record[17..].to_vec();
        Ok(Task {
            id,
            send_time_ns,
            max_interval,
            payload,
        })
    }
}

/// Current wall-clock time as nanoseconds since the Unix epoch.
///
/// Both sides of the pipeline stamp with this clock so latencies are comparable
/// across execution contexts. Under clock skew a receive stamp may precede the
/// send stamp; the resulting negative latency is recorded as-is downstream.
pub fn epoch_nanos() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos() as i64,
        Err(before_epoch) => -(before_epoch.duration().as_nanos() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        let mut payload = vec![0u8; PAYLOAD_SIZE];
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        Task {
            id: 42,
            send_time_ns: 1_700_000_000_123_456_789,
            max_interval: 30,
            payload,
        }
    }

    #[test]
    fn encode_decode_preserves_every_field() {
        let task = sample_task();
        let record = task.encode().unwrap();
        assert_eq!(record.len(), WIRE_SIZE);
        assert_eq!(record[0], WIRE_FORMAT_VERSION);

        let decoded = Task::decode(&record).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut record = sample_task().encode().unwrap();
        record[0] = WIRE_FORMAT_VERSION + 1;
        assert_eq!(
            Task::decode(&record),
            Err(CodecError::VersionMismatch(WIRE_FORMAT_VERSION + 1))
        );
    }

    #[test]
    fn decode_rejects_truncated_record() {
        let record = sample_task().encode().unwrap();
        let err = Task::decode(&record[..WIRE_SIZE - 1]).unwrap_err();
        assert_eq!(
            err,
            CodecError::WrongLength {
                found: WIRE_SIZE - 1,
                expected: WIRE_SIZE,
            }
        );
    }

    #[test]
    fn encode_rejects_wrong_payload_size() {
        let mut task = sample_task();
        task.payload.push(0);
        assert_eq!(
            task.encode(),
            Err(CodecError::WrongPayloadSize(PAYLOAD_SIZE + 1))
        );
    }
}
