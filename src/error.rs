// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use std::io;
use thiserror::Error;

use crate::types::SegmentId;

#[derive(Error, Debug)]
pub enum SpoolError {
    /// Truncated or corrupt framing of a single record.
    #[error("Malformed record at index {index}: {reason}")]
    MalformedRecord { index: u64, reason: String },

    /// A segment file whose header does not describe what we expected.
    #[error("Malformed segment {segment}: {reason}")]
    MalformedSegment { segment: SegmentId, reason: String },

    /// The next segment could not be allocated. Fatal to the appender.
    #[error("Storage exhausted while allocating segment {segment}: {source}")]
    StorageExhausted {
        segment: SegmentId,
        #[source]
        source: io::Error,
    },

    /// The segment a cursor points into was pruned.
    #[error("Segment {0} is gone")]
    SegmentGone(SegmentId),

    /// A payload that cannot fit in an empty segment.
    #[error("Record of {len} bytes exceeds the segment limit of {max} bytes")]
    RecordTooLarge { len: usize, max: usize },

    #[error("Index {index} is outside the log (tail is {tail})")]
    IndexOutOfRange { index: u64, tail: u64 },

    #[error("Expected a {expected} record at index {index}, found {found}")]
    UnexpectedPayload {
        index: u64,
        expected: &'static str,
        found: &'static str,
    },

    /// A call record that does not match the receiver's method table.
    #[error("Protocol mismatch at index {index}: {reason}")]
    ProtocolMismatch { index: u64, reason: String },

    /// The persisted index hint file failed its checksum; it is rebuilt.
    #[error("Index file checksum mismatch: expected {expected:016x}, found {found:016x}")]
    IndexChecksum { expected: u64, found: u64 },

    #[error("An appender is already active on this log")]
    AppenderBusy,

    #[error("Log was opened read-only")]
    ReadOnly,

    #[error("Command worker panicked")]
    WorkerPanicked,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SpoolError {
    pub(crate) fn malformed(index: u64, reason: impl Into<String>) -> Self {
        SpoolError::MalformedRecord {
            index,
            reason: reason.into(),
        }
    }

    pub(crate) fn bad_segment(segment: SegmentId, reason: impl Into<String>) -> Self {
        SpoolError::MalformedSegment {
            segment,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpoolError>;

/// Error raised by a receiver while handling a dispatched call.
pub type OperationError = Box<dyn std::error::Error + Send + Sync + 'static>;
