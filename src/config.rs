// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration constants and log options.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpoolError};

/// Extension of segment files inside a log directory.
pub const SEGMENT_EXTENSION: &str = "seg";

/// Name of the persisted sequence-index hint file.
pub const INDEX_FILE_NAME: &str = "index.idx";

/// Magic bytes at the start of every segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"SPL\x01";

/// On-disk format version written into segment headers.
pub const FORMAT_VERSION: u32 = 1;

/// Size in bytes of the segment header. Frames start right after it.
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// Frames are padded so every length word is 4-byte aligned.
pub const FRAME_ALIGN: usize = 4;

/// Size of the length word in front of every payload.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Top bit of a length word: the writer moved on to the next segment.
pub const END_OF_SEGMENT: u32 = 1 << 31;

/// Mask of the length bits in a frame word.
pub const LENGTH_MASK: u32 = !END_OF_SEGMENT;

/// Smallest segment that still holds a header, a tiny frame and the end marker.
pub const MIN_SEGMENT_CAPACITY: u32 = 256;

/// Largest segment; offsets and lengths must fit the 31 length bits.
pub const MAX_SEGMENT_CAPACITY: u32 = 1 << 30;

pub const DEFAULT_SEGMENT_CAPACITY: u32 = 64 * 1024 * 1024;

pub const DEFAULT_INDEX_SPACING: u32 = 64;

/// Maximum nesting of documents and sequences inside one record.
pub const MAX_NESTING_DEPTH: usize = 64;

/// How a log directory is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Create the directory if needed; appenders are allowed.
    ReadWrite,
    /// Never creates or modifies files; appenders are refused.
    ReadOnly,
}

/// Flushing performed after each append.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// Leave dirty pages to the OS.
    #[default]
    None,
    /// Schedule an asynchronous msync of the written range.
    Async,
    /// msync the written range before `append` returns.
    Sync,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Size in bytes of every segment file.
    pub segment_capacity: u32,
    /// One sparse index entry is kept every `index_spacing` records.
    pub index_spacing: u32,
    pub sync: SyncMode,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            index_spacing: DEFAULT_INDEX_SPACING,
            sync: SyncMode::None,
        }
    }
}

impl LogConfig {
    pub fn with_segment_capacity(mut self, capacity: u32) -> Self {
        self.segment_capacity = capacity;
        self
    }

    pub fn with_index_spacing(mut self, spacing: u32) -> Self {
        self.index_spacing = spacing;
        self
    }

    pub fn with_sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_capacity < MIN_SEGMENT_CAPACITY || self.segment_capacity > MAX_SEGMENT_CAPACITY {
            return Err(SpoolError::InvalidConfig(format!(
                "segment_capacity must be within {}..={} bytes, got {}",
                MIN_SEGMENT_CAPACITY, MAX_SEGMENT_CAPACITY, self.segment_capacity
            )));
        }
        if self.segment_capacity as usize % FRAME_ALIGN != 0 {
            return Err(SpoolError::InvalidConfig(format!(
                "segment_capacity must be a multiple of {}",
                FRAME_ALIGN
            )));
        }
        if self.index_spacing == 0 {
            return Err(SpoolError::InvalidConfig("index_spacing must be positive".into()));
        }
        Ok(())
    }

    /// Largest payload a single frame can carry in a segment of this size.
    pub fn max_payload(&self) -> usize {
        max_payload_for(self.segment_capacity)
    }
}

pub(crate) fn max_payload_for(capacity: u32) -> usize {
    // header, one frame word, and the word reserved for the end marker
    (capacity as usize).saturating_sub(SEGMENT_HEADER_SIZE + FRAME_HEADER_SIZE + FRAME_HEADER_SIZE)
}

/// Bytes a frame occupies, padding included.
pub(crate) fn frame_len(payload_len: usize) -> usize {
    (FRAME_HEADER_SIZE + payload_len + FRAME_ALIGN - 1) & !(FRAME_ALIGN - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len_pads_to_alignment() {
        assert_eq!(frame_len(0), 4);
        assert_eq!(frame_len(1), 8);
        assert_eq!(frame_len(4), 8);
        assert_eq!(frame_len(5), 12);
    }

    #[test]
    fn test_default_config_is_valid() {
        LogConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_tiny_segments() {
        let cfg = LogConfig::default().with_segment_capacity(64);
        assert!(matches!(cfg.validate(), Err(SpoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let cfg: LogConfig = serde_json::from_str(r#"{"segment_capacity": 4096}"#).unwrap();
        assert_eq!(cfg.segment_capacity, 4096);
        assert_eq!(cfg.index_spacing, DEFAULT_INDEX_SPACING);
        assert_eq!(cfg.sync, SyncMode::None);
    }
}
