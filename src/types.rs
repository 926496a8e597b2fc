// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Identity and position types.

use std::fmt;

/// Ordinal of a segment within its log. Ordinals are dense and start at zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn next(&self) -> Self {
        SegmentId(self.0 + 1)
    }

    /// File name of the segment inside the log directory.
    pub fn file_name(&self) -> String {
        format!("{:020}.{}", self.0, crate::config::SEGMENT_EXTENSION)
    }

    /// Parses a file name produced by [`SegmentId::file_name`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(crate::config::SEGMENT_EXTENSION)?.strip_suffix('.')?;
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        stem.parse().ok().map(SegmentId)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Byte location of a frame: segment plus offset of its length word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub segment: SegmentId,
    pub offset: u32,
}

impl Position {
    pub fn new(segment: SegmentId, offset: u32) -> Self {
        Self { segment, offset }
    }
}
