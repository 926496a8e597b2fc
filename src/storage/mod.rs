// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! On-disk storage: segment files, the store that owns them, and the
//! sequence index over their frames.

pub mod index;
pub mod segment;
pub mod store;

pub use index::{IndexEntry, IndexFile, SequenceIndex};
pub use segment::{FrameEntry, Segment, SegmentHeader, Slot};
pub use store::{list_ordinals, SegmentStore};
