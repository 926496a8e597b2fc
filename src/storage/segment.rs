// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Memory-mapped segment file.
//!
//! # File Format
//! ```text
//! [Header: 32 bytes][Frame][Frame]...[End marker][zeroes]
//! ```
//!
//! Header:
//! - magic: [u8; 4] (`SPL\x01`)
//! - version: u32 (1)
//! - ordinal: u64
//! - first_index: u64 (index of the first record stored here)
//! - capacity: u32 (file length)
//! - reserved: u32 (0)
//!
//! Frame: `[len: u32][payload][pad to 4]`. A zero length word means nothing
//! has been published there yet. A word with [`END_OF_SEGMENT`] set means the
//! writer continued in the next segment.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::{MmapOptions, MmapRaw};

use crate::config::{
    frame_len, FORMAT_VERSION, FRAME_ALIGN, FRAME_HEADER_SIZE, END_OF_SEGMENT, LENGTH_MASK,
    SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
};
use crate::error::{Result, SpoolError};
use crate::types::SegmentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub id: SegmentId,
    pub first_index: u64,
    pub capacity: u32,
}

impl SegmentHeader {
    pub const SIZE: usize = SEGMENT_HEADER_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], FORMAT_VERSION);
        LittleEndian::write_u64(&mut buf[8..16], self.id.0);
        LittleEndian::write_u64(&mut buf[16..24], self.first_index);
        LittleEndian::write_u32(&mut buf[24..28], self.capacity);
        buf
    }

    /// Parses and validates a header read from the file of segment `expected`.
    pub fn parse(expected: SegmentId, buf: &[u8; Self::SIZE]) -> Result<Self> {
        if buf[0..4] != SEGMENT_MAGIC {
            return Err(SpoolError::bad_segment(expected, "invalid magic bytes"));
        }
        let version = LittleEndian::read_u32(&buf[4..8]);
        if version != FORMAT_VERSION {
            return Err(SpoolError::bad_segment(
                expected,
                format!("unsupported format version {}", version),
            ));
        }
        let id = SegmentId(LittleEndian::read_u64(&buf[8..16]));
        if id != expected {
            return Err(SpoolError::bad_segment(
                expected,
                format!("header claims ordinal {}", id.0),
            ));
        }
        Ok(Self {
            id,
            first_index: LittleEndian::read_u64(&buf[16..24]),
            capacity: LittleEndian::read_u32(&buf[24..28]),
        })
    }

    pub fn read_from<R: Read>(expected: SegmentId, mut reader: R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => SpoolError::bad_segment(expected, "truncated header"),
            _ => SpoolError::Io(e),
        })?;
        Self::parse(expected, &buf)
    }
}

/// What sits at a frame offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Nothing published yet.
    Empty,
    /// The writer rolled over to the next segment.
    EndOfSegment,
    Frame { len: u32 },
}

/// One fixed-capacity, memory-mapped segment file.
pub struct Segment {
    header: SegmentHeader,
    path: PathBuf,
    map: MmapRaw,
    writable: bool,
}

impl Segment {
    pub fn path_for(dir: &Path, id: SegmentId) -> PathBuf {
        dir.join(id.file_name())
    }

    /// Creates the file of a new segment at full capacity and maps it.
    ///
    /// The file is prepared under a temporary name and renamed into place,
    /// so readers never observe a half-written header.
    pub fn create(dir: &Path, id: SegmentId, first_index: u64, capacity: u32) -> Result<Self> {
        let path = Self::path_for(dir, id);
        let tmp = path.with_extension("tmp");
        let exhausted = |source: io::Error| SpoolError::StorageExhausted { segment: id, source };

        let header = SegmentHeader {
            id,
            first_index,
            capacity,
        };

        {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)
                .map_err(exhausted)?;
            file.set_len(u64::from(capacity)).map_err(exhausted)?;
            file.write_all(&header.to_bytes()).map_err(exhausted)?;
            file.sync_all().map_err(exhausted)?;
        }
        if path.exists() {
            let _ = fs::remove_file(&tmp);
            return Err(SpoolError::bad_segment(id, "segment file already exists"));
        }
        fs::rename(&tmp, &path).map_err(exhausted)?;

        tracing::debug!("Created segment {} at {:?} ({} bytes)", id, path, capacity);
        Self::open(dir, id, true)
    }

    /// Maps an existing segment file.
    pub fn open(dir: &Path, id: SegmentId, writable: bool) -> Result<Self> {
        let path = Self::path_for(dir, id);
        let mut file = OpenOptions::new().read(true).write(writable).open(&path)?;
        let header = SegmentHeader::read_from(id, &mut file)?;

        let len = file.metadata()?.len();
        if len != u64::from(header.capacity) || (header.capacity as usize) < SEGMENT_HEADER_SIZE + 2 * FRAME_HEADER_SIZE {
            return Err(SpoolError::bad_segment(
                id,
                format!("file is {} bytes, header says {}", len, header.capacity),
            ));
        }

        let map = Self::map_file(&file, writable)?;
        tracing::debug!("Mapped segment {} (writable: {})", id, writable);
        Ok(Self {
            header,
            path,
            map,
            writable,
        })
    }

    fn map_file(file: &File, writable: bool) -> Result<MmapRaw> {
        let opts = MmapOptions::new();
        let map = if writable {
            opts.map_raw(file)?
        } else {
            opts.map_raw_read_only(file)?
        };
        Ok(map)
    }

    pub fn id(&self) -> SegmentId {
        self.header.id
    }

    pub fn first_index(&self) -> u64 {
        self.header.first_index
    }

    pub fn capacity(&self) -> u32 {
        self.header.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Offset of the first frame.
    pub fn data_start(&self) -> u32 {
        SEGMENT_HEADER_SIZE as u32
    }

    fn word(&self, offset: u32) -> &AtomicU32 {
        let offset = offset as usize;
        assert!(offset % FRAME_ALIGN == 0 && offset + FRAME_HEADER_SIZE <= self.map.len());
        // SAFETY: in bounds and 4-byte aligned (the map itself is page aligned),
        // and the mapping lives as long as `self`.
        unsafe { &*(self.map.as_ptr().add(offset) as *const AtomicU32) }
    }

    /// Inspects the frame word at `offset`. The `Acquire` load pairs with the
    /// writer's `Release` publish, so a reported frame is fully written.
    pub fn slot(&self, offset: u32) -> std::result::Result<Slot, String> {
        if offset as usize % FRAME_ALIGN != 0 || offset as usize + FRAME_HEADER_SIZE > self.capacity() as usize {
            return Err(format!("frame offset {} outside segment", offset));
        }
        let word = self.word(offset).load(Ordering::Acquire);
        if word == 0 {
            return Ok(Slot::Empty);
        }
        if word & END_OF_SEGMENT != 0 {
            return Ok(Slot::EndOfSegment);
        }
        let len = word & LENGTH_MASK;
        if !self.fits(offset, len as usize) {
            return Err(format!("frame length {} at offset {} overruns segment", len, offset));
        }
        Ok(Slot::Frame { len })
    }

    /// Borrows a published payload.
    pub fn payload(&self, offset: u32, len: u32) -> &[u8] {
        let start = offset as usize + FRAME_HEADER_SIZE;
        assert!(start + len as usize <= self.map.len());
        // SAFETY: in bounds; published frames are never written again.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr().add(start), len as usize) }
    }

    /// Whether a payload of `payload_len` bytes fits at `offset` while leaving
    /// room for the end marker.
    pub fn fits(&self, offset: u32, payload_len: usize) -> bool {
        offset as usize + frame_len(payload_len) + FRAME_HEADER_SIZE <= self.capacity() as usize
    }

    /// Writes and publishes one frame. Returns the offset of the next frame.
    ///
    /// The caller must be the only writer and must have checked [`Segment::fits`].
    pub(crate) fn write_frame(&self, offset: u32, payload: &[u8]) -> u32 {
        debug_assert!(self.writable);
        assert!(self.fits(offset, payload.len()));
        let next = offset + frame_len(payload.len()) as u32;

        // SAFETY: the range is in bounds and not yet published, so no reader
        // looks at it; only the single writer touches unpublished bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.map.as_mut_ptr().add(offset as usize + FRAME_HEADER_SIZE),
                payload.len(),
            );
        }
        // clear whatever a crashed writer may have left behind the new frame
        self.word(next).store(0, Ordering::Relaxed);
        self.word(offset).store(payload.len() as u32, Ordering::Release);
        next
    }

    /// Publishes the end marker at `offset`.
    pub(crate) fn mark_end(&self, offset: u32) {
        debug_assert!(self.writable);
        self.word(offset).store(END_OF_SEGMENT, Ordering::Release);
    }

    pub fn flush_range(&self, offset: u32, len: usize) -> Result<()> {
        self.map.flush_range(offset as usize, len)?;
        Ok(())
    }

    pub fn flush_async_range(&self, offset: u32, len: usize) -> Result<()> {
        self.map.flush_async_range(offset as usize, len)?;
        Ok(())
    }

    /// Walks published frames starting at `offset`.
    pub fn frames(&self, offset: u32) -> Frames<'_> {
        Frames {
            segment: self,
            offset,
            done: false,
        }
    }

    /// Bytes occupied by header and published frames.
    pub fn capacity_used(&self) -> u64 {
        let mut end = self.data_start();
        for frame in self.frames(self.data_start()) {
            match frame {
                FrameEntry::Frame { offset, len } => end = offset + frame_len(len as usize) as u32,
                FrameEntry::End { offset } => end = offset + FRAME_HEADER_SIZE as u32,
                FrameEntry::Corrupt { offset, .. } => end = offset,
            }
        }
        u64::from(end)
    }
}

/// Item produced by [`Frames`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEntry {
    Frame { offset: u32, len: u32 },
    /// End marker found; nothing follows in this segment.
    End { offset: u32 },
    /// Unreadable frame word; iteration stops.
    Corrupt { offset: u32, reason: String },
}

pub struct Frames<'a> {
    segment: &'a Segment,
    offset: u32,
    done: bool,
}

impl<'a> Frames<'a> {
    /// Offset where iteration stopped or will continue.
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = FrameEntry;

    fn next(&mut self) -> Option<FrameEntry> {
        if self.done {
            return None;
        }
        match self.segment.slot(self.offset) {
            Ok(Slot::Empty) => {
                self.done = true;
                None
            }
            Ok(Slot::EndOfSegment) => {
                self.done = true;
                Some(FrameEntry::End { offset: self.offset })
            }
            Ok(Slot::Frame { len }) => {
                let offset = self.offset;
                self.offset += frame_len(len as usize) as u32;
                Some(FrameEntry::Frame { offset, len })
            }
            Err(reason) => {
                self.done = true;
                Some(FrameEntry::Corrupt {
                    offset: self.offset,
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_serialization() {
        let header = SegmentHeader {
            id: SegmentId(3),
            first_index: 1000,
            capacity: 4096,
        };
        let bytes = header.to_bytes();
        assert_eq!(SegmentHeader::parse(SegmentId(3), &bytes).unwrap(), header);
        assert!(matches!(
            SegmentHeader::parse(SegmentId(4), &bytes),
            Err(SpoolError::MalformedSegment { .. })
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = SegmentHeader {
            id: SegmentId(0),
            first_index: 0,
            capacity: 4096,
        }
        .to_bytes();
        bytes[0..4].copy_from_slice(b"BADM");
        assert!(matches!(
            SegmentHeader::parse(SegmentId(0), &bytes),
            Err(SpoolError::MalformedSegment { .. })
        ));
    }

    #[test]
    fn test_write_and_scan_frames() {
        let dir = tempdir().unwrap();
        let seg = Segment::create(dir.path(), SegmentId(0), 0, 4096).unwrap();

        let start = seg.data_start();
        assert_eq!(seg.slot(start).unwrap(), Slot::Empty);

        let second = seg.write_frame(start, b"hello");
        assert_eq!(second, start + 12);
        let third = seg.write_frame(second, b"");
        seg.mark_end(third);

        let frames: Vec<_> = seg.frames(start).collect();
        assert_eq!(
            frames,
            vec![
                FrameEntry::Frame { offset: start, len: 5 },
                FrameEntry::Frame { offset: second, len: 0 },
                FrameEntry::End { offset: third },
            ]
        );
        assert_eq!(seg.payload(start, 5), b"hello");
        assert_eq!(seg.capacity_used(), u64::from(third) + 4);
    }

    #[test]
    fn test_reopen_read_only_sees_frames() {
        let dir = tempdir().unwrap();
        {
            let seg = Segment::create(dir.path(), SegmentId(7), 70, 1024).unwrap();
            seg.write_frame(seg.data_start(), b"abc");
        }
        let seg = Segment::open(dir.path(), SegmentId(7), false).unwrap();
        assert_eq!(seg.first_index(), 70);
        assert_eq!(seg.capacity(), 1024);
        assert_eq!(seg.slot(seg.data_start()).unwrap(), Slot::Frame { len: 3 });
        assert_eq!(seg.payload(seg.data_start(), 3), b"abc");
    }

    #[test]
    fn test_fits_reserves_end_marker() {
        let dir = tempdir().unwrap();
        let seg = Segment::create(dir.path(), SegmentId(0), 0, 256).unwrap();
        let max = crate::config::max_payload_for(256);
        assert!(seg.fits(seg.data_start(), max));
        assert!(!seg.fits(seg.data_start(), max + 1));
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        Segment::create(dir.path(), SegmentId(0), 0, 1024).unwrap();
        assert!(Segment::create(dir.path(), SegmentId(0), 0, 1024).is_err());
    }
}
