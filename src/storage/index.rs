// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sequence index: record index -> (segment, offset).
//!
//! The index is sparse. Every segment contributes its first record plus one
//! entry every `spacing` records; `locate` returns the nearest entry at or
//! before the wanted index and how many frames to walk from there.
//!
//! The persisted `index.idx` file is only a hint. It holds fixed 28-byte
//! entries `[index: u64][ordinal: u64][offset: u32][crc64: u64]` and can be
//! rebuilt at any time by scanning the segments.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;

use crate::config::SEGMENT_HEADER_SIZE;
use crate::error::{Result, SpoolError};
use crate::types::{Position, SegmentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub index: u64,
    pub position: Position,
}

impl IndexEntry {
    pub const SIZE: usize = 8 + 8 + 4 + 8;

    fn checksum(body: &[u8]) -> u64 {
        let mut digest = Digest::new();
        digest.write(body);
        digest.sum64()
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u64(&mut buf[0..8], self.index);
        LittleEndian::write_u64(&mut buf[8..16], self.position.segment.0);
        LittleEndian::write_u32(&mut buf[16..20], self.position.offset);
        let crc = Self::checksum(&buf[0..20]);
        LittleEndian::write_u64(&mut buf[20..28], crc);
        buf
    }

    /// Reads one entry. `Ok(None)` on a clean or torn end of file.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Option<Self>> {
        let mut buf = [0u8; Self::SIZE];
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let expected = LittleEndian::read_u64(&buf[20..28]);
        let found = Self::checksum(&buf[0..20]);
        if expected != found {
            return Err(SpoolError::IndexChecksum { expected, found });
        }

        Ok(Some(Self {
            index: LittleEndian::read_u64(&buf[0..8]),
            position: Position::new(
                SegmentId(LittleEndian::read_u64(&buf[8..16])),
                LittleEndian::read_u32(&buf[16..20]),
            ),
        }))
    }
}

/// Reads every entry of an index file.
pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<IndexEntry>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    while let Some(entry) = IndexEntry::read_from(&mut reader)? {
        entries.push(entry);
    }
    Ok(entries)
}

/// Append-only writer for the index hint file.
pub struct IndexFile {
    path: PathBuf,
    file: BufWriter<File>,
}

impl IndexFile {
    /// Replaces the file at `path` with `entries` and keeps it open for appends.
    pub fn rewrite<'a>(path: impl AsRef<Path>, entries: impl IntoIterator<Item = &'a IndexEntry>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp = path.with_extension("idx.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for entry in entries {
                out.write_all(&entry.to_bytes())?;
            }
            out.flush()?;
            out.get_ref().sync_data()?;
        }
        fs::rename(&tmp, &path)?;

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, entry: &IndexEntry) -> Result<()> {
        self.file.write_all(&entry.to_bytes())?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.flush() {
            tracing::warn!("Failed to flush index file {:?}: {}", self.path, e);
        }
    }
}

#[derive(Debug, Clone)]
struct SegmentEntry {
    id: SegmentId,
    first_index: u64,
    /// (record index, frame offset), ascending; always starts at `first_index`.
    sparse: Vec<(u64, u32)>,
}

/// In-memory sparse index over the retained segments.
#[derive(Debug, Clone)]
pub struct SequenceIndex {
    spacing: u32,
    segments: Vec<SegmentEntry>,
    tail: u64,
    tail_position: Option<Position>,
    pending: Vec<IndexEntry>,
}

impl SequenceIndex {
    pub fn new(spacing: u32) -> Self {
        Self {
            spacing: spacing.max(1),
            segments: Vec::new(),
            tail: 0,
            tail_position: None,
            pending: Vec::new(),
        }
    }

    /// Next index to be assigned; equals the number of records ever appended.
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Where the frame for [`SequenceIndex::tail`] goes (or where scanning resumes).
    pub fn tail_position(&self) -> Option<Position> {
        self.tail_position
    }

    /// First index still retained.
    pub fn first_index(&self) -> u64 {
        self.segments.first().map_or(self.tail, |s| s.first_index)
    }

    pub fn first_segment(&self) -> Option<SegmentId> {
        self.segments.first().map(|s| s.id)
    }

    pub fn last_segment(&self) -> Option<SegmentId> {
        self.segments.last().map(|s| s.id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Registers a new segment whose first record is `first_index`.
    ///
    /// Ordinals must follow the last one and `first_index` may not go back.
    pub fn begin_segment(&mut self, id: SegmentId, first_index: u64) -> Result<()> {
        if let Some(last) = self.segments.last() {
            if id != last.id.next() {
                return Err(SpoolError::bad_segment(id, format!("expected segment {}", last.id.next())));
            }
        }
        if !self.segments.is_empty() && first_index < self.tail {
            return Err(SpoolError::bad_segment(
                id,
                format!("first index {} precedes tail {}", first_index, self.tail),
            ));
        }
        let start = SEGMENT_HEADER_SIZE as u32;
        self.segments.push(SegmentEntry {
            id,
            first_index,
            sparse: vec![(first_index, start)],
        });
        self.tail = first_index;
        self.tail_position = Some(Position::new(id, start));
        self.pending.push(IndexEntry {
            index: first_index,
            position: Position::new(id, start),
        });
        Ok(())
    }

    /// Records that frame `index` was written at `position` taking
    /// `bytes_written` bytes. Returns the next index.
    pub fn advance(&mut self, index: u64, position: Position, bytes_written: u32) -> u64 {
        debug_assert_eq!(index, self.tail);
        debug_assert_eq!(Some(position), self.tail_position);
        if let Some(seg) = self.segments.last_mut() {
            let rel = index - seg.first_index;
            let known = seg.sparse.last().map_or(false, |&(i, _)| i >= index);
            if !known && rel % u64::from(self.spacing) == 0 {
                seg.sparse.push((index, position.offset));
                self.pending.push(IndexEntry { index, position });
            }
        }
        self.tail = index + 1;
        self.tail_position = Some(Position::new(position.segment, position.offset + bytes_written));
        self.tail
    }

    /// Moves the scan point without recording frames, e.g. to the end marker.
    pub(crate) fn set_tail_position(&mut self, position: Position) {
        self.tail_position = Some(position);
    }

    /// Adds a persisted entry if it agrees with what is already known.
    pub fn insert_hint(&mut self, entry: IndexEntry) -> bool {
        let Some(seg) = self.segments.iter_mut().find(|s| s.id == entry.position.segment) else {
            return false;
        };
        let last = seg.sparse.last().copied().unwrap_or((seg.first_index, SEGMENT_HEADER_SIZE as u32));
        if entry.index <= last.0 || entry.position.offset <= last.1 {
            return false;
        }
        seg.sparse.push((entry.index, entry.position.offset));
        true
    }

    /// Resumes scanning from the last known entry of the last segment.
    pub(crate) fn resume_from_last_hint(&mut self) {
        if let Some(seg) = self.segments.last() {
            if let Some(&(index, offset)) = seg.sparse.last() {
                self.tail = index;
                self.tail_position = Some(Position::new(seg.id, offset));
            }
        }
    }

    /// Nearest known frame at or before `index`: its position and the number
    /// of frames to walk from there.
    pub fn locate(&self, index: u64) -> Result<(Position, u64)> {
        if index >= self.tail {
            return Err(SpoolError::IndexOutOfRange { index, tail: self.tail });
        }
        let first = match self.segments.first() {
            Some(s) => s,
            None => return Err(SpoolError::IndexOutOfRange { index, tail: self.tail }),
        };
        if index < first.first_index {
            return Err(SpoolError::SegmentGone(SegmentId(first.id.0.saturating_sub(1))));
        }
        let seg_pos = self.segments.partition_point(|s| s.first_index <= index) - 1;
        let seg = &self.segments[seg_pos];
        let hint_pos = seg.sparse.partition_point(|&(i, _)| i <= index) - 1;
        let (hint_index, offset) = seg.sparse[hint_pos];
        Ok((Position::new(seg.id, offset), index - hint_index))
    }

    /// First record index of segment `id`, if retained.
    pub fn segment_first_index(&self, id: SegmentId) -> Option<u64> {
        self.segments.iter().find(|s| s.id == id).map(|s| s.first_index)
    }

    /// Forgets segments below `id`.
    pub fn drop_segments_before(&mut self, id: SegmentId) {
        self.segments.retain(|s| s.id >= id);
    }

    /// All entries, for rewriting the hint file.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.segments
            .iter()
            .flat_map(|s| {
                s.sparse.iter().map(move |&(index, offset)| IndexEntry {
                    index,
                    position: Position::new(s.id, offset),
                })
            })
            .collect()
    }

    /// Entries recorded since the last call.
    pub fn take_pending(&mut self) -> Vec<IndexEntry> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const START: u32 = SEGMENT_HEADER_SIZE as u32;

    fn fill(index: &mut SequenceIndex, count: u64, frame: u32) {
        for _ in 0..count {
            let pos = index.tail_position().unwrap();
            let i = index.tail();
            index.advance(i, pos, frame);
        }
    }

    #[test]
    fn test_locate_uses_sparse_entries() {
        let mut index = SequenceIndex::new(4);
        index.begin_segment(SegmentId(0), 0).unwrap();
        fill(&mut index, 10, 8);

        assert_eq!(index.tail(), 10);
        assert_eq!(index.locate(0).unwrap(), (Position::new(SegmentId(0), START), 0));
        assert_eq!(index.locate(5).unwrap(), (Position::new(SegmentId(0), START + 32), 1));
        assert_eq!(index.locate(9).unwrap(), (Position::new(SegmentId(0), START + 64), 1));
        assert!(matches!(index.locate(10), Err(SpoolError::IndexOutOfRange { index: 10, tail: 10 })));
    }

    #[test]
    fn test_locate_across_segments() {
        let mut index = SequenceIndex::new(64);
        index.begin_segment(SegmentId(0), 0).unwrap();
        fill(&mut index, 3, 16);
        index.begin_segment(SegmentId(1), 3).unwrap();
        fill(&mut index, 2, 16);

        assert_eq!(index.locate(2).unwrap(), (Position::new(SegmentId(0), START), 2));
        assert_eq!(index.locate(3).unwrap(), (Position::new(SegmentId(1), START), 0));
        assert_eq!(index.locate(4).unwrap(), (Position::new(SegmentId(1), START), 1));
    }

    #[test]
    fn test_begin_segment_rejects_gaps() {
        let mut index = SequenceIndex::new(8);
        index.begin_segment(SegmentId(0), 0).unwrap();
        fill(&mut index, 2, 8);
        assert!(index.begin_segment(SegmentId(2), 2).is_err());
        assert!(index.begin_segment(SegmentId(1), 1).is_err());
        index.begin_segment(SegmentId(1), 2).unwrap();
    }

    #[test]
    fn test_pruned_index_reports_segment_gone() {
        let mut index = SequenceIndex::new(8);
        index.begin_segment(SegmentId(0), 0).unwrap();
        fill(&mut index, 2, 8);
        index.begin_segment(SegmentId(1), 2).unwrap();
        fill(&mut index, 2, 8);
        index.drop_segments_before(SegmentId(1));

        assert_eq!(index.first_index(), 2);
        assert!(matches!(index.locate(1), Err(SpoolError::SegmentGone(SegmentId(0)))));
        assert!(index.locate(2).is_ok());
    }

    #[test]
    fn test_pending_entries_follow_spacing() {
        let mut index = SequenceIndex::new(2);
        index.begin_segment(SegmentId(0), 0).unwrap();
        fill(&mut index, 5, 8);
        let pending: Vec<u64> = index.take_pending().iter().map(|e| e.index).collect();
        assert_eq!(pending, vec![0, 2, 4]);
        assert!(index.take_pending().is_empty());
    }

    #[test]
    fn test_index_file_roundtrip_and_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.idx");
        let entries = vec![
            IndexEntry { index: 0, position: Position::new(SegmentId(0), START) },
            IndexEntry { index: 64, position: Position::new(SegmentId(0), 4096) },
        ];
        {
            let mut file = IndexFile::rewrite(&path, &entries[..1]).unwrap();
            file.append(&entries[1]).unwrap();
        }
        assert_eq!(read_all(&path).unwrap(), entries);

        // a torn final entry is ignored
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        fs::write(&path, &bytes).unwrap();
        assert_eq!(read_all(&path).unwrap(), entries);

        // a flipped bit is not
        bytes[3] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(read_all(&path), Err(SpoolError::IndexChecksum { .. })));
    }

    #[test]
    fn test_insert_hint_rejects_disagreeing_entries() {
        let mut index = SequenceIndex::new(4);
        index.begin_segment(SegmentId(0), 0).unwrap();
        assert!(index.insert_hint(IndexEntry { index: 4, position: Position::new(SegmentId(0), START + 40) }));
        assert!(!index.insert_hint(IndexEntry { index: 3, position: Position::new(SegmentId(0), START + 30) }));
        assert!(!index.insert_hint(IndexEntry { index: 8, position: Position::new(SegmentId(5), START) }));
        index.resume_from_last_hint();
        assert_eq!(index.tail(), 4);
        assert_eq!(index.tail_position(), Some(Position::new(SegmentId(0), START + 40)));
    }
}
