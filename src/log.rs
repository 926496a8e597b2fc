// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The log handle: one directory of segments plus its sequence index.
//!
//! `Log` is a cheap clonable handle. Appenders and tailers created from it
//! share the segment store and the index; the published tail is an atomic
//! so a reader never needs the index lock to learn how far the log goes.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::appender::Appender;
use crate::config::{frame_len, LogConfig, OpenMode, INDEX_FILE_NAME};
use crate::error::{Result, SpoolError};
use crate::storage::index::{self, SequenceIndex};
use crate::storage::{Segment, SegmentStore, Slot};
use crate::tailer::Tailer;
use crate::types::{Position, SegmentId};

/// Opens (or in read-write mode, creates) the log stored in `path` with the
/// default configuration.
pub fn open_log(path: impl AsRef<Path>, mode: OpenMode) -> Result<Log> {
    Log::open(path, mode, LogConfig::default())
}

/// Summary of one segment, as shown by tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub id: SegmentId,
    pub first_index: u64,
    pub capacity: u32,
    pub used: u64,
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct Log {
    pub(crate) inner: Arc<LogInner>,
}

pub(crate) struct LogInner {
    pub(crate) config: LogConfig,
    pub(crate) store: SegmentStore,
    index: RwLock<SequenceIndex>,
    tail: AtomicU64,
    pub(crate) appender_active: AtomicBool,
}

impl Log {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, config: LogConfig) -> Result<Self> {
        config.validate()?;
        let store = SegmentStore::open(path.as_ref(), mode, config.segment_capacity)?;
        if mode == OpenMode::ReadWrite && store.highest().is_none() {
            // an empty log still gets segment 0 so polling it stays cheap
            store.allocate_or_get_writable_segment(0)?;
        }

        let index = load_index(&store, config.index_spacing)?;
        let tail = index.tail();
        tracing::info!(
            "Opened log {:?} ({:?}): {} records in {} segments",
            store.dir(),
            mode,
            tail,
            index.segment_count()
        );

        Ok(Self {
            inner: Arc::new(LogInner {
                config,
                store,
                index: RwLock::new(index),
                tail: AtomicU64::new(tail),
                appender_active: AtomicBool::new(false),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        self.inner.store.dir()
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.store.mode()
    }

    pub fn config(&self) -> &LogConfig {
        &self.inner.config
    }

    /// The single appender of this handle.
    pub fn create_appender(&self) -> Result<Appender> {
        Appender::new(self.clone())
    }

    /// A tailer positioned at the first retained record.
    pub fn create_tailer(&self) -> Tailer {
        Tailer::new(self.clone())
    }

    /// Number of records ever appended, including records written by other
    /// handles on the same directory.
    pub fn len(&self) -> Result<u64> {
        self.inner.catch_up()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Tail as last published in this process, without scanning.
    pub fn published_tail(&self) -> u64 {
        self.inner.tail.load(Ordering::Acquire)
    }

    /// Index of the oldest retained record.
    pub fn first_index(&self) -> Result<u64> {
        self.inner.catch_up()?;
        Ok(self.inner.read_index().first_index())
    }

    /// Ordinals of the retained segments, ascending.
    pub fn segment_ordinals(&self) -> Result<Vec<SegmentId>> {
        self.inner.store.ordinals()
    }

    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        let mut infos = Vec::new();
        for id in self.segment_ordinals()? {
            let Some(segment) = self.inner.store.map(id)? else {
                continue;
            };
            infos.push(SegmentInfo {
                id,
                first_index: segment.first_index(),
                capacity: segment.capacity(),
                used: self.inner.store.capacity_used(&segment),
                path: segment.path().to_path_buf(),
            });
        }
        Ok(infos)
    }

    /// Deletes every segment below `id`. Retention policy is up to the caller.
    pub fn prune_segments_before(&self, id: SegmentId) -> Result<usize> {
        let mut index = self.inner.write_index();
        let removed = self.inner.store.prune_before(id)?;
        index.drop_segments_before(id);
        Ok(removed)
    }

    /// Where record `index` is stored.
    pub fn resolve(&self, index: u64) -> Result<Position> {
        let (segment, offset) = self.inner.resolve(index)?;
        Ok(Position::new(segment.id(), offset))
    }

    /// Renders every retained record as text, one `--- !index N` block each.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::new();
        let mut tailer = self.create_tailer();
        while let Some((index, payload)) = tailer.read_indexed()? {
            let _ = writeln!(out, "--- !index {}", index);
            let _ = writeln!(out, "{}", payload);
        }
        Ok(out)
    }
}

impl LogInner {
    pub(crate) fn read_index(&self) -> RwLockReadGuard<'_, SequenceIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write_index(&self) -> RwLockWriteGuard<'_, SequenceIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn publish(&self, tail: u64) {
        self.tail.fetch_max(tail, Ordering::AcqRel);
    }

    pub(crate) fn index_path(&self) -> PathBuf {
        self.store.dir().join(INDEX_FILE_NAME)
    }

    /// Scans frames written since the index was last updated.
    pub(crate) fn catch_up(&self) -> Result<u64> {
        let mut index = self.write_index();
        scan_forward(&self.store, &mut index)?;
        let tail = index.tail();
        self.publish(tail);
        Ok(tail)
    }

    /// Segment and frame offset of record `index`, which must be below the tail.
    pub(crate) fn resolve(&self, index: u64) -> Result<(Arc<Segment>, u32)> {
        if index >= self.tail.load(Ordering::Acquire) {
            self.catch_up()?;
        }
        let (position, skip) = self.read_index().locate(index)?;
        let segment = self
            .store
            .map(position.segment)?
            .ok_or(SpoolError::SegmentGone(position.segment))?;

        let mut offset = position.offset;
        for step in 0..skip {
            match segment.slot(offset) {
                Ok(Slot::Frame { len }) => offset += frame_len(len as usize) as u32,
                Ok(other) => {
                    return Err(SpoolError::malformed(
                        index - skip + step,
                        format!("expected a frame at offset {}, found {:?}", offset, other),
                    ))
                }
                Err(reason) => return Err(SpoolError::malformed(index - skip + step, reason)),
            }
        }
        Ok((segment, offset))
    }

    /// Where a cursor for `index` starts: a stored frame, or the tail
    /// position when `index` is the tail. `Ok(None)` while the log has no
    /// segment at all.
    pub(crate) fn seek(&self, index: u64) -> Result<Option<(Arc<Segment>, u32)>> {
        let tail = self.catch_up()?;
        if index > tail {
            return Err(SpoolError::IndexOutOfRange { index, tail });
        }
        if index < tail {
            return self.resolve(index).map(Some);
        }
        let Some(position) = self.read_index().tail_position() else {
            return Ok(None);
        };
        Ok(self.store.map(position.segment)?.map(|segment| (segment, position.offset)))
    }

    /// The segment following `segment` for a cursor about to read `index`
    /// at `offset`.
    ///
    /// `sealed` says whether an end marker was seen. Without one, the next
    /// segment only counts if it exists already: the writer crashed between
    /// allocating it and marking the end. An empty slot read before the
    /// writer appended more and rolled is stale, so the cursor is told to
    /// read the slot again.
    pub(crate) fn next_segment(&self, segment: &Segment, offset: u32, index: u64, sealed: bool) -> Result<NextSegment> {
        if !sealed && self.store.highest().map_or(true, |h| h <= segment.id()) {
            return Ok(NextSegment::NotYet);
        }
        let Some(next) = self.store.map(segment.id().next())? else {
            return Ok(NextSegment::NotYet);
        };
        if next.first_index() == index {
            return Ok(NextSegment::Follow(next));
        }
        if !sealed && slot_filled(segment, offset) {
            return Ok(NextSegment::Reread);
        }
        Err(broken_chain(&next, index))
    }
}

/// Outcome of looking past the end of a segment.
pub(crate) enum NextSegment {
    Follow(Arc<Segment>),
    /// The slot that looked empty has been written since.
    Reread,
    NotYet,
}

fn slot_filled(segment: &Segment, offset: u32) -> bool {
    !matches!(segment.slot(offset), Ok(Slot::Empty))
}

fn broken_chain(next: &Segment, index: u64) -> SpoolError {
    SpoolError::bad_segment(
        next.id(),
        format!("first index {} does not follow index {}", next.first_index(), index),
    )
}

impl Drop for LogInner {
    fn drop(&mut self) {
        tracing::debug!("Closing log {:?}", self.store.dir());
    }
}

/// Walks frames from the index's tail position to the end of the log,
/// following end markers into later segments.
fn scan_forward(store: &SegmentStore, index: &mut SequenceIndex) -> Result<()> {
    let mut position = match index.tail_position() {
        Some(position) => position,
        None => match store.map(store.floor())? {
            Some(first) => {
                index.begin_segment(first.id(), first.first_index())?;
                Position::new(first.id(), first.data_start())
            }
            None => return Ok(()),
        },
    };

    loop {
        let Some(segment) = store.map(position.segment)? else {
            return Ok(());
        };
        let mut offset = position.offset;
        let sealed = loop {
            match segment.slot(offset) {
                Ok(Slot::Frame { len }) => {
                    let next = index.tail();
                    let written = frame_len(len as usize) as u32;
                    index.advance(next, Position::new(segment.id(), offset), written);
                    offset += written;
                }
                Ok(Slot::EndOfSegment) => break true,
                Ok(Slot::Empty) => break false,
                Err(reason) => return Err(SpoolError::malformed(index.tail(), reason)),
            }
        };
        index.set_tail_position(Position::new(segment.id(), offset));

        let next = if sealed || store.highest().map_or(false, |h| h > segment.id()) {
            store.map(segment.id().next())?
        } else {
            None
        };
        let Some(next) = next else {
            return Ok(());
        };
        if next.first_index() != index.tail() {
            if !sealed && slot_filled(&segment, offset) {
                // another process appended and rolled after the empty slot was read
                position = Position::new(segment.id(), offset);
                continue;
            }
            return Err(broken_chain(&next, index.tail()));
        }
        index.begin_segment(next.id(), next.first_index())?;
        position = Position::new(next.id(), next.data_start());
    }
}

/// Builds the in-memory index from the hint file, falling back to a full
/// scan when the file is missing or disagrees with the segments.
fn load_index(store: &SegmentStore, spacing: u32) -> Result<SequenceIndex> {
    let path = store.dir().join(INDEX_FILE_NAME);
    match load_hinted(store, &path, spacing) {
        Ok(Some(index)) => return Ok(index),
        Ok(None) => {}
        Err(SpoolError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("No index file in {:?}, scanning segments", store.dir());
        }
        Err(e) => tracing::warn!("Rebuilding index of {:?}: {}", store.dir(), e),
    }
    rebuild_index(store, spacing)
}

fn load_hinted(store: &SegmentStore, path: &Path, spacing: u32) -> Result<Option<SequenceIndex>> {
    let entries = index::read_all(path)?;
    let ordinals = store.ordinals()?;
    if ordinals.is_empty() {
        return Ok(None);
    }

    let mut index = SequenceIndex::new(spacing);
    for &id in &ordinals {
        let header = store.read_header(id)?;
        index.begin_segment(id, header.first_index)?;
    }
    let floor = ordinals[0];
    for entry in entries.into_iter().filter(|e| e.position.segment >= floor) {
        let first = index.segment_first_index(entry.position.segment);
        if entry.index == first.unwrap_or(u64::MAX) {
            continue;
        }
        if !index.insert_hint(entry) {
            tracing::warn!("Index entry {} disagrees with the segments", entry.index);
            return Ok(None);
        }
    }
    index.resume_from_last_hint();
    index.clear_pending();

    match scan_forward(store, &mut index) {
        Ok(()) => Ok(Some(index)),
        Err(e @ SpoolError::MalformedRecord { .. }) => {
            tracing::warn!("Index hints lead to a bad frame: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Linear scan of every retained segment.
fn rebuild_index(store: &SegmentStore, spacing: u32) -> Result<SequenceIndex> {
    let mut index = SequenceIndex::new(spacing);
    scan_forward(store, &mut index)?;
    index.clear_pending();
    tracing::info!("Rebuilt index of {:?}: {} records", store.dir(), index.tail());
    Ok(index)
}
