// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Segment store: owns every mapped segment of one log directory.
//!
//! # Invariants
//! - Ordinals on disk are contiguous; the next segment is always `highest + 1`
//! - At most one segment is mapped writable, and it is the highest one
//! - A pruned ordinal is never handed out again (`SegmentGone`)

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{OpenMode, FRAME_HEADER_SIZE, SEGMENT_HEADER_SIZE};
use crate::error::{Result, SpoolError};
use crate::storage::segment::{FrameEntry, Segment, SegmentHeader};
use crate::types::SegmentId;

#[derive(Default)]
struct StoreState {
    mapped: BTreeMap<SegmentId, Arc<Segment>>,
    /// Lowest ordinal still retained.
    floor: SegmentId,
    /// Highest ordinal known to exist on disk.
    highest: Option<SegmentId>,
    writable: Option<SegmentId>,
}

pub struct SegmentStore {
    dir: PathBuf,
    mode: OpenMode,
    capacity: u32,
    state: RwLock<StoreState>,
}

impl SegmentStore {
    /// Opens the store over `dir`, creating the directory in read-write mode.
    pub fn open(dir: impl AsRef<Path>, mode: OpenMode, capacity: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if mode == OpenMode::ReadWrite {
            fs::create_dir_all(&dir)?;
        }
        let ordinals = list_ordinals(&dir)?;
        for pair in ordinals.windows(2) {
            if pair[1].0 != pair[0].0 + 1 {
                return Err(SpoolError::bad_segment(
                    pair[1],
                    format!("ordinal gap after segment {}", pair[0]),
                ));
            }
        }

        let state = StoreState {
            mapped: BTreeMap::new(),
            floor: ordinals.first().copied().unwrap_or_default(),
            highest: ordinals.last().copied(),
            writable: None,
        };
        tracing::debug!("Opened segment store {:?} with {} segments", dir, ordinals.len());

        Ok(Self {
            dir,
            mode,
            capacity,
            state: RwLock::new(state),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Capacity given to newly allocated segments.
    pub fn segment_capacity(&self) -> u32 {
        self.capacity
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn floor(&self) -> SegmentId {
        self.read_state().floor
    }

    pub fn highest(&self) -> Option<SegmentId> {
        self.read_state().highest
    }

    /// Returns a readable view of segment `id`.
    ///
    /// `Ok(None)` means the segment does not exist yet. Pruned segments fail
    /// with [`SpoolError::SegmentGone`].
    pub fn map(&self, id: SegmentId) -> Result<Option<Arc<Segment>>> {
        {
            let state = self.read_state();
            if let Some(seg) = state.mapped.get(&id) {
                return Ok(Some(Arc::clone(seg)));
            }
            if id < state.floor {
                return Err(SpoolError::SegmentGone(id));
            }
            let beyond = state.highest.map_or(true, |h| id > h);
            if beyond && !Segment::path_for(&self.dir, id).exists() {
                return Ok(None);
            }
        }

        let segment = match Segment::open(&self.dir, id, false) {
            Ok(seg) => Arc::new(seg),
            Err(SpoolError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                // it existed, so someone pruned it underneath us
                return Err(SpoolError::SegmentGone(id));
            }
            Err(e) => return Err(e),
        };

        let mut state = self.write_state();
        if id < state.floor {
            return Err(SpoolError::SegmentGone(id));
        }
        if state.highest.map_or(true, |h| id > h) {
            state.highest = Some(id);
        }
        let seg = state.mapped.entry(id).or_insert(segment);
        Ok(Some(Arc::clone(seg)))
    }

    /// Header of segment `id` read straight from disk, without mapping it.
    pub fn read_header(&self, id: SegmentId) -> Result<SegmentHeader> {
        if let Some(seg) = self.read_state().mapped.get(&id) {
            return Ok(SegmentHeader {
                id,
                first_index: seg.first_index(),
                capacity: seg.capacity(),
            });
        }
        match fs::File::open(Segment::path_for(&self.dir, id)) {
            Ok(file) => SegmentHeader::read_from(id, file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SpoolError::SegmentGone(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// The single writable segment. The highest existing segment is reopened
    /// for writing; an empty store allocates segment 0 starting at
    /// `first_index`.
    pub fn allocate_or_get_writable_segment(&self, first_index: u64) -> Result<Arc<Segment>> {
        if self.mode == OpenMode::ReadOnly {
            return Err(SpoolError::ReadOnly);
        }
        let mut state = self.write_state();
        if let Some(id) = state.writable {
            if let Some(seg) = state.mapped.get(&id) {
                return Ok(Arc::clone(seg));
            }
        }

        let segment = match state.highest {
            Some(id) => Segment::open(&self.dir, id, true)?,
            None => Segment::create(&self.dir, state.floor, first_index, self.capacity)?,
        };
        let id = segment.id();
        let segment = Arc::new(segment);
        state.mapped.insert(id, Arc::clone(&segment));
        state.highest = Some(id);
        state.writable = Some(id);
        Ok(segment)
    }

    /// Allocates segment `highest + 1` whose first record will be
    /// `first_index`, and makes it the writable segment.
    pub fn roll(&self, first_index: u64) -> Result<Arc<Segment>> {
        if self.mode == OpenMode::ReadOnly {
            return Err(SpoolError::ReadOnly);
        }
        let mut state = self.write_state();
        let id = state.highest.map_or(state.floor, |h| h.next());
        let segment = Arc::new(Segment::create(&self.dir, id, first_index, self.capacity)?);

        // the previous writable mapping stays valid for readers; new readers
        // get a read-only view
        if let Some(prev) = state.writable.take() {
            if let Some(old) = state.mapped.remove(&prev) {
                match Segment::open(&self.dir, prev, false) {
                    Ok(ro) => {
                        state.mapped.insert(prev, Arc::new(ro));
                    }
                    Err(e) => {
                        tracing::warn!("Keeping writable mapping of sealed segment {}: {}", prev, e);
                        state.mapped.insert(prev, old);
                    }
                }
            }
        }
        state.mapped.insert(id, Arc::clone(&segment));
        state.highest = Some(id);
        state.writable = Some(id);
        tracing::info!("Rolled to segment {} (first index {})", id, first_index);
        Ok(segment)
    }

    /// Writes the end marker a crashed writer may have left out of sealed
    /// segment `id`. Returns whether a marker was written.
    pub(crate) fn seal_unterminated(&self, id: SegmentId) -> Result<bool> {
        if self.mode == OpenMode::ReadOnly {
            return Err(SpoolError::ReadOnly);
        }
        let segment = Segment::open(&self.dir, id, true)?;
        let mut frames = segment.frames(segment.data_start());
        let mut last = None;
        for entry in frames.by_ref() {
            last = Some(entry);
        }
        match last {
            Some(FrameEntry::End { .. }) => Ok(false),
            Some(FrameEntry::Corrupt { offset, reason }) => {
                tracing::warn!("Not sealing segment {}: bad frame at {}: {}", id, offset, reason);
                Ok(false)
            }
            _ => {
                let offset = frames.offset();
                segment.mark_end(offset);
                segment.flush_range(offset, FRAME_HEADER_SIZE)?;
                tracing::warn!("Sealed segment {} at offset {} after an interrupted roll", id, offset);
                Ok(true)
            }
        }
    }

    /// Bytes used in a segment (header plus published frames).
    pub fn capacity_used(&self, segment: &Segment) -> u64 {
        segment.capacity_used()
    }

    /// Ordinals present on disk, ascending.
    pub fn ordinals(&self) -> Result<Vec<SegmentId>> {
        list_ordinals(&self.dir)
    }

    /// Drops every segment below `id`: unmaps it and deletes its file.
    ///
    /// Tailers positioned in a pruned segment fail with `SegmentGone` on
    /// their next read. The writable segment is never pruned.
    pub fn prune_before(&self, id: SegmentId) -> Result<usize> {
        if self.mode == OpenMode::ReadOnly {
            return Err(SpoolError::ReadOnly);
        }
        let mut state = self.write_state();
        if let Some(w) = state.writable {
            if id > w {
                return Err(SpoolError::InvalidConfig(format!(
                    "cannot prune the writable segment {}",
                    w
                )));
            }
        }
        if let Some(h) = state.highest {
            if id > h {
                return Err(SpoolError::InvalidConfig(format!(
                    "cannot prune beyond the highest segment {}",
                    h
                )));
            }
        }

        let mut removed = 0;
        for ordinal in state.floor.0..id.0 {
            let ordinal = SegmentId(ordinal);
            state.mapped.remove(&ordinal);
            match fs::remove_file(Segment::path_for(&self.dir, ordinal)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if id > state.floor {
            state.floor = id;
        }
        tracing::info!("Pruned {} segments below {}", removed, id);
        Ok(removed)
    }
}

/// Segment ordinals present in `dir`, sorted ascending.
pub fn list_ordinals(dir: &Path) -> Result<Vec<SegmentId>> {
    let mut ordinals = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(id) = name.to_str().and_then(SegmentId::from_file_name) {
            if entry.metadata()?.len() >= SEGMENT_HEADER_SIZE as u64 {
                ordinals.push(id);
            }
        }
    }
    ordinals.sort();
    Ok(ordinals)
}
