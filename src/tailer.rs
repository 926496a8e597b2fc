// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Per-consumer read cursor.
//!
//! A tailer keeps its next index plus a cached (segment, offset). Every read
//! checks the segment is still retained, loads the frame word at the cached
//! offset and either returns the record or reports that nothing is there
//! yet. Polling an idle log allocates nothing and never blocks.

use std::sync::Arc;

use crate::config::frame_len;
use crate::error::{Result, SpoolError};
use crate::log::{Log, NextSegment};
use crate::storage::{Segment, Slot};
use crate::types::Position;
use crate::wire::{decode_document, decode_payload, decode_text, peek_kind, Document, Payload, PayloadKind};

pub struct Tailer {
    log: Log,
    index: u64,
    segment: Option<Arc<Segment>>,
    offset: u32,
}

impl Tailer {
    pub(crate) fn new(log: Log) -> Self {
        let index = log.inner.read_index().first_index();
        Self {
            log,
            index,
            segment: None,
            offset: 0,
        }
    }

    /// Next index to be read.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Cached position of the next frame, once attached.
    pub fn position(&self) -> Option<Position> {
        self.segment.as_ref().map(|s| Position::new(s.id(), self.offset))
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    /// Rewinds to the oldest retained record.
    pub fn to_start(&mut self) -> Result<()> {
        self.log.inner.catch_up()?;
        self.index = self.log.inner.read_index().first_index();
        self.segment = None;
        Ok(())
    }

    /// Skips to the tail; only records appended afterwards will be read.
    pub fn to_end(&mut self) -> Result<()> {
        self.index = self.log.inner.catch_up()?;
        self.segment = None;
        Ok(())
    }

    /// Positions the cursor at `index`. Returns `false`, leaving the cursor
    /// where it was, if `index` is beyond the tail.
    pub fn move_to(&mut self, index: u64) -> Result<bool> {
        match self.log.inner.seek(index) {
            Ok(found) => {
                self.index = index;
                self.attach_to(found);
                Ok(true)
            }
            Err(SpoolError::IndexOutOfRange { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn attach_to(&mut self, found: Option<(Arc<Segment>, u32)>) {
        match found {
            Some((segment, offset)) => {
                self.segment = Some(segment);
                self.offset = offset;
            }
            None => self.segment = None,
        }
    }

    /// Finds the frame for `self.index`: its offset and payload length in
    /// `self.segment`, or `None` when it has not been written yet.
    fn current_frame(&mut self) -> Result<Option<(u32, u32)>> {
        loop {
            if self.segment.is_none() {
                let found = self.log.inner.seek(self.index)?;
                self.attach_to(found);
            }
            let Some(segment) = self.segment.as_ref() else {
                return Ok(None);
            };
            if segment.id() < self.log.inner.store.floor() {
                return Err(SpoolError::SegmentGone(segment.id()));
            }

            let sealed = match segment.slot(self.offset) {
                Ok(Slot::Frame { len }) => return Ok(Some((self.offset, len))),
                Ok(Slot::Empty) => false,
                Ok(Slot::EndOfSegment) => true,
                Err(reason) => return Err(SpoolError::malformed(self.index, reason)),
            };
            match self.log.inner.next_segment(segment, self.offset, self.index, sealed)? {
                NextSegment::Follow(next) => {
                    tracing::debug!("Tailer moving to segment {} at index {}", next.id(), self.index);
                    self.offset = next.data_start();
                    self.segment = Some(next);
                }
                NextSegment::Reread => continue,
                NextSegment::NotYet => return Ok(None),
            }
        }
    }

    fn step(&mut self, offset: u32, len: u32) {
        self.offset = offset + frame_len(len as usize) as u32;
        self.index += 1;
    }

    /// Hands the next record's raw payload to `f`. The cursor advances only
    /// if `f` succeeds.
    pub fn read_with<T, F>(&mut self, f: F) -> Result<Option<T>>
    where
        F: FnOnce(u64, &[u8]) -> Result<T>,
    {
        let Some((offset, len)) = self.current_frame()? else {
            return Ok(None);
        };
        let value = match self.segment.as_ref() {
            Some(segment) => f(self.index, segment.payload(offset, len))?,
            None => return Ok(None),
        };
        self.step(offset, len);
        Ok(Some(value))
    }

    /// Reads the next record, or `None` if nothing new has been appended.
    pub fn read_next(&mut self) -> Result<Option<Payload>> {
        self.read_with(|index, bytes| decode_payload(bytes).map_err(|e| SpoolError::malformed(index, e.to_string())))
    }

    /// Like [`Tailer::read_next`], also returning the record index.
    pub fn read_indexed(&mut self) -> Result<Option<(u64, Payload)>> {
        self.read_with(|index, bytes| {
            decode_payload(bytes)
                .map(|payload| (index, payload))
                .map_err(|e| SpoolError::malformed(index, e.to_string()))
        })
    }

    /// Reads the next record as a document. A record of another kind is
    /// reported and left unread.
    pub fn read_document(&mut self) -> Result<Option<Document>> {
        self.read_with(|index, bytes| {
            expect_kind(index, bytes, PayloadKind::Document)?;
            decode_document(bytes).map_err(|e| SpoolError::malformed(index, e.to_string()))
        })
    }

    /// Reads the next record as text. A record of another kind is reported
    /// and left unread.
    pub fn read_text(&mut self) -> Result<Option<String>> {
        self.read_with(|index, bytes| {
            expect_kind(index, bytes, PayloadKind::Text)?;
            decode_text(bytes)
                .map(str::to_owned)
                .map_err(|e| SpoolError::malformed(index, e.to_string()))
        })
    }

    /// Steps over the next record without decoding it. Returns `false` if
    /// there is none yet. This is how a caller moves past a malformed record.
    pub fn skip(&mut self) -> Result<bool> {
        Ok(self.read_with(|_, _| Ok(()))?.is_some())
    }
}

fn expect_kind(index: u64, bytes: &[u8], expected: PayloadKind) -> Result<()> {
    let found = peek_kind(bytes).map_err(|e| SpoolError::malformed(index, e.to_string()))?;
    if found != expected {
        return Err(SpoolError::UnexpectedPayload {
            index,
            expected: expected.name(),
            found: found.name(),
        });
    }
    Ok(())
}
