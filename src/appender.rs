// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Single-writer cursor.
//!
//! Each append encodes the payload into a reusable buffer, copies it into
//! the writable segment and publishes the frame's length word last. A
//! reader therefore either sees nothing at the frame offset or a complete
//! record.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::{max_payload_for, SyncMode, FRAME_HEADER_SIZE};
use crate::error::{Result, SpoolError};
use crate::log::Log;
use crate::storage::{IndexFile, Segment};
use crate::types::{Position, SegmentId};
use crate::wire::{encode_bytes, encode_document, encode_text, Document, Payload};

pub struct Appender {
    log: Log,
    segment: Arc<Segment>,
    offset: u32,
    /// Offset up to which the current segment was last synced.
    synced: u32,
    index_file: Option<IndexFile>,
    last_index: Option<u64>,
    poisoned: Option<SegmentId>,
    scratch: Vec<u8>,
}

impl Appender {
    pub(crate) fn new(log: Log) -> Result<Self> {
        let inner = &log.inner;
        if inner.store.mode() == crate::config::OpenMode::ReadOnly {
            return Err(SpoolError::ReadOnly);
        }
        if inner.appender_active.swap(true, Ordering::AcqRel) {
            return Err(SpoolError::AppenderBusy);
        }

        match Self::attach(&log) {
            Ok(appender) => Ok(appender),
            Err(e) => {
                log.inner.appender_active.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn attach(log: &Log) -> Result<Self> {
        let inner = &log.inner;
        inner.catch_up()?;

        let mut index = inner.write_index();
        let segment = inner.store.allocate_or_get_writable_segment(index.tail())?;
        if let Some(prev) = segment.id().0.checked_sub(1).map(SegmentId) {
            if prev >= inner.store.floor() {
                inner.store.seal_unterminated(prev)?;
            }
        }
        let offset = match index.tail_position() {
            Some(position) if position.segment == segment.id() => position.offset,
            Some(position) => {
                return Err(SpoolError::bad_segment(
                    segment.id(),
                    format!("log ends in segment {}, not the writable one", position.segment),
                ))
            }
            None => {
                index.begin_segment(segment.id(), segment.first_index())?;
                segment.data_start()
            }
        };

        index.clear_pending();
        let index_file = match IndexFile::rewrite(inner.index_path(), &index.entries()) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!("Appending without an index file: {}", e);
                None
            }
        };
        tracing::debug!(
            "Appender attached to segment {} at offset {} (next index {})",
            segment.id(),
            offset,
            index.tail()
        );
        drop(index);

        Ok(Self {
            log: log.clone(),
            segment,
            offset,
            synced: offset,
            index_file,
            last_index: None,
            poisoned: None,
            scratch: Vec::with_capacity(256),
        })
    }

    /// Appends one payload and returns its record index.
    pub fn append(&mut self, payload: impl Into<Payload>) -> Result<u64> {
        match payload.into() {
            Payload::Document(doc) => self.append_document(&doc),
            Payload::Text(text) => self.append_text(&text),
            Payload::Bytes(bytes) => self.append_bytes(&bytes),
        }
    }

    pub fn append_document(&mut self, doc: &Document) -> Result<u64> {
        self.check_poisoned()?;
        self.scratch.clear();
        if let Err(e) = encode_document(doc, &mut self.scratch) {
            let next = self.log.inner.read_index().tail();
            return Err(SpoolError::malformed(next, e.to_string()));
        }
        self.write_scratch()
    }

    pub fn append_text(&mut self, text: &str) -> Result<u64> {
        self.check_poisoned()?;
        self.scratch.clear();
        encode_text(text, &mut self.scratch);
        self.write_scratch()
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<u64> {
        self.check_poisoned()?;
        self.scratch.clear();
        encode_bytes(bytes, &mut self.scratch);
        self.write_scratch()
    }

    /// Index of the last record written by this appender.
    pub fn last_index_appended(&self) -> Option<u64> {
        self.last_index
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    /// Flushes everything written to the current segment so far.
    pub fn sync(&mut self) -> Result<()> {
        let start = self.segment.data_start();
        self.segment
            .flush_range(start, (self.offset - start) as usize + FRAME_HEADER_SIZE)?;
        self.synced = self.offset;
        if let Some(file) = self.index_file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    fn check_poisoned(&self) -> Result<()> {
        match self.poisoned {
            Some(segment) => Err(SpoolError::StorageExhausted {
                segment,
                source: std::io::Error::new(std::io::ErrorKind::Other, "appender is poisoned"),
            }),
            None => Ok(()),
        }
    }

    fn write_scratch(&mut self) -> Result<u64> {
        let len = self.scratch.len();
        let inner = Arc::clone(&self.log.inner);
        let mut index = inner.write_index();

        if !self.segment.fits(self.offset, len) {
            let max = max_payload_for(inner.store.segment_capacity());
            if len > max {
                return Err(SpoolError::RecordTooLarge { len, max });
            }
            let first_index = index.tail();
            let next = match inner.store.roll(first_index) {
                Ok(next) => next,
                Err(e @ SpoolError::StorageExhausted { .. }) => {
                    tracing::error!("Appender poisoned: {}", e);
                    self.poisoned = Some(self.segment.id().next());
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            self.segment.mark_end(self.offset);
            if self.log.config().sync != SyncMode::None {
                self.segment.flush_async_range(self.synced, (self.offset - self.synced) as usize + FRAME_HEADER_SIZE)?;
            }
            index.begin_segment(next.id(), first_index)?;
            self.segment = next;
            self.offset = self.segment.data_start();
            self.synced = self.offset;
            metrics::counter!("spool_segments_rolled_total", 1);
        }

        let record = index.tail();
        let position = Position::new(self.segment.id(), self.offset);
        let next_offset = self.segment.write_frame(self.offset, &self.scratch);
        let written = next_offset - self.offset;
        index.advance(record, position, written);
        let pending = index.take_pending();
        drop(index);

        inner.publish(record + 1);
        self.offset = next_offset;
        self.last_index = Some(record);

        match self.log.config().sync {
            SyncMode::None => {}
            SyncMode::Async => {
                self.segment.flush_async_range(position.offset, written as usize)?;
            }
            SyncMode::Sync => {
                self.segment.flush_range(position.offset, written as usize)?;
                self.synced = next_offset;
            }
        }

        if !pending.is_empty() {
            if let Some(file) = self.index_file.as_mut() {
                for entry in &pending {
                    file.append(entry)?;
                }
                file.flush()?;
            }
        }

        metrics::counter!("spool_records_appended_total", 1);
        metrics::counter!("spool_bytes_appended_total", u64::from(written));
        Ok(record)
    }
}

impl Drop for Appender {
    fn drop(&mut self) {
        if let Err(e) = self.segment.flush_async_range(self.synced, (self.offset - self.synced) as usize) {
            tracing::warn!("Failed to flush segment {} on close: {}", self.segment.id(), e);
        }
        self.log.inner.appender_active.store(false, Ordering::Release);
    }
}
