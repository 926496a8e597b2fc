// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::fs;
use std::path::Path;

use tempfile::tempdir;

use crate::config::{LogConfig, OpenMode, INDEX_FILE_NAME};
use crate::error::SpoolError;
use crate::log::Log;
use crate::storage::{Segment, Slot};
use crate::types::SegmentId;

fn config() -> LogConfig {
    LogConfig::default().with_segment_capacity(512).with_index_spacing(8)
}

fn write_records(dir: &Path, from: u64, count: u64) {
    let log = Log::open(dir, OpenMode::ReadWrite, config()).unwrap();
    let mut appender = log.create_appender().unwrap();
    for i in from..from + count {
        assert_eq!(appender.append_text(&format!("record {}", i)).unwrap(), i);
    }
}

fn read_all(log: &Log) -> Vec<String> {
    let mut tailer = log.create_tailer();
    let mut out = Vec::new();
    while let Some(text) = tailer.read_text().unwrap() {
        out.push(text);
    }
    out
}

fn expected(count: u64) -> Vec<String> {
    (0..count).map(|i| format!("record {}", i)).collect()
}

#[test]
fn test_reopen_with_index_file() {
    let dir = tempdir().unwrap();
    write_records(dir.path(), 0, 120);
    assert!(dir.path().join(INDEX_FILE_NAME).exists());

    let log = Log::open(dir.path(), OpenMode::ReadOnly, config()).unwrap();
    assert_eq!(log.len().unwrap(), 120);
    assert_eq!(read_all(&log), expected(120));
}

#[test]
fn test_reopen_without_index_file_rebuilds() {
    let dir = tempdir().unwrap();
    write_records(dir.path(), 0, 120);
    fs::remove_file(dir.path().join(INDEX_FILE_NAME)).unwrap();

    let log = Log::open(dir.path(), OpenMode::ReadOnly, config()).unwrap();
    assert_eq!(log.len().unwrap(), 120);
    let mut tailer = log.create_tailer();
    assert!(tailer.move_to(97).unwrap());
    assert_eq!(tailer.read_text().unwrap().as_deref(), Some("record 97"));
}

#[test]
fn test_garbage_index_file_rebuilds() {
    let dir = tempdir().unwrap();
    write_records(dir.path(), 0, 60);
    fs::write(dir.path().join(INDEX_FILE_NAME), vec![0xA5u8; 28 * 4 + 5]).unwrap();

    let log = Log::open(dir.path(), OpenMode::ReadWrite, config()).unwrap();
    assert_eq!(log.len().unwrap(), 60);
    let mut appender = log.create_appender().unwrap();
    assert_eq!(appender.append_text("record 60").unwrap(), 60);
    drop(appender);
    assert_eq!(read_all(&log), expected(61));
}

#[test]
fn test_appends_continue_across_reopens() {
    let dir = tempdir().unwrap();
    write_records(dir.path(), 0, 40);
    write_records(dir.path(), 40, 40);
    write_records(dir.path(), 80, 40);

    let log = Log::open(dir.path(), OpenMode::ReadOnly, config()).unwrap();
    assert_eq!(read_all(&log), expected(120));
}

#[test]
fn test_second_handle_sees_later_appends() {
    let dir = tempdir().unwrap();
    let writer = Log::open(dir.path(), OpenMode::ReadWrite, config()).unwrap();
    let mut appender = writer.create_appender().unwrap();
    appender.append_text("record 0").unwrap();

    let reader = Log::open(dir.path(), OpenMode::ReadOnly, config()).unwrap();
    let mut tailer = reader.create_tailer();
    assert_eq!(tailer.read_text().unwrap().as_deref(), Some("record 0"));
    assert_eq!(tailer.read_text().unwrap(), None);

    // enough to roll several segments the reader has never listed
    for i in 1..100 {
        appender.append_text(&format!("record {}", i)).unwrap();
    }
    let mut seen = vec!["record 0".to_owned()];
    while let Some(text) = tailer.read_text().unwrap() {
        seen.push(text);
    }
    assert_eq!(seen, expected(100));
    assert_eq!(reader.len().unwrap(), 100);
}

#[test]
fn test_interrupted_roll_is_recovered() {
    let dir = tempdir().unwrap();
    write_records(dir.path(), 0, 3);
    // the writer died after creating the next segment but before marking
    // the end of the current one
    Segment::create(dir.path(), SegmentId(1), 3, 512).unwrap();

    let log = Log::open(dir.path(), OpenMode::ReadWrite, config()).unwrap();
    assert_eq!(log.len().unwrap(), 3);
    let mut appender = log.create_appender().unwrap();
    assert_eq!(appender.append_text("record 3").unwrap(), 3);
    assert_eq!(log.resolve(3).unwrap().segment, SegmentId(1));
    drop(appender);

    let seg = Segment::open(dir.path(), SegmentId(0), false).unwrap();
    let end = seg.frames(seg.data_start()).last();
    assert!(matches!(end, Some(crate::storage::FrameEntry::End { .. })));
    assert_eq!(seg.slot(seg.data_start()).unwrap(), Slot::Frame { len: 9 });

    let reader = Log::open(dir.path(), OpenMode::ReadOnly, config()).unwrap();
    assert_eq!(read_all(&reader), expected(4));
}

#[test]
fn test_pruned_segments_are_gone() {
    let dir = tempdir().unwrap();
    let log = Log::open(dir.path(), OpenMode::ReadWrite, config()).unwrap();
    let mut appender = log.create_appender().unwrap();
    for i in 0..200 {
        appender.append_text(&format!("record {}", i)).unwrap();
    }
    let ordinals = log.segment_ordinals().unwrap();
    assert!(ordinals.len() > 3);

    let mut lagging = log.create_tailer();
    assert!(lagging.read_text().unwrap().is_some());

    let keep = ordinals[2];
    assert_eq!(log.prune_segments_before(keep).unwrap(), 2);
    assert!(matches!(lagging.read_text(), Err(SpoolError::SegmentGone(SegmentId(0)))));

    let first = log.first_index().unwrap();
    let mut fresh = log.create_tailer();
    assert_eq!(fresh.index(), first);
    assert_eq!(fresh.read_text().unwrap(), Some(format!("record {}", first)));
    assert!(matches!(fresh.move_to(0), Err(SpoolError::SegmentGone(_))));

    // a reopened handle starts at the new floor
    drop(appender);
    let reopened = Log::open(dir.path(), OpenMode::ReadOnly, config()).unwrap();
    assert_eq!(reopened.first_index().unwrap(), first);
    assert_eq!(reopened.len().unwrap(), 200);
}

#[test]
fn test_corrupt_frame_is_reported_not_skipped() {
    let dir = tempdir().unwrap();
    write_records(dir.path(), 0, 2);
    fs::remove_file(dir.path().join(INDEX_FILE_NAME)).unwrap();

    // overwrite the second frame's length word with an impossible length
    let path = dir.path().join(SegmentId(0).file_name());
    let mut bytes = fs::read(&path).unwrap();
    let second = 32 + 16;
    bytes[second..second + 4].copy_from_slice(&0x7fff_0000u32.to_le_bytes());
    fs::write(&path, bytes).unwrap();

    assert!(matches!(
        Log::open(dir.path(), OpenMode::ReadOnly, config()),
        Err(SpoolError::MalformedRecord { index: 1, .. })
    ));
}
