// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::tempdir;

use crate::config::{LogConfig, OpenMode};
use crate::log::{open_log, Log};
use crate::wire::{Document, Payload};

fn small_log(dir: &std::path::Path) -> Log {
    let config = LogConfig::default().with_segment_capacity(4096).with_index_spacing(16);
    Log::open(dir, OpenMode::ReadWrite, config).unwrap()
}

#[test]
fn test_readme_flow() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path().join("queue-dir"), OpenMode::ReadWrite).unwrap();
    let mut appender = log.create_appender().unwrap();

    appender.append_document(&Document::new().with("msg", "TestMessage")).unwrap();
    appender.append_text("TestMessage").unwrap();

    let mut tailer = log.create_tailer();
    let doc = tailer.read_document().unwrap().unwrap();
    assert_eq!(doc.get_text("msg"), Some("TestMessage"));
    assert_eq!(tailer.read_text().unwrap().as_deref(), Some("TestMessage"));
    assert_eq!(tailer.read_next().unwrap(), None);
}

#[test]
fn test_thousand_records_in_order() {
    let dir = tempdir().unwrap();
    let log = small_log(dir.path());
    let mut appender = log.create_appender().unwrap();
    for i in 0..1000i64 {
        let doc = Document::new().with("name", format!("n{}", i));
        assert_eq!(appender.append_document(&doc).unwrap(), i as u64);
    }
    assert!(log.segment_ordinals().unwrap().len() > 1, "records should span segments");

    let mut tailer = log.create_tailer();
    for i in 0..1000u64 {
        assert_eq!(tailer.index(), i);
        let doc = tailer.read_document().unwrap().unwrap();
        assert_eq!(doc.get_text("name"), Some(format!("n{}", i).as_str()));
    }
    assert_eq!(tailer.read_next().unwrap(), None);
}

#[test]
fn test_empty_log_read_returns_immediately() {
    let dir = tempdir().unwrap();
    let log = small_log(dir.path());
    let mut tailer = log.create_tailer();
    let start = Instant::now();
    for _ in 0..10_000 {
        assert!(tailer.read_next().unwrap().is_none());
    }
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_tailers_are_independent() {
    let dir = tempdir().unwrap();
    let log = small_log(dir.path());
    let mut appender = log.create_appender().unwrap();
    for i in 0..300 {
        appender.append_text(&format!("r{}", i)).unwrap();
    }

    let mut fast = log.create_tailer();
    let mut slow = log.create_tailer();
    let mut fast_seen = Vec::new();
    let mut slow_seen = Vec::new();
    loop {
        let mut progressed = false;
        for _ in 0..3 {
            if let Some(text) = fast.read_text().unwrap() {
                fast_seen.push(text);
                progressed = true;
            }
        }
        if let Some(text) = slow.read_text().unwrap() {
            slow_seen.push(text);
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    let expected: Vec<String> = (0..300).map(|i| format!("r{}", i)).collect();
    assert_eq!(fast_seen, expected);
    assert_eq!(slow_seen, expected);
}

#[test]
fn test_rollover_is_transparent() {
    let dir = tempdir().unwrap();
    let config = LogConfig::default().with_segment_capacity(256).with_index_spacing(4);
    let log = Log::open(dir.path(), OpenMode::ReadWrite, config).unwrap();
    let mut appender = log.create_appender().unwrap();

    // sizes chosen so frames land right up against the end marker
    let sizes = [200usize, 10, 0, 190, 1, 2, 3, 211, 50, 50, 50, 50];
    for (i, size) in sizes.iter().enumerate() {
        let index = appender.append_bytes(&vec![i as u8; *size]).unwrap();
        assert_eq!(index, i as u64);
    }

    let mut tailer = log.create_tailer();
    for (i, size) in sizes.iter().enumerate() {
        match tailer.read_next().unwrap() {
            Some(Payload::Bytes(bytes)) => assert_eq!(bytes, vec![i as u8; *size]),
            other => panic!("record {}: {:?}", i, other),
        }
    }
    assert!(tailer.read_next().unwrap().is_none());
    assert!(log.segment_ordinals().unwrap().len() >= 6);
}

#[test]
fn test_concurrent_writer_and_reader() {
    let dir = tempdir().unwrap();
    let log = small_log(dir.path());
    let total = 5_000u64;

    let writer_log = log.clone();
    let writer = thread::spawn(move || {
        let mut appender = writer_log.create_appender().unwrap();
        for i in 0..total {
            appender
                .append_document(&Document::new().with("seq", i as i64).with("pad", "x".repeat((i % 97) as usize)))
                .unwrap();
        }
    });

    let mut tailer = log.create_tailer();
    let mut next = 0u64;
    let deadline = Instant::now() + Duration::from_secs(30);
    while next < total {
        assert!(Instant::now() < deadline, "reader stalled at {}", next);
        match tailer.read_document().unwrap() {
            Some(doc) => {
                assert_eq!(doc.get_i64("seq"), Some(next as i64));
                next += 1;
            }
            None => thread::yield_now(),
        }
    }
    writer.join().unwrap();
    assert_eq!(log.len().unwrap(), total);
}

#[test]
fn test_many_tailers_on_threads() {
    let dir = tempdir().unwrap();
    let log = small_log(dir.path());
    let mut appender = log.create_appender().unwrap();
    for i in 0..500 {
        appender.append_text(&format!("{}", i)).unwrap();
    }

    let log = Arc::new(log);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                let mut tailer = log.create_tailer();
                let mut count = 0u64;
                while let Some(text) = tailer.read_text().unwrap() {
                    assert_eq!(text, count.to_string());
                    count += 1;
                }
                count
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 500);
    }
}

#[test]
fn test_dump_lists_every_record() {
    let dir = tempdir().unwrap();
    let log = small_log(dir.path());
    let mut appender = log.create_appender().unwrap();
    appender.append_document(&Document::new().with("msg", "TestMessage")).unwrap();
    appender.append_text("TestMessage").unwrap();

    let dump = log.dump().unwrap();
    assert_eq!(dump, "--- !index 0\n{msg: TestMessage}\n--- !index 1\nTestMessage\n");
}

#[test]
fn test_reader_keeps_up_with_frequent_rolls() {
    let dir = tempdir().unwrap();
    let config = LogConfig::default().with_segment_capacity(256).with_index_spacing(4);
    let log = Log::open(dir.path(), OpenMode::ReadWrite, config.clone()).unwrap();
    let total = 3_000u64;

    let writer_log = log.clone();
    let writer = thread::spawn(move || {
        let mut appender = writer_log.create_appender().unwrap();
        for i in 0..total {
            let mut record = vec![0u8; 40];
            record[..8].copy_from_slice(&i.to_le_bytes());
            appender.append_bytes(&record).unwrap();
        }
    });

    // a second handle discovers segments on its own, without the writer's lock
    let other = Log::open(dir.path(), OpenMode::ReadOnly, config).unwrap();
    let mut tailer = log.create_tailer();
    let mut next = 0u64;
    let mut seen_len = 0u64;
    let deadline = Instant::now() + Duration::from_secs(60);
    while next < total {
        assert!(Instant::now() < deadline, "reader stalled at {}", next);
        match tailer.read_next().unwrap() {
            Some(Payload::Bytes(bytes)) => {
                assert_eq!(&bytes[..8], &next.to_le_bytes()[..]);
                next += 1;
            }
            Some(unexpected) => panic!("record {}: {:?}", next, unexpected),
            None => {
                let len = other.len().unwrap();
                assert!(len >= seen_len);
                seen_len = len;
            }
        }
    }
    writer.join().unwrap();
    assert_eq!(other.len().unwrap(), total);
}
