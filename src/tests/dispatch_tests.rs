// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use crate::args;
use crate::call::dispatch::OpResult;
use crate::call::{make_call_proxy, CallFailure, CallWriter, Dispatcher, MethodReader, MethodTable, Proxied, Receiver};
use crate::config::OpenMode;
use crate::error::Result;
use crate::log::open_log;
use crate::wire::Value;

/// Recording side of a statement interface.
struct Statements {
    writer: CallWriter,
}

impl Proxied for Statements {
    fn from_writer(writer: CallWriter) -> Self {
        Self { writer }
    }
}

impl Statements {
    fn update(&mut self, statement: &str, args: Vec<Value>) -> Result<u64> {
        let mut all = vec![Value::from(statement)];
        all.extend(args);
        self.writer.call("update", all)
    }
}

/// Receiver that only runs SELECT statements.
#[derive(Default)]
struct SelectOnly {
    successes: u32,
}

impl Receiver for SelectOnly {
    fn methods() -> MethodTable<Self> {
        MethodTable::new().method_rest("update", |r: &mut SelectOnly, statement: String, _: &[Value]| -> OpResult {
            if !statement.starts_with("SELECT") {
                return Err(format!("table missing for {}", statement).into());
            }
            r.successes += 1;
            Ok(())
        })
    }
}

/// Receiver that fails on odd numbers.
#[derive(Default)]
struct Picky {
    accepted: Vec<i64>,
}

impl Receiver for Picky {
    fn methods() -> MethodTable<Self> {
        MethodTable::new().method1("offer", |p: &mut Picky, n: i64| {
            if n % 2 == 1 {
                return Err(format!("odd {}", n).into());
            }
            p.accepted.push(n);
            Ok(())
        })
    }
}

#[test]
fn test_failing_receiver_reports_original_args() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path(), OpenMode::ReadWrite).unwrap();
    let mut statements: Statements = make_call_proxy(log.create_appender().unwrap());
    statements
        .update("INSERT INTO tableName (name, num) VALUES (?, ?)", args!["name", 5i64])
        .unwrap();
    statements.update("SELECT 1", args![]).unwrap();

    let failures: Arc<Mutex<Vec<CallFailure>>> = Arc::default();
    let sink = Arc::clone(&failures);
    let dispatcher = Dispatcher::<SelectOnly>::new().on_failure(move |f| sink.lock().unwrap().push(f));
    let mut reader = MethodReader::with_dispatcher(log.create_tailer(), SelectOnly::default(), dispatcher);

    assert!(reader.read_one().unwrap());
    assert_eq!(reader.tailer().index(), 1);
    assert_eq!(reader.receiver().successes, 0);

    {
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        let failure = &failures[0];
        assert_eq!(failure.index, 0);
        assert_eq!(failure.method, "update");
        assert_eq!(
            failure.args,
            args!["INSERT INTO tableName (name, num) VALUES (?, ?)", "name", 5i64]
        );
        assert!(failure.error.to_string().starts_with("table missing"));
    }

    assert!(reader.read_one().unwrap());
    assert!(!reader.read_one().unwrap());
    assert_eq!(reader.receiver().successes, 1);
    assert_eq!(failures.lock().unwrap().len(), 1);
}

#[test]
fn test_no_record_is_lost_when_operations_fail() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path(), OpenMode::ReadWrite).unwrap();
    let mut writer = CallWriter::new(log.create_appender().unwrap());
    for n in 0..200i64 {
        writer.call("offer", args![n]).unwrap();
    }

    let failed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failed);
    let dispatcher = Dispatcher::<Picky>::new().on_failure(move |f| {
        let n = f.args[0].as_i64().unwrap();
        sink.lock().unwrap().push(n);
    });
    let mut reader = MethodReader::with_dispatcher(log.create_tailer(), Picky::default(), dispatcher);

    let mut processed = 0;
    while reader.read_one().unwrap() {
        processed += 1;
    }
    assert_eq!(processed, 200);

    let accepted = &reader.receiver().accepted;
    let failed = failed.lock().unwrap();
    assert_eq!(accepted.len() + failed.len(), 200);
    assert!(accepted.iter().all(|n| n % 2 == 0));
    assert!(failed.iter().all(|n| n % 2 == 1));

    let mut all: Vec<i64> = accepted.iter().chain(failed.iter()).copied().collect();
    all.sort_unstable();
    assert_eq!(all, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_reader_resumes_from_saved_index() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path(), OpenMode::ReadWrite).unwrap();
    let mut writer = CallWriter::new(log.create_appender().unwrap());
    for n in [2i64, 4, 6, 8] {
        writer.call("offer", args![n]).unwrap();
    }

    let mut first = MethodReader::new(log.create_tailer(), Picky::default());
    assert!(first.read_one().unwrap());
    assert!(first.read_one().unwrap());
    let saved = first.tailer().index();

    let mut tailer = log.create_tailer();
    assert!(tailer.move_to(saved).unwrap());
    let mut second = MethodReader::new(tailer, Picky::default());
    while second.read_one().unwrap() {}
    assert_eq!(second.receiver().accepted, vec![6, 8]);
}
