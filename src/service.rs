// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Command service: statements recorded into one log, executed by a worker,
//! and their outcomes recorded into a second log.
//!
//! ```text
//! StatementWriter --update/query--> [commands] --worker + Executor--> [results] --> ResultSink
//! ```
//! The executor itself is a collaborator; any type implementing
//! [`Executor`] can sit behind the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::args;
use crate::call::dispatch::OpResult;
use crate::call::{make_call_proxy, CallWriter, Dispatcher, MethodReader, MethodTable, Proxied, Receiver};
use crate::error::{OperationError, Result, SpoolError};
use crate::log::Log;
use crate::wire::{Document, FromValue, Value};

/// Runs statements. Update returns an affected-row count, query returns rows.
pub trait Executor: Send + 'static {
    fn update(&mut self, statement: &str, args: &[Value]) -> std::result::Result<i64, OperationError>;
    fn query(&mut self, statement: &str, args: &[Value]) -> std::result::Result<Vec<Document>, OperationError>;
}

/// Receives statement outcomes. Failure hooks get the error plus the
/// original statement and arguments.
pub trait ResultSink: Send + 'static {
    fn update_result(&mut self, count: i64, statement: &str, args: &[Value]) -> OpResult;
    fn update_failed(&mut self, error: &dyn std::error::Error, statement: &str, args: &[Value]) -> OpResult;
    fn query_result(&mut self, rows: Vec<Document>, statement: &str, args: &[Value]) -> OpResult;
    fn query_failed(&mut self, error: &dyn std::error::Error, statement: &str, args: &[Value]) -> OpResult;
}

/// An error that happened on the other side of a log; only its message
/// survives the trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RemoteError(pub String);

/// Records statements into the commands log.
pub struct StatementWriter {
    writer: CallWriter,
}

impl Proxied for StatementWriter {
    fn from_writer(writer: CallWriter) -> Self {
        Self { writer }
    }
}

impl StatementWriter {
    pub fn update(&mut self, statement: &str, args: Vec<Value>) -> Result<u64> {
        self.writer.call("update", with_statement(statement, args))
    }

    pub fn query(&mut self, statement: &str, args: Vec<Value>) -> Result<u64> {
        self.writer.call("query", with_statement(statement, args))
    }
}

fn with_statement(statement: &str, args: Vec<Value>) -> Vec<Value> {
    let mut all = Vec::with_capacity(args.len() + 1);
    all.push(Value::from(statement));
    all.extend(args);
    all
}

/// A [`ResultSink`] that records every outcome into the results log.
pub struct ResultWriter {
    writer: CallWriter,
}

impl Proxied for ResultWriter {
    fn from_writer(writer: CallWriter) -> Self {
        Self { writer }
    }
}

fn boxed(e: SpoolError) -> OperationError {
    Box::new(e)
}

impl ResultSink for ResultWriter {
    fn update_result(&mut self, count: i64, statement: &str, args: &[Value]) -> OpResult {
        self.writer
            .call("update_result", args![count, statement, args.to_vec()])
            .map(drop)
            .map_err(boxed)
    }

    fn update_failed(&mut self, error: &dyn std::error::Error, statement: &str, args: &[Value]) -> OpResult {
        self.writer
            .call("update_failed", args![error.to_string(), statement, args.to_vec()])
            .map(drop)
            .map_err(boxed)
    }

    fn query_result(&mut self, rows: Vec<Document>, statement: &str, args: &[Value]) -> OpResult {
        let rows: Vec<Value> = rows.into_iter().map(Value::from).collect();
        self.writer
            .call("query_result", args![rows, statement, args.to_vec()])
            .map(drop)
            .map_err(boxed)
    }

    fn query_failed(&mut self, error: &dyn std::error::Error, statement: &str, args: &[Value]) -> OpResult {
        self.writer
            .call("query_failed", args![error.to_string(), statement, args.to_vec()])
            .map(drop)
            .map_err(boxed)
    }
}

/// Worker-side receiver: executes statements and reports the outcome.
pub struct CommandHandler<E> {
    executor: E,
    results: ResultWriter,
}

impl<E: Executor> CommandHandler<E> {
    pub fn new(executor: E, results: ResultWriter) -> Self {
        Self { executor, results }
    }

    fn update(&mut self, statement: String, args: &[Value]) -> OpResult {
        match self.executor.update(&statement, args) {
            Ok(count) => self.results.update_result(count, &statement, args),
            Err(e) => self.results.update_failed(&*e, &statement, args),
        }
    }

    fn query(&mut self, statement: String, args: &[Value]) -> OpResult {
        match self.executor.query(&statement, args) {
            Ok(rows) => self.results.query_result(rows, &statement, args),
            Err(e) => self.results.query_failed(&*e, &statement, args),
        }
    }
}

impl<E: Executor> Receiver for CommandHandler<E> {
    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .method_rest("update", Self::update)
            .method_rest("query", Self::query)
    }
}

/// Reader-side receiver: replays the results log onto a [`ResultSink`].
pub struct SinkReceiver<S> {
    sink: S,
}

impl<S> SinkReceiver<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

fn rows_from(values: Vec<Value>) -> std::result::Result<Vec<Document>, OperationError> {
    values
        .iter()
        .map(|v| Document::from_value(v).map_err(|e| Box::new(e) as OperationError))
        .collect()
}

impl<S: ResultSink> Receiver for SinkReceiver<S> {
    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .method3("update_result", |r: &mut Self, count: i64, statement: String, args: Vec<Value>| {
                r.sink.update_result(count, &statement, &args)
            })
            .method3("update_failed", |r: &mut Self, error: String, statement: String, args: Vec<Value>| {
                r.sink.update_failed(&RemoteError(error), &statement, &args)
            })
            .method3("query_result", |r: &mut Self, rows: Vec<Value>, statement: String, args: Vec<Value>| {
                r.sink.query_result(rows_from(rows)?, &statement, &args)
            })
            .method3("query_failed", |r: &mut Self, error: String, statement: String, args: Vec<Value>| {
                r.sink.query_failed(&RemoteError(error), &statement, &args)
            })
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<u64>>,
}

/// Two logs and the worker that moves statements from one to the other.
pub struct CommandService {
    commands: Log,
    results: Log,
    worker: Option<Worker>,
}

impl CommandService {
    pub fn open(commands: Log, results: Log) -> Self {
        Self {
            commands,
            results,
            worker: None,
        }
    }

    pub fn commands(&self) -> &Log {
        &self.commands
    }

    pub fn results(&self) -> &Log {
        &self.results
    }

    /// Proxy recording statements into the commands log.
    pub fn create_writer(&self) -> Result<StatementWriter> {
        Ok(make_call_proxy(self.commands.create_appender()?))
    }

    /// Reader replaying the results log, from its start, onto `sink`.
    pub fn create_reader<S: ResultSink>(&self, sink: S) -> MethodReader<SinkReceiver<S>> {
        MethodReader::new(self.results.create_tailer(), SinkReceiver::new(sink))
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawns the worker thread. It executes every command from the start of
    /// the commands log and yields the thread while there is nothing to do.
    pub fn start<E: Executor>(&mut self, executor: E) -> Result<()> {
        if self.worker.is_some() {
            return Err(SpoolError::InvalidConfig("command worker already running".into()));
        }
        let results: ResultWriter = make_call_proxy(self.results.create_appender()?);
        let mut tailer = self.commands.create_tailer();
        let mut handler = CommandHandler::new(executor, results);
        let mut dispatcher = Dispatcher::<CommandHandler<E>>::new();

        let stop = Arc::new(AtomicBool::new(false));
        let stopping = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("spool-commands".into())
            .spawn(move || {
                let mut processed = 0u64;
                while !stopping.load(Ordering::Acquire) {
                    match dispatcher.dispatch_one(&mut tailer, &mut handler) {
                        Ok(true) => processed += 1,
                        Ok(false) => thread::yield_now(),
                        Err(e @ SpoolError::ProtocolMismatch { .. }) => {
                            tracing::warn!("Skipping command: {}", e);
                        }
                        Err(e) => {
                            tracing::error!("Command worker stopped: {}", e);
                            return Err(e);
                        }
                    }
                }
                Ok(processed)
            })?;

        tracing::info!("Started command worker on {:?}", self.commands.dir());
        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Stops and joins the worker; returns how many commands it processed.
    pub fn close(&mut self) -> Result<u64> {
        let Some(worker) = self.worker.take() else {
            return Ok(0);
        };
        worker.stop.store(true, Ordering::Release);
        let processed = worker.handle.join().map_err(|_| SpoolError::WorkerPanicked)??;
        tracing::info!("Command worker processed {} commands", processed);
        Ok(processed)
    }
}

impl Drop for CommandService {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Command worker ended with an error: {}", e);
        }
    }
}
