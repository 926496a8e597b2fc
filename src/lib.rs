// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! spool: a durable, memory-mapped, append-only record log with a
//! method-call protocol on top.
//!
//! Records are appended by a single [`Appender`] and read back in order by
//! any number of [`Tailer`]s, within one process or across processes
//! sharing the log directory. [`call`] turns method invocations into
//! records and replays them onto a receiver.

pub mod appender;
pub mod call;
pub mod config;
pub mod error;
pub mod log;
pub mod service;
pub mod storage;
pub mod tailer;
pub mod types;
pub mod wire;

pub use appender::Appender;
pub use call::{dispatch_one, make_call_proxy, CallWriter, Dispatcher, MethodReader, MethodTable, Proxied, Receiver};
pub use config::{LogConfig, OpenMode, SyncMode};
pub use error::{OperationError, Result, SpoolError};
pub use log::{open_log, Log, SegmentInfo};
pub use tailer::Tailer;
pub use types::{Position, SegmentId};
pub use wire::{Document, Payload, Value};

#[cfg(test)]
pub mod tests;
