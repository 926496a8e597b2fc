// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Reading side of the call protocol.
//!
//! A [`MethodTable`] maps method names to typed handlers. Argument
//! extraction happens before the handler runs, so a record whose shape does
//! not match is a [`SpoolError::ProtocolMismatch`] and the receiver never
//! sees it. Errors raised by the handler itself go to the failure callback
//! and the stream continues.

use std::fmt;
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::call::CallRecord;
use crate::error::{OperationError, Result, SpoolError};
use crate::tailer::Tailer;
use crate::wire::{decode_document, peek_kind, FromValue, PayloadKind, Value};

/// What a handler returns.
pub type OpResult = std::result::Result<(), OperationError>;

/// Outer `Err` is an argument mismatch, inner is the operation's own result.
type Invoke<R> = Box<dyn Fn(&mut R, &[Value]) -> std::result::Result<OpResult, String> + Send + Sync>;

fn check_arity(args: &[Value], expected: usize) -> std::result::Result<(), String> {
    if args.len() != expected {
        return Err(format!("expected {} arguments, got {}", expected, args.len()));
    }
    Ok(())
}

fn arg<A: FromValue>(args: &[Value], position: usize) -> std::result::Result<A, String> {
    A::from_value(&args[position]).map_err(|e| format!("argument {}: {}", position, e))
}

/// Name -> handler table for receiver type `R`.
pub struct MethodTable<R> {
    handlers: FxHashMap<String, Invoke<R>>,
}

impl<R: 'static> Default for MethodTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: 'static> MethodTable<R> {
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    fn insert(mut self, name: &str, invoke: Invoke<R>) -> Self {
        self.handlers.insert(name.to_owned(), invoke);
        self
    }

    pub fn method0<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&mut R) -> OpResult + Send + Sync + 'static,
    {
        self.insert(
            name,
            Box::new(move |r, args| {
                check_arity(args, 0)?;
                Ok(f(r))
            }),
        )
    }

    pub fn method1<A, F>(self, name: &str, f: F) -> Self
    where
        A: FromValue,
        F: Fn(&mut R, A) -> OpResult + Send + Sync + 'static,
    {
        self.insert(
            name,
            Box::new(move |r, args| {
                check_arity(args, 1)?;
                Ok(f(r, arg(args, 0)?))
            }),
        )
    }

    pub fn method2<A, B, F>(self, name: &str, f: F) -> Self
    where
        A: FromValue,
        B: FromValue,
        F: Fn(&mut R, A, B) -> OpResult + Send + Sync + 'static,
    {
        self.insert(
            name,
            Box::new(move |r, args| {
                check_arity(args, 2)?;
                Ok(f(r, arg(args, 0)?, arg(args, 1)?))
            }),
        )
    }

    pub fn method3<A, B, C, F>(self, name: &str, f: F) -> Self
    where
        A: FromValue,
        B: FromValue,
        C: FromValue,
        F: Fn(&mut R, A, B, C) -> OpResult + Send + Sync + 'static,
    {
        self.insert(
            name,
            Box::new(move |r, args| {
                check_arity(args, 3)?;
                Ok(f(r, arg(args, 0)?, arg(args, 1)?, arg(args, 2)?))
            }),
        )
    }

    /// Any number of untyped arguments.
    pub fn variadic<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&mut R, &[Value]) -> OpResult + Send + Sync + 'static,
    {
        self.insert(name, Box::new(move |r, args| Ok(f(r, args))))
    }

    /// One typed leading argument followed by any number of values, the
    /// shape of `update(statement, args...)`.
    pub fn method_rest<A, F>(self, name: &str, f: F) -> Self
    where
        A: FromValue,
        F: Fn(&mut R, A, &[Value]) -> OpResult + Send + Sync + 'static,
    {
        self.insert(
            name,
            Box::new(move |r, args| {
                if args.is_empty() {
                    return Err("expected at least 1 argument, got 0".to_owned());
                }
                Ok(f(r, arg(args, 0)?, &args[1..]))
            }),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// A type that can be the target of recorded calls.
pub trait Receiver: Sized + 'static {
    fn methods() -> MethodTable<Self>;
}

/// A call whose handler returned an error.
pub struct CallFailure {
    pub index: u64,
    pub method: String,
    pub args: Vec<Value>,
    pub error: OperationError,
}

impl fmt::Debug for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFailure")
            .field("index", &self.index)
            .field("method", &self.method)
            .field("args", &self.args)
            .field("error", &self.error.to_string())
            .finish()
    }
}

type FailureCallback = Box<dyn FnMut(CallFailure) + Send>;

fn log_failure(failure: CallFailure) {
    tracing::warn!(
        "Call {} at index {} failed: {}",
        failure.method,
        failure.index,
        failure.error
    );
}

/// Replays call records onto a receiver.
pub struct Dispatcher<R> {
    table: MethodTable<R>,
    on_failure: FailureCallback,
}

impl<R: Receiver> Default for Dispatcher<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Receiver> Dispatcher<R> {
    pub fn new() -> Self {
        Self::with_table(R::methods())
    }
}

impl<R: 'static> Dispatcher<R> {
    pub fn with_table(table: MethodTable<R>) -> Self {
        Self {
            table,
            on_failure: Box::new(log_failure),
        }
    }

    /// Replaces the failure callback. The default logs at `warn`.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: FnMut(CallFailure) + Send + 'static,
    {
        self.on_failure = Box::new(f);
        self
    }

    pub fn table(&self) -> &MethodTable<R> {
        &self.table
    }

    /// Reads at most one record and invokes it on `receiver`.
    ///
    /// Returns `Ok(false)` if there was nothing to read. A record that is not
    /// a valid call for this table is a `ProtocolMismatch`; the tailer has
    /// already moved past it.
    pub fn dispatch_one(&mut self, tailer: &mut Tailer, receiver: &mut R) -> Result<bool> {
        let read = tailer.read_with(|index, bytes| {
            let kind = peek_kind(bytes).map_err(|e| SpoolError::malformed(index, e.to_string()))?;
            if kind != PayloadKind::Document {
                return Ok((index, Err(kind)));
            }
            let doc = decode_document(bytes).map_err(|e| SpoolError::malformed(index, e.to_string()))?;
            Ok((index, Ok(doc)))
        })?;

        let Some((index, doc)) = read else {
            return Ok(false);
        };
        let doc = doc.map_err(|kind| SpoolError::ProtocolMismatch {
            index,
            reason: format!("expected a call document, found {}", kind.name()),
        })?;
        let call = CallRecord::from_document(index, doc)?;
        self.invoke(index, call, receiver)?;
        Ok(true)
    }

    /// Runs one decoded call.
    pub fn invoke(&mut self, index: u64, call: CallRecord, receiver: &mut R) -> Result<()> {
        let Some(handler) = self.table.handlers.get(&call.method) else {
            return Err(SpoolError::ProtocolMismatch {
                index,
                reason: format!("unknown method {}", call.method),
            });
        };

        let start = Instant::now();
        let outcome = handler(receiver, &call.args).map_err(|reason| SpoolError::ProtocolMismatch {
            index,
            reason: format!("{}: {}", call.method, reason),
        })?;
        metrics::histogram!("spool_dispatch_duration_seconds", start.elapsed().as_secs_f64());
        metrics::counter!("spool_calls_dispatched_total", 1);

        if let Err(error) = outcome {
            metrics::counter!("spool_call_failures_total", 1);
            (self.on_failure)(CallFailure {
                index,
                method: call.method,
                args: call.args,
                error,
            });
        }
        Ok(())
    }
}

/// Reads one record from `tailer` and invokes it on `receiver`.
///
/// Builds the method table for every call; loops should keep a
/// [`Dispatcher`] or a [`MethodReader`] instead.
pub fn dispatch_one<R: Receiver>(tailer: &mut Tailer, receiver: &mut R) -> Result<bool> {
    Dispatcher::<R>::new().dispatch_one(tailer, receiver)
}

/// A tailer, a receiver and its dispatcher bundled together.
pub struct MethodReader<R> {
    tailer: Tailer,
    receiver: R,
    dispatcher: Dispatcher<R>,
}

impl<R: Receiver> MethodReader<R> {
    pub fn new(tailer: Tailer, receiver: R) -> Self {
        Self::with_dispatcher(tailer, receiver, Dispatcher::new())
    }
}

impl<R: 'static> MethodReader<R> {
    pub fn with_dispatcher(tailer: Tailer, receiver: R, dispatcher: Dispatcher<R>) -> Self {
        Self {
            tailer,
            receiver,
            dispatcher,
        }
    }

    /// Dispatches the next call if there is one.
    pub fn read_one(&mut self) -> Result<bool> {
        self.dispatcher.dispatch_one(&mut self.tailer, &mut self.receiver)
    }

    pub fn receiver(&self) -> &R {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut R {
        &mut self.receiver
    }

    pub fn tailer(&self) -> &Tailer {
        &self.tailer
    }

    pub fn tailer_mut(&mut self) -> &mut Tailer {
        &mut self.tailer
    }

    pub fn into_parts(self) -> (Tailer, R) {
        (self.tailer, self.receiver)
    }
}
