// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Writing side of the call protocol.

use crate::appender::Appender;
use crate::call::CallRecord;
use crate::error::Result;
use crate::wire::Value;

/// Encodes calls and appends them, one record per call.
pub struct CallWriter {
    appender: Appender,
}

impl CallWriter {
    pub fn new(appender: Appender) -> Self {
        Self { appender }
    }

    /// Records `method(args...)` and returns the index it was written at.
    pub fn call(&mut self, method: &str, args: Vec<Value>) -> Result<u64> {
        let record = CallRecord::new(method, args);
        let index = self.appender.append_document(&record.to_document())?;
        tracing::trace!("Recorded call {} at index {}", method, index);
        Ok(index)
    }

    pub fn appender(&self) -> &Appender {
        &self.appender
    }

    pub fn appender_mut(&mut self) -> &mut Appender {
        &mut self.appender
    }

    pub fn into_appender(self) -> Appender {
        self.appender
    }
}

/// An interface whose calls can be recorded. Implementors are thin structs
/// holding a [`CallWriter`]; each method turns its arguments into values
/// and calls [`CallWriter::call`].
pub trait Proxied: Sized {
    fn from_writer(writer: CallWriter) -> Self;
}

/// Wraps `appender` in the recording proxy `I`.
pub fn make_call_proxy<I: Proxied>(appender: Appender) -> I {
    I::from_writer(CallWriter::new(appender))
}
