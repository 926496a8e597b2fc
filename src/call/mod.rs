// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Method calls recorded into a log and replayed onto a receiver.
//!
//! A call record is a document `{method: <text>, args: [<values>...]}`.
//! Fields are looked up by name, so writers may add fields that older
//! readers ignore.

pub mod dispatch;
pub mod proxy;

use crate::error::{Result, SpoolError};
use crate::wire::{Document, Value};

pub use dispatch::{dispatch_one, CallFailure, Dispatcher, MethodReader, MethodTable, Receiver};
pub use proxy::{make_call_proxy, CallWriter, Proxied};

pub const METHOD_FIELD: &str = "method";
pub const ARGS_FIELD: &str = "args";

/// Builds an argument list: `args!["INSERT ...", "name", 5i64]`.
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::wire::Value::from($arg)),*]
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub method: String,
    pub args: Vec<Value>,
}

impl CallRecord {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    pub fn to_document(&self) -> Document {
        Document::new()
            .with(METHOD_FIELD, self.method.as_str())
            .with(ARGS_FIELD, self.args.clone())
    }

    /// Reads a call out of the document stored at `index`.
    pub fn from_document(index: u64, mut doc: Document) -> Result<Self> {
        let method = match doc.remove(METHOD_FIELD) {
            Some(Value::Text(method)) => method,
            Some(other) => {
                return Err(SpoolError::ProtocolMismatch {
                    index,
                    reason: format!("method name is {}, not text", other.kind_name()),
                })
            }
            None => {
                return Err(SpoolError::ProtocolMismatch {
                    index,
                    reason: "record has no method field".into(),
                })
            }
        };
        let args = match doc.remove(ARGS_FIELD) {
            Some(Value::Sequence(args)) => args,
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(SpoolError::ProtocolMismatch {
                    index,
                    reason: format!("arguments of {} are {}, not a sequence", method, other.kind_name()),
                })
            }
        };
        Ok(Self { method, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_record_document_shape() {
        let call = CallRecord::new("update", args!["INSERT", "name", 5i64]);
        let doc = call.to_document();
        assert_eq!(doc.get_text(METHOD_FIELD), Some("update"));
        assert_eq!(doc.get_sequence(ARGS_FIELD).map(<[Value]>::len), Some(3));
        assert_eq!(CallRecord::from_document(0, doc).unwrap(), call);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let doc = Document::new()
            .with("trace", "abc")
            .with(METHOD_FIELD, "ping")
            .with("version", 2i64);
        let call = CallRecord::from_document(3, doc).unwrap();
        assert_eq!(call.method, "ping");
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_missing_method_is_protocol_mismatch() {
        let doc = Document::new().with(ARGS_FIELD, Vec::<Value>::new());
        assert!(matches!(
            CallRecord::from_document(7, doc),
            Err(SpoolError::ProtocolMismatch { index: 7, .. })
        ));
    }
}
