// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Self-describing record codec.
//!
//! A record payload starts with a kind byte:
//! ```text
//! 0x01 document  [field count: u32] ([name len: u16][name][tag: u8][value])*
//! 0x02 text      raw UTF-8 until the end of the frame
//! 0x03 bytes     raw bytes until the end of the frame
//! ```
//! The frame length itself lives in the segment, not in the payload.

pub mod decode;
pub mod encode;
mod render;
pub mod value;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use decode::{decode_document, decode_payload, decode_text, peek_kind};
pub use encode::{encode_bytes, encode_document, encode_text};
pub use value::{Document, FromValue, Value, ValueMismatch};

/// Value type tags.
pub mod tag {
    pub const NULL: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const INT: u8 = 0x02;
    pub const FLOAT: u8 = 0x03;
    pub const TEXT: u8 = 0x04;
    pub const BYTES: u8 = 0x05;
    pub const DOCUMENT: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x07;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    Document = 0x01,
    Text = 0x02,
    Bytes = 0x03,
}

impl PayloadKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(PayloadKind::Document),
            0x02 => Some(PayloadKind::Text),
            0x03 => Some(PayloadKind::Bytes),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PayloadKind::Document => "document",
            PayloadKind::Text => "text",
            PayloadKind::Bytes => "bytes",
        }
    }
}

/// Decoded content of one record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Document(Document),
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Document(_) => PayloadKind::Document,
            Payload::Text(_) => PayloadKind::Text,
            Payload::Bytes(_) => PayloadKind::Bytes,
        }
    }

    /// Appends the encoded payload to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> WireResult<()> {
        match self {
            Payload::Document(doc) => encode_document(doc, out)?,
            Payload::Text(text) => encode_text(text, out),
            Payload::Bytes(bytes) => encode_bytes(bytes, out),
        }
        Ok(())
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Payload::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            Payload::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<Document> for Payload {
    fn from(doc: Document) -> Self {
        Payload::Document(doc)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("payload truncated")]
    Truncated,
    #[error("unknown payload kind 0x{0:02x}")]
    UnknownKind(u8),
    #[error("unknown value tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("expected a {} payload, found {}", .expected.name(), .found.name())]
    WrongKind {
        expected: PayloadKind,
        found: PayloadKind,
    },
    #[error("invalid UTF-8")]
    InvalidUtf8,
    #[error("invalid bool byte {0}")]
    InvalidBool(u8),
    #[error("duplicate field {0:?}")]
    DuplicateField(String),
    #[error("{0} trailing bytes after document")]
    TrailingBytes(usize),
    #[error("nesting deeper than {}", crate::config::MAX_NESTING_DEPTH)]
    TooDeep,
    #[error("field name of {0} bytes is too long")]
    NameTooLong(usize),
    #[error("value of {0} bytes is too long")]
    TooLong(usize),
}

pub type WireResult<T> = std::result::Result<T, WireError>;
