// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Compact flow-style text rendering, used by log dumps.

use std::fmt::{self, Display, Write};

use super::value::{Document, Value};
use super::Payload;

fn needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text.trim() != text
        || matches!(text, "null" | "true" | "false" | "~")
        || text.parse::<f64>().is_ok()
        || text
            .chars()
            .any(|c| matches!(c, ',' | ':' | '{' | '}' | '[' | ']' | '"' | '\'' | '#' | '!') || c.is_control())
}

fn write_text(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    if needs_quotes(text) {
        write!(f, "{:?}", text)
    } else {
        f.write_str(text)
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("!!binary ")?;
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Text(v) => write_text(f, v),
            Value::Bytes(v) => write_hex(f, v),
            Value::Document(v) => Display::fmt(v, f),
            Value::Sequence(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    Display::fmt(item, f)?;
                }
                f.write_char(']')
            }
        }
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('{')?;
        for (i, (name, value)) in self.fields().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_text(f, name)?;
            f.write_str(": ")?;
            Display::fmt(value, f)?;
        }
        f.write_char('}')
    }
}

impl Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Document(doc) => Display::fmt(doc, f),
            Payload::Text(text) => write_text(f, text),
            Payload::Bytes(bytes) => write_hex(f, bytes),
        }
    }
}
