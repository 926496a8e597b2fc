// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Record encoding.

use byteorder::{ByteOrder, LittleEndian};

use super::value::{Document, Value};
use super::{tag, PayloadKind, WireError, WireResult};
use crate::config::MAX_NESTING_DEPTH;

fn write_u8(out: &mut Vec<u8>, val: u8) {
    out.push(val);
}

fn write_u16(out: &mut Vec<u8>, val: u16) {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, val);
    out.extend_from_slice(&buf);
}

fn write_u32(out: &mut Vec<u8>, val: u32) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, val);
    out.extend_from_slice(&buf);
}

fn write_i64(out: &mut Vec<u8>, val: i64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_i64(&mut buf, val);
    out.extend_from_slice(&buf);
}

fn write_f64(out: &mut Vec<u8>, val: f64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, val.to_bits());
    out.extend_from_slice(&buf);
}

fn write_len(out: &mut Vec<u8>, len: usize) -> WireResult<()> {
    let len = u32::try_from(len).map_err(|_| WireError::TooLong(len))?;
    write_u32(out, len);
    Ok(())
}

/// Appends a document payload (kind byte included) to `out`.
pub fn encode_document(doc: &Document, out: &mut Vec<u8>) -> WireResult<()> {
    write_u8(out, PayloadKind::Document as u8);
    write_document_body(doc, out, 0)
}

/// Appends a text payload to `out`.
pub fn encode_text(text: &str, out: &mut Vec<u8>) {
    write_u8(out, PayloadKind::Text as u8);
    out.extend_from_slice(text.as_bytes());
}

/// Appends an opaque byte payload to `out`.
pub fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    write_u8(out, PayloadKind::Bytes as u8);
    out.extend_from_slice(bytes);
}

fn write_document_body(doc: &Document, out: &mut Vec<u8>, depth: usize) -> WireResult<()> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(WireError::TooDeep);
    }
    write_len(out, doc.len())?;
    for (name, value) in doc.fields() {
        let name_len = u16::try_from(name.len()).map_err(|_| WireError::NameTooLong(name.len()))?;
        write_u16(out, name_len);
        out.extend_from_slice(name.as_bytes());
        write_value(value, out, depth)?;
    }
    Ok(())
}

fn write_value(value: &Value, out: &mut Vec<u8>, depth: usize) -> WireResult<()> {
    match value {
        Value::Null => write_u8(out, tag::NULL),
        Value::Bool(v) => {
            write_u8(out, tag::BOOL);
            write_u8(out, u8::from(*v));
        }
        Value::Int(v) => {
            write_u8(out, tag::INT);
            write_i64(out, *v);
        }
        Value::Float(v) => {
            write_u8(out, tag::FLOAT);
            write_f64(out, *v);
        }
        Value::Text(v) => {
            write_u8(out, tag::TEXT);
            write_len(out, v.len())?;
            out.extend_from_slice(v.as_bytes());
        }
        Value::Bytes(v) => {
            write_u8(out, tag::BYTES);
            write_len(out, v.len())?;
            out.extend_from_slice(v);
        }
        Value::Document(v) => {
            write_u8(out, tag::DOCUMENT);
            write_document_body(v, out, depth + 1)?;
        }
        Value::Sequence(items) => {
            if depth + 1 >= MAX_NESTING_DEPTH {
                return Err(WireError::TooDeep);
            }
            write_u8(out, tag::SEQUENCE);
            write_len(out, items.len())?;
            for item in items {
                write_value(item, out, depth + 1)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_layout() {
        let doc = Document::new().with("n", 7i64);
        let mut out = Vec::new();
        encode_document(&doc, &mut out).unwrap();

        let mut expected = vec![PayloadKind::Document as u8];
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&1u16.to_le_bytes());
        expected.push(b'n');
        expected.push(tag::INT);
        expected.extend_from_slice(&7i64.to_le_bytes());
        assert_eq!(out, expected);
    }

    #[test]
    fn test_scalar_layout_is_little_endian() {
        let doc = Document::new().with("f", -1.5f64).with("i", -2i64);
        let mut out = Vec::new();
        encode_document(&doc, &mut out).unwrap();

        // kind, count, then "f": name len, name, tag, bits
        let float_at = 1 + 4 + 2 + 1 + 1;
        assert_eq!(out[float_at - 1], tag::FLOAT);
        assert_eq!(&out[float_at..float_at + 8], &(-1.5f64).to_bits().to_le_bytes()[..]);
        let int_at = float_at + 8 + 2 + 1 + 1;
        assert_eq!(out[int_at - 1], tag::INT);
        assert_eq!(&out[int_at..int_at + 8], &[0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff][..]);
        assert_eq!(out.len(), int_at + 8);
    }

    #[test]
    fn test_text_payload_is_raw_utf8() {
        let mut out = Vec::new();
        encode_text("TestMessage", &mut out);
        assert_eq!(out[0], PayloadKind::Text as u8);
        assert_eq!(&out[1..], b"TestMessage");
    }

    #[test]
    fn test_rejects_excessive_nesting() {
        let mut doc = Document::new().with("leaf", 1i64);
        for _ in 0..MAX_NESTING_DEPTH {
            doc = Document::new().with("inner", doc);
        }
        let mut out = Vec::new();
        assert_eq!(encode_document(&doc, &mut out), Err(WireError::TooDeep));
    }
}
