// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Record decoding.

use byteorder::{ByteOrder, LittleEndian};

use super::value::{Document, Value};
use super::{tag, Payload, PayloadKind, WireError, WireResult};
use crate::config::MAX_NESTING_DEPTH;

fn take<'a>(buf: &'a [u8], offset: &mut usize, len: usize) -> WireResult<&'a [u8]> {
    let end = offset.checked_add(len).ok_or(WireError::Truncated)?;
    if end > buf.len() {
        return Err(WireError::Truncated);
    }
    let bytes = &buf[*offset..end];
    *offset = end;
    Ok(bytes)
}

fn read_u8(buf: &[u8], offset: &mut usize) -> WireResult<u8> {
    Ok(take(buf, offset, 1)?[0])
}

fn read_u16(buf: &[u8], offset: &mut usize) -> WireResult<u16> {
    Ok(LittleEndian::read_u16(take(buf, offset, 2)?))
}

fn read_u32(buf: &[u8], offset: &mut usize) -> WireResult<u32> {
    Ok(LittleEndian::read_u32(take(buf, offset, 4)?))
}

fn read_u64(buf: &[u8], offset: &mut usize) -> WireResult<u64> {
    Ok(LittleEndian::read_u64(take(buf, offset, 8)?))
}

fn read_str<'a>(buf: &'a [u8], offset: &mut usize, len: usize) -> WireResult<&'a str> {
    std::str::from_utf8(take(buf, offset, len)?).map_err(|_| WireError::InvalidUtf8)
}

/// Kind of the payload without decoding its body.
pub fn peek_kind(payload: &[u8]) -> WireResult<PayloadKind> {
    let first = *payload.first().ok_or(WireError::Truncated)?;
    PayloadKind::from_u8(first).ok_or(WireError::UnknownKind(first))
}

/// Decodes a complete payload as written by [`super::encode`].
pub fn decode_payload(payload: &[u8]) -> WireResult<Payload> {
    match peek_kind(payload)? {
        PayloadKind::Document => decode_document(payload).map(Payload::Document),
        PayloadKind::Text => decode_text(payload).map(|t| Payload::Text(t.to_owned())),
        PayloadKind::Bytes => Ok(Payload::Bytes(payload[1..].to_vec())),
    }
}

pub fn decode_document(payload: &[u8]) -> WireResult<Document> {
    let kind = peek_kind(payload)?;
    if kind != PayloadKind::Document {
        return Err(WireError::WrongKind {
            expected: PayloadKind::Document,
            found: kind,
        });
    }
    let mut offset = 1;
    let doc = read_document_body(payload, &mut offset, 0)?;
    if offset != payload.len() {
        return Err(WireError::TrailingBytes(payload.len() - offset));
    }
    Ok(doc)
}

/// Borrows the text of a text payload.
pub fn decode_text(payload: &[u8]) -> WireResult<&str> {
    let kind = peek_kind(payload)?;
    if kind != PayloadKind::Text {
        return Err(WireError::WrongKind {
            expected: PayloadKind::Text,
            found: kind,
        });
    }
    std::str::from_utf8(&payload[1..]).map_err(|_| WireError::InvalidUtf8)
}

fn read_document_body(buf: &[u8], offset: &mut usize, depth: usize) -> WireResult<Document> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(WireError::TooDeep);
    }
    let count = read_u32(buf, offset)? as usize;
    // every field needs at least a name length and a tag
    if count > (buf.len() - *offset) / 3 {
        return Err(WireError::Truncated);
    }
    let mut doc = Document::new();
    for _ in 0..count {
        let name_len = read_u16(buf, offset)? as usize;
        let name = read_str(buf, offset, name_len)?;
        if doc.contains(name) {
            return Err(WireError::DuplicateField(name.to_owned()));
        }
        let value = read_value(buf, offset, depth)?;
        doc.push_unchecked(name.to_owned(), value);
    }
    Ok(doc)
}

fn read_value(buf: &[u8], offset: &mut usize, depth: usize) -> WireResult<Value> {
    let t = read_u8(buf, offset)?;
    let value = match t {
        tag::NULL => Value::Null,
        tag::BOOL => match read_u8(buf, offset)? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(WireError::InvalidBool(other)),
        },
        tag::INT => Value::Int(read_u64(buf, offset)? as i64),
        tag::FLOAT => Value::Float(f64::from_bits(read_u64(buf, offset)?)),
        tag::TEXT => {
            let len = read_u32(buf, offset)? as usize;
            Value::Text(read_str(buf, offset, len)?.to_owned())
        }
        tag::BYTES => {
            let len = read_u32(buf, offset)? as usize;
            Value::Bytes(take(buf, offset, len)?.to_vec())
        }
        tag::DOCUMENT => Value::Document(read_document_body(buf, offset, depth + 1)?),
        tag::SEQUENCE => {
            if depth + 1 >= MAX_NESTING_DEPTH {
                return Err(WireError::TooDeep);
            }
            let count = read_u32(buf, offset)? as usize;
            if count > buf.len() - *offset {
                return Err(WireError::Truncated);
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_value(buf, offset, depth + 1)?);
            }
            Value::Sequence(items)
        }
        other => return Err(WireError::UnknownTag(other)),
    };
    Ok(value)
}
