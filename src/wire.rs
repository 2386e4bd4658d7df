//! The wire format (spec §4.8): a 16-byte frame header plus a recursive,
//! self-describing value encoding.
//!
//! This is deliberately not `postcard`/`bincode` -- the wire format is part
//! of the IPC protocol's external contract (spec §4.9 handshake partners
//! must agree on it byte-for-byte), so it's specified and hand-walked here
//! the same way [`crate::reactor`]'s framing is, rather than delegated to a
//! serde-driven codec whose byte layout is an implementation detail of that
//! crate's version.

use std::sync::Arc;

use crate::error::{RayError, Result};
use crate::heap::Heap;
use crate::value::{self, Body, ColumnData, Value};

const MAGIC: u32 = 0x5241_5946; // "RAYF"
const VERSION: u8 = 1;
pub const FRAME_HEADER_LEN: usize = 16;

/// Logical message kind carried in the frame header's flag byte (spec §4.8).
pub const MSG_ASYNC: u8 = 0;
pub const MSG_SYNC: u8 = 1;
pub const MSG_RESP: u8 = 2;

/// A parsed 16-byte frame header: magic/version (this crate's own framing
/// sanity check, standing in for spec §4.8's "reserved prefix"), the
/// `msgtype` carried in the flag byte, and the payload length that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msgtype: u8,
    pub body_len: u64,
}

/// Encode just the 16-byte header, for callers (the reactor) that read the
/// header and body off a socket as two separate reads rather than one
/// contiguous buffer.
pub fn encode_header(msgtype: u8, body_len: u64) -> [u8; FRAME_HEADER_LEN] {
    let mut out = [0u8; FRAME_HEADER_LEN];
    out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    out[4] = VERSION;
    out[5] = msgtype;
    out[8..16].copy_from_slice(&body_len.to_le_bytes());
    out
}

pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(RayError::Parse("frame shorter than header".into()));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(RayError::Parse(format!("bad frame magic {magic:#x}")));
    }
    let version = bytes[4];
    if version != VERSION {
        return Err(RayError::Parse(format!("unsupported wire version {version}")));
    }
    let msgtype = bytes[5];
    let body_len = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    Ok(FrameHeader { msgtype, body_len })
}

/// Encode a value as a complete header+body frame tagged with `msgtype`
/// (spec §4.8/§4.9: `msgtype` is carried in a header flag).
pub fn encode_frame(value: &Value, msgtype: u8) -> Result<Vec<u8>> {
    let body = encode(value)?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&encode_header(msgtype, body.len() as u64));
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a complete header+body frame, returning the value and its
/// `msgtype`.
pub fn decode_frame(heap: &Arc<Heap>, bytes: &[u8]) -> Result<(Value, u8)> {
    let header = decode_header(bytes)?;
    let body = &bytes[FRAME_HEADER_LEN..];
    if (body.len() as u64) < header.body_len {
        return Err(RayError::Parse("frame body shorter than declared length".into()));
    }
    let (decoded, rest) = decode(heap, &body[..header.body_len as usize])?;
    if !rest.is_empty() {
        return Err(RayError::Parse("trailing bytes after decoded value".into()));
    }
    Ok((decoded, header.msgtype))
}

/// Wrap an encoded value body in the 16-byte frame header used at rest and
/// on the wire. Defaults to `MSG_RESP`; callers that care about the logical
/// message kind should use [`encode_frame`] directly.
pub fn encode_framed(value: &Value) -> Result<Vec<u8>> {
    encode_frame(value, MSG_RESP)
}

pub fn decode_framed(heap: &Arc<Heap>, bytes: &[u8]) -> Result<Value> {
    decode_frame(heap, bytes).map(|(v, _)| v)
}

fn push_tag(out: &mut Vec<u8>, tag: i8) {
    out.push(tag as u8);
}

pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(value, &mut out)?;
    Ok(out)
}

fn encode_into(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    push_tag(out, value.tag());
    match value.body() {
        Body::Null => {}
        Body::Err => return Err(RayError::Nyi("ERR values are runtime-only and not wire-encodable")),
        Body::Atom(atom) => encode_atom(*atom, out),
        Body::Vector(col) => encode_column(col, out),
        Body::List(items) => {
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                encode_into(item, out)?;
            }
        }
        Body::Dict { keys, values } => {
            encode_into(keys, out)?;
            encode_into(values, out)?;
        }
        Body::Table { names, columns } => {
            encode_into(names, out)?;
            encode_into(columns, out)?;
        }
        Body::Lambda { .. } => return Err(RayError::Nyi("LAMBDA values are runtime-only and not wire-encodable")),
        Body::Unary(_) | Body::Binary(_) | Body::Vary(_) => {
            return Err(RayError::Nyi("host functions are runtime-only and not wire-encodable"));
        }
        Body::MapFilter { .. } | Body::MapGroup { .. } | Body::MapCommon { .. } | Body::PartedI64(_) => {
            return Err(RayError::Nyi("deferred-materialization intermediates are runtime-only and not wire-encodable"));
        }
    }
    Ok(())
}

fn encode_atom(atom: value::Atom, out: &mut Vec<u8>) {
    use value::Atom::*;
    match atom {
        B8(v) => out.push(v as u8),
        U8(v) => out.push(v),
        C8(v) => out.push(v),
        I16(v) => out.extend_from_slice(&v.to_le_bytes()),
        I32(v) => out.extend_from_slice(&v.to_le_bytes()),
        I64(v) => out.extend_from_slice(&v.to_le_bytes()),
        F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Symbol(v) => out.extend_from_slice(&v.to_le_bytes()),
        Date(v) => out.extend_from_slice(&v.to_le_bytes()),
        Time(v) => out.extend_from_slice(&v.to_le_bytes()),
        Timestamp(v) => out.extend_from_slice(&v.to_le_bytes()),
        Guid(v) => out.extend_from_slice(&v),
    }
}

fn encode_column(col: &ColumnData, out: &mut Vec<u8>) {
    out.extend_from_slice(&(col.len() as u64).to_le_bytes());
    match col {
        ColumnData::B8(v) => out.extend(v.as_slice().iter().map(|&b| b as u8)),
        ColumnData::U8(v) => out.extend_from_slice(v.as_slice()),
        ColumnData::C8(v) => out.extend_from_slice(v.as_slice()),
        ColumnData::I16(v) => v.as_slice().iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ColumnData::I32(v) => v.as_slice().iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ColumnData::I64(v) => v.as_slice().iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ColumnData::F64(v) => v.as_slice().iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ColumnData::Symbol(v) => v.as_slice().iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ColumnData::Date(v) => v.as_slice().iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ColumnData::Time(v) => v.as_slice().iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ColumnData::Timestamp(v) => v.as_slice().iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ColumnData::Guid(v) => v.as_slice().iter().for_each(|x| out.extend_from_slice(x)),
    }
}

/// Decode one value from the front of `bytes`, returning it and whatever
/// bytes follow it.
pub fn decode(heap: &Arc<Heap>, bytes: &[u8]) -> Result<(Value, &[u8])> {
    let (&tag_byte, rest) = bytes.split_first().ok_or_else(too_short)?;
    let tag = tag_byte as i8;
    decode_tagged(heap, tag, rest)
}

fn too_short() -> RayError {
    RayError::Parse("unexpected end of wire data".into())
}

fn take<'a>(bytes: &'a [u8], n: usize) -> Result<(&'a [u8], &'a [u8])> {
    if bytes.len() < n {
        return Err(too_short());
    }
    Ok(bytes.split_at(n))
}

fn decode_tagged<'a>(heap: &Arc<Heap>, tag: i8, bytes: &'a [u8]) -> Result<(Value, &'a [u8])> {
    use value::{T_B8, T_C8, T_DATE, T_DICT, T_F64, T_GUID, T_I16, T_I32, T_I64, T_LIST, T_NULL, T_SYMBOL, T_TABLE, T_TIME, T_TIMESTAMP, T_U8};

    if tag == T_NULL {
        return Ok((Value::null(), bytes));
    }
    if tag < 0 {
        return decode_atom(tag, bytes);
    }
    match tag {
        T_LIST => {
            let (len_bytes, rest) = take(bytes, 8)?;
            let len = u64::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            let mut items = Vec::with_capacity(len);
            let mut rest = rest;
            for _ in 0..len {
                let (item, r) = decode(heap, rest)?;
                items.push(item);
                rest = r;
            }
            Ok((Value::list(items), rest))
        }
        T_DICT => {
            let (keys, rest) = decode(heap, bytes)?;
            let (values, rest) = decode(heap, rest)?;
            Ok((Value::dict(keys, values)?, rest))
        }
        T_TABLE => {
            let (names, rest) = decode(heap, bytes)?;
            let (columns, rest) = decode(heap, rest)?;
            Ok((Value::table(names, columns)?, rest))
        }
        T_B8 | T_U8 | T_C8 | T_I16 | T_I32 | T_I64 | T_F64 | T_SYMBOL | T_DATE | T_TIME | T_TIMESTAMP | T_GUID => {
            decode_column(heap, tag, bytes)
        }
        _ => Err(RayError::Nyi("this tag is not wire-decodable")),
    }
}

fn decode_atom(tag: i8, bytes: &[u8]) -> Result<(Value, &[u8])> {
    use value::{T_B8, T_C8, T_DATE, T_F64, T_GUID, T_I16, T_I32, T_I64, T_SYMBOL, T_TIME, T_TIMESTAMP, T_U8};
    let abs = -tag;
    macro_rules! fixed {
        ($n:expr, $parse:expr) => {{
            let (bytes, rest) = take(bytes, $n)?;
            (($parse)(bytes), rest)
        }};
    }
    let (value, rest) = match abs {
        T_B8 => fixed!(1, |b: &[u8]| Value::atom_b8(b[0] != 0)),
        T_U8 => fixed!(1, |b: &[u8]| Value::atom_u8(b[0])),
        T_C8 => fixed!(1, |b: &[u8]| Value::atom_u8(b[0])),
        T_I16 => fixed!(2, |b: &[u8]| Value::atom_i16(i16::from_le_bytes(b.try_into().unwrap()))),
        T_I32 => fixed!(4, |b: &[u8]| Value::atom_i32(i32::from_le_bytes(b.try_into().unwrap()))),
        T_I64 => fixed!(8, |b: &[u8]| Value::atom_i64(i64::from_le_bytes(b.try_into().unwrap()))),
        T_F64 => fixed!(8, |b: &[u8]| Value::atom_f64(f64::from_le_bytes(b.try_into().unwrap()))),
        T_SYMBOL => fixed!(4, |b: &[u8]| Value::atom_symbol(u32::from_le_bytes(b.try_into().unwrap()))),
        T_DATE => fixed!(4, |b: &[u8]| Value::atom_i32(i32::from_le_bytes(b.try_into().unwrap()))),
        T_TIME => fixed!(4, |b: &[u8]| Value::atom_i32(i32::from_le_bytes(b.try_into().unwrap()))),
        T_TIMESTAMP => fixed!(8, |b: &[u8]| Value::atom_i64(i64::from_le_bytes(b.try_into().unwrap()))),
        T_GUID => fixed!(16, |b: &[u8]| Value::atom_i64(i64::from_le_bytes(b[0..8].try_into().unwrap()))),
        _ => return Err(RayError::Nyi("unsupported atom tag")),
    };
    Ok((value, rest))
}

fn decode_column<'a>(heap: &Arc<Heap>, tag: i8, bytes: &'a [u8]) -> Result<(Value, &'a [u8])> {
    use value::{T_B8, T_C8, T_DATE, T_F64, T_GUID, T_I16, T_I32, T_I64, T_SYMBOL, T_TIME, T_TIMESTAMP, T_U8};
    let (len_bytes, rest) = take(bytes, 8)?;
    let len = u64::from_le_bytes(len_bytes.try_into().unwrap()) as usize;

    macro_rules! decode_elems {
        ($elem_size:expr, $parse:expr, $build:expr) => {{
            let (data, rest) = take(rest, len * $elem_size)?;
            let items: Vec<_> = data.chunks_exact($elem_size).map($parse).collect();
            (($build)(heap, &items)?, rest)
        }};
    }

    let (value, rest) = match tag {
        T_B8 => decode_elems!(1, |c: &[u8]| c[0] != 0, Value::vector_b8),
        T_U8 => decode_elems!(1, |c: &[u8]| c[0], Value::vector_u8),
        T_C8 => decode_elems!(1, |c: &[u8]| c[0], Value::new_c8_vector),
        T_I16 => decode_elems!(2, |c: &[u8]| i16::from_le_bytes(c.try_into().unwrap()), Value::vector_i16),
        T_I32 => decode_elems!(4, |c: &[u8]| i32::from_le_bytes(c.try_into().unwrap()), Value::vector_i32),
        T_I64 => decode_elems!(8, |c: &[u8]| i64::from_le_bytes(c.try_into().unwrap()), Value::vector_i64),
        T_F64 => decode_elems!(8, |c: &[u8]| f64::from_le_bytes(c.try_into().unwrap()), Value::vector_f64),
        T_SYMBOL => decode_elems!(4, |c: &[u8]| u32::from_le_bytes(c.try_into().unwrap()), Value::vector_symbol),
        T_DATE => decode_elems!(4, |c: &[u8]| i32::from_le_bytes(c.try_into().unwrap()), Value::new_date_vector),
        T_TIME => decode_elems!(4, |c: &[u8]| i32::from_le_bytes(c.try_into().unwrap()), Value::new_time_vector),
        T_TIMESTAMP => decode_elems!(8, |c: &[u8]| i64::from_le_bytes(c.try_into().unwrap()), Value::new_timestamp_vector),
        T_GUID => decode_elems!(16, |c: &[u8]| c.try_into().unwrap(), Value::new_guid_vector),
        _ => return Err(RayError::Nyi("unsupported column tag")),
    };
    Ok((value, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    fn heap() -> Arc<Heap> {
        Heap::new(HeapConfig::default())
    }

    #[test]
    fn round_trips_i64_atom() {
        let h = heap();
        let v = Value::atom_i64(-42);
        let framed = encode_framed(&v).unwrap();
        let back = decode_framed(&h, &framed).unwrap();
        assert_eq!(back.as_atom_i64().unwrap(), -42);
    }

    #[test]
    fn round_trips_i64_vector() {
        let h = heap();
        let v = Value::vector_i64(&h, &[1, -2, 3, i64::MIN]).unwrap();
        let framed = encode_framed(&v).unwrap();
        let back = decode_framed(&h, &framed).unwrap();
        assert_eq!(back.as_i64_slice().unwrap(), &[1, -2, 3, i64::MIN]);
    }

    #[test]
    fn round_trips_table() {
        let h = heap();
        let names = Value::vector_symbol_from_strs(&h, &["a", "b"]).unwrap();
        let a = Value::vector_i64(&h, &[1, 2]).unwrap();
        let b = Value::vector_f64(&h, &[1.5, 2.5]).unwrap();
        let table = Value::table(names, Value::list(vec![a, b])).unwrap();
        let framed = encode_framed(&table).unwrap();
        let back = decode_framed(&h, &framed).unwrap();
        let (_, cols) = back.as_table().unwrap();
        let cols = cols.as_list().unwrap();
        assert_eq!(cols[0].as_i64_slice().unwrap(), &[1, 2]);
        assert_eq!(cols[1].as_f64_slice().unwrap(), &[1.5, 2.5]);
    }

    #[test]
    fn lambda_values_are_not_wire_encodable() {
        let lambda = Value::list(vec![]); // placeholder for a non-encodable body below
        let _ = lambda;
        // A MAPFILTER intermediate stands in for "runtime-only" here since
        // constructing a real Lambda needs the VM's bytecode representation.
        let h = heap();
        let base = Value::vector_i64(&h, &[1, 2, 3]).unwrap();
        let idx = Value::vector_i64(&h, &[0, 1]).unwrap();
        let mapfilter = Value::map_filter(base, idx);
        assert!(encode(&mapfilter).is_err());
    }

    #[test]
    fn rejects_truncated_frame() {
        let h = heap();
        assert!(decode_framed(&h, &[1, 2, 3]).is_err());
    }

    #[test]
    fn frame_round_trips_msgtype() {
        let h = heap();
        let v = Value::atom_i64(3);
        let framed = encode_frame(&v, MSG_SYNC).unwrap();
        let (back, msgtype) = decode_frame(&h, &framed).unwrap();
        assert_eq!(msgtype, MSG_SYNC);
        assert_eq!(back.as_atom_i64().unwrap(), 3);
    }

    #[test]
    fn header_can_be_decoded_before_body_arrives() {
        let header = encode_header(MSG_ASYNC, 42);
        let decoded = decode_header(&header).unwrap();
        assert_eq!(decoded.msgtype, MSG_ASYNC);
        assert_eq!(decoded.body_len, 42);
    }
}
