//! Pack: the compact tagged binary encoding
//!
//! Wire layout is one tag byte followed by the payload:
//!
//! - `0x00` null, `0x01` false, `0x02` true
//! - `0x03` signed integer (zigzag LEB128)
//! - `0x04` unsigned integer (LEB128), used above `i64::MAX`
//! - `0x05` double (8 bytes, little-endian IEEE 754 bits)
//! - `0x06` string (LEB128 byte length + UTF-8 bytes)
//! - `0x07` array (LEB128 element count + elements)
//! - `0x08` object (LEB128 member count + string/value pairs)
//!
//! Integers always use the integer tags, so they round-trip exactly with no
//! float coercion. Successive top-level values may be concatenated on one
//! stream; [`decode_from`] consumes exactly one complete value per call and
//! leaves partial trailing data in the buffer.

use bytes::{Buf, BytesMut};
use serde_json::{Map, Number, Value};

use crate::error::{SanchayaError, SanchayaResult};

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_UINT: u8 = 0x04;
const TAG_DOUBLE: u8 = 0x05;
const TAG_STRING: u8 = 0x06;
const TAG_ARRAY: u8 = 0x07;
const TAG_OBJECT: u8 = 0x08;

// LEB128 for u64 never exceeds ten bytes; an eleventh continuation byte is
// malformed, not incomplete.
const MAX_VARINT_LEN: usize = 10;

/// Encode one value to Pack bytes.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    encode_value(value, &mut out);
    out
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Number(n) => encode_number(n, out),
        Value::String(s) => {
            out.push(TAG_STRING);
            write_uvarint(s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            write_uvarint(items.len() as u64, out);
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Object(members) => {
            out.push(TAG_OBJECT);
            write_uvarint(members.len() as u64, out);
            for (key, item) in members {
                write_uvarint(key.len() as u64, out);
                out.extend_from_slice(key.as_bytes());
                encode_value(item, out);
            }
        }
    }
}

fn encode_number(n: &Number, out: &mut Vec<u8>) {
    if let Some(i) = n.as_i64() {
        out.push(TAG_INT);
        write_ivarint(i, out);
    } else if let Some(u) = n.as_u64() {
        out.push(TAG_UINT);
        write_uvarint(u, out);
    } else {
        // as_f64 is total for serde_json numbers once the integer cases
        // are exhausted.
        out.push(TAG_DOUBLE);
        let f = n.as_f64().unwrap_or(0.0);
        out.extend_from_slice(&f.to_bits().to_le_bytes());
    }
}

fn write_uvarint(mut n: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_ivarint(n: i64, out: &mut Vec<u8>) {
    // zigzag: interleave negatives so small magnitudes stay short
    write_uvarint(((n << 1) ^ (n >> 63)) as u64, out);
}

/// Decode failure modes inside one value.
enum ReadError {
    /// The buffer ends before the value does; feed more bytes and retry.
    Incomplete,
    /// The bytes cannot be a Pack value. Fatal.
    Malformed(String),
}

/// Decode one complete value from the front of `buf`, consuming its bytes.
///
/// Returns `Ok(None)` when the buffer holds only a partial value; the buffer
/// is left untouched so the caller can feed more data and retry.
pub fn decode_from(buf: &mut BytesMut) -> SanchayaResult<Option<Value>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut pos = 0usize;
    match read_value(&buf[..], &mut pos) {
        Ok(value) => {
            buf.advance(pos);
            Ok(Some(value))
        }
        Err(ReadError::Incomplete) => Ok(None),
        Err(ReadError::Malformed(msg)) => Err(SanchayaError::Protocol(msg)),
    }
}

/// Decode exactly one value from a complete buffer.
pub fn decode(bytes: &[u8]) -> SanchayaResult<Value> {
    let mut pos = 0usize;
    match read_value(bytes, &mut pos) {
        Ok(value) => {
            if pos != bytes.len() {
                return Err(SanchayaError::Protocol(format!(
                    "{} trailing bytes after pack value",
                    bytes.len() - pos
                )));
            }
            Ok(value)
        }
        Err(ReadError::Incomplete) => {
            Err(SanchayaError::Protocol("truncated pack value".to_string()))
        }
        Err(ReadError::Malformed(msg)) => Err(SanchayaError::Protocol(msg)),
    }
}

fn read_value(buf: &[u8], pos: &mut usize) -> Result<Value, ReadError> {
    let tag = *buf.get(*pos).ok_or(ReadError::Incomplete)?;
    *pos += 1;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_INT => {
            let raw = read_uvarint(buf, pos)?;
            let n = ((raw >> 1) as i64) ^ -((raw & 1) as i64);
            Ok(Value::Number(Number::from(n)))
        }
        TAG_UINT => {
            let n = read_uvarint(buf, pos)?;
            Ok(Value::Number(Number::from(n)))
        }
        TAG_DOUBLE => {
            if buf.len() - *pos < 8 {
                return Err(ReadError::Incomplete);
            }
            let mut bits = [0u8; 8];
            bits.copy_from_slice(&buf[*pos..*pos + 8]);
            *pos += 8;
            let f = f64::from_bits(u64::from_le_bytes(bits));
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| ReadError::Malformed("non-finite double".to_string()))
        }
        TAG_STRING => Ok(Value::String(read_string(buf, pos)?)),
        TAG_ARRAY => {
            let count = read_uvarint(buf, pos)?;
            let mut items = Vec::with_capacity(clamp_capacity(count));
            for _ in 0..count {
                items.push(read_value(buf, pos)?);
            }
            Ok(Value::Array(items))
        }
        TAG_OBJECT => {
            let count = read_uvarint(buf, pos)?;
            let mut members = Map::new();
            for _ in 0..count {
                let key = read_string(buf, pos)?;
                let value = read_value(buf, pos)?;
                members.insert(key, value);
            }
            Ok(Value::Object(members))
        }
        other => Err(ReadError::Malformed(format!(
            "unknown pack tag 0x{other:02x}"
        ))),
    }
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<String, ReadError> {
    let len = read_uvarint(buf, pos)? as usize;
    if buf.len() - *pos < len {
        return Err(ReadError::Incomplete);
    }
    let bytes = buf[*pos..*pos + len].to_vec();
    *pos += len;
    String::from_utf8(bytes).map_err(|e| ReadError::Malformed(format!("invalid UTF-8: {e}")))
}

fn read_uvarint(buf: &[u8], pos: &mut usize) -> Result<u64, ReadError> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT_LEN {
        let byte = *buf.get(*pos + i).ok_or(ReadError::Incomplete)?;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            *pos += i + 1;
            return Ok(result);
        }
        shift += 7;
    }
    Err(ReadError::Malformed("varint too long".to_string()))
}

// Don't trust a length prefix for pre-allocation; a malformed count must not
// allocate gigabytes before the element reads fail.
fn clamp_capacity(count: u64) -> usize {
    count.min(1024) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: Value) {
        let bytes = encode(&value);
        let back = decode(&bytes).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn test_round_trip_scalars() {
        round_trip(json!(null));
        round_trip(json!(true));
        round_trip(json!(false));
        round_trip(json!(0));
        round_trip(json!(-1));
        round_trip(json!(12345));
        round_trip(json!(-987654321i64));
        round_trip(json!("hello"));
        round_trip(json!(""));
        round_trip(json!(2.5));
    }

    #[test]
    fn test_integers_round_trip_exactly() {
        // No silent float coercion at either extreme.
        round_trip(json!(i64::MAX));
        round_trip(json!(i64::MIN));
        round_trip(json!(u64::MAX));
        let bytes = encode(&json!(i64::MAX));
        let back = decode(&bytes).unwrap();
        assert_eq!(back.as_i64(), Some(i64::MAX));
        let bytes = encode(&json!(u64::MAX));
        let back = decode(&bytes).unwrap();
        assert_eq!(back.as_u64(), Some(u64::MAX));
    }

    #[test]
    fn test_round_trip_nested() {
        round_trip(json!({
            "_key": "a",
            "nested": {"depth": [1, 2, {"three": null}]},
            "tags": ["x", "y"],
            "active": true,
            "score": 1.5,
            "missing": null,
        }));
    }

    #[test]
    fn test_round_trip_mixed_null_array() {
        round_trip(json!([null, 1, null, "two", null]));
    }

    #[test]
    fn test_unicode_strings() {
        round_trip(json!("ключ-ключ 🗝"));
    }

    #[test]
    fn test_streaming_decode_successive_values() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&json!({"a": 1})));
        buf.extend_from_slice(&encode(&json!({"b": 2})));

        let first = decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(first, json!({"a": 1}));
        let second = decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(second, json!({"b": 2}));
        assert!(decode_from(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_value_waits_for_more_bytes() {
        let full = encode(&json!({"key": "abcdefgh"}));
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..full.len() - 3]);

        // Partial value: not an error, just not ready.
        assert!(decode_from(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), full.len() - 3);

        buf.extend_from_slice(&full[full.len() - 3..]);
        let value = decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(value, json!({"key": "abcdefgh"}));
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x7f]);
        let err = decode_from(&mut buf).unwrap_err();
        assert!(matches!(err, SanchayaError::Protocol(_)));
    }

    #[test]
    fn test_overlong_varint_is_malformed() {
        let mut bytes = vec![TAG_INT];
        bytes.extend_from_slice(&[0x80; 10]);
        bytes.push(0x01);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected_by_strict_decode() {
        let mut bytes = encode(&json!(1));
        bytes.push(TAG_NULL);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let bytes = vec![TAG_STRING, 0x02, 0xff, 0xfe];
        assert!(decode(&bytes).is_err());
    }
}
