//! CBOR request parameters → ordered JSON map.
//!
//! Requesters encode their parameters as a flat sequence of key/value pairs
//! without the enclosing map header. Before parsing, the buffer is wrapped in
//! indefinite-length map delimiters (`0xbf ... 0xff`) unless it already starts
//! with a map.

use ciborium::value::{Integer, Value as Cbor};
use indexmap::IndexMap;
use serde_json::{Number, Value};

use chainrelay_core::error::DecodeError;

const MAJOR_TYPE_MAP: u8 = 5;
const INDEFINITE_MAP_START: u8 = 0xbf;
const BREAK: u8 = 0xff;

const TAG_POSITIVE_BIGNUM: u64 = 2;
const TAG_NEGATIVE_BIGNUM: u64 = 3;

/// Wrap bare key/value pairs in indefinite map delimiters.
pub fn add_map_delimiters(data: &[u8]) -> Vec<u8> {
    let needs_wrap = data.is_empty() || (data.len() > 1 && data[0] >> 5 != MAJOR_TYPE_MAP);
    if !needs_wrap {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len() + 2);
    out.push(INDEFINITE_MAP_START);
    out.extend_from_slice(data);
    out.push(BREAK);
    out
}

/// Parse CBOR request parameters into an ordered string-keyed map.
pub fn parse_cbor_map(data: &[u8]) -> Result<IndexMap<String, Value>, DecodeError> {
    let framed = add_map_delimiters(data);
    let value: Cbor = ciborium::de::from_reader(framed.as_slice())
        .map_err(|e| DecodeError::PayloadEncoding(e.to_string()))?;
    match value {
        Cbor::Map(entries) => map_to_json(entries),
        other => Err(DecodeError::PayloadEncoding(format!(
            "expected a map, got {}",
            kind_name(&other)
        ))),
    }
}

fn map_to_json(entries: Vec<(Cbor, Cbor)>) -> Result<IndexMap<String, Value>, DecodeError> {
    let mut out = IndexMap::with_capacity(entries.len());
    for (k, v) in entries {
        out.insert(key_to_string(k)?, to_json(v)?);
    }
    Ok(out)
}

fn key_to_string(key: Cbor) -> Result<String, DecodeError> {
    match key {
        Cbor::Text(s) => Ok(s),
        Cbor::Integer(i) => Ok(i128::from(i).to_string()),
        other => Err(DecodeError::PayloadEncoding(format!(
            "unsupported map key type {}",
            kind_name(&other)
        ))),
    }
}

/// Convert one CBOR value into JSON.
///
/// Byte strings become `0x` hex; integers outside the i64/u64 range and
/// bignums become decimal strings.
pub fn to_json(value: Cbor) -> Result<Value, DecodeError> {
    Ok(match value {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Text(s) => Value::String(s),
        Cbor::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        Cbor::Integer(i) => integer_to_json(i),
        Cbor::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        Cbor::Array(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Cbor::Map(entries) => Value::Object(map_to_json(entries)?.into_iter().collect()),
        Cbor::Tag(TAG_POSITIVE_BIGNUM, inner) => bignum_to_json(*inner, false)?,
        Cbor::Tag(TAG_NEGATIVE_BIGNUM, inner) => bignum_to_json(*inner, true)?,
        Cbor::Tag(_, inner) => to_json(*inner)?,
        other => {
            return Err(DecodeError::PayloadEncoding(format!(
                "unsupported CBOR value {}",
                kind_name(&other)
            )))
        }
    })
}

fn integer_to_json(i: Integer) -> Value {
    let n = i128::from(i);
    if let Ok(v) = i64::try_from(n) {
        Value::Number(v.into())
    } else if let Ok(v) = u64::try_from(n) {
        Value::Number(v.into())
    } else {
        Value::String(n.to_string())
    }
}

fn bignum_to_json(inner: Cbor, negative: bool) -> Result<Value, DecodeError> {
    let Cbor::Bytes(bytes) = inner else {
        return Err(DecodeError::PayloadEncoding(
            "bignum tag must wrap a byte string".into(),
        ));
    };
    let digits = big_endian_to_decimal(&bytes);
    if !negative {
        return Ok(match digits.parse::<u64>() {
            Ok(v) => Value::Number(v.into()),
            Err(_) => Value::String(digits),
        });
    }
    // Negative bignums encode -1 - n.
    let magnitude = decimal_add_one(&digits);
    Ok(match format!("-{magnitude}").parse::<i64>() {
        Ok(v) => Value::Number(v.into()),
        Err(_) => Value::String(format!("-{magnitude}")),
    })
}

/// Arbitrary-length big-endian unsigned bytes → decimal digits.
fn big_endian_to_decimal(bytes: &[u8]) -> String {
    // Little-endian base-1e9 limbs.
    let mut limbs: Vec<u32> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u64;
        for limb in limbs.iter_mut() {
            let v = (*limb as u64) * 256 + carry;
            *limb = (v % 1_000_000_000) as u32;
            carry = v / 1_000_000_000;
        }
        while carry > 0 {
            limbs.push((carry % 1_000_000_000) as u32);
            carry /= 1_000_000_000;
        }
    }
    let mut out = String::new();
    let mut iter = limbs.iter().rev();
    if let Some(first) = iter.next() {
        out.push_str(&first.to_string());
    }
    for limb in iter {
        out.push_str(&format!("{limb:09}"));
    }
    out
}

fn decimal_add_one(digits: &str) -> String {
    let mut bytes: Vec<u8> = digits.bytes().collect();
    let mut i = bytes.len();
    loop {
        if i == 0 {
            bytes.insert(0, b'1');
            break;
        }
        i -= 1;
        if bytes[i] == b'9' {
            bytes[i] = b'0';
        } else {
            bytes[i] += 1;
            break;
        }
    }
    String::from_utf8(bytes).unwrap_or_default()
}

fn kind_name(v: &Cbor) -> &'static str {
    match v {
        Cbor::Integer(_) => "integer",
        Cbor::Bytes(_) => "bytes",
        Cbor::Float(_) => "float",
        Cbor::Text(_) => "text",
        Cbor::Bool(_) => "bool",
        Cbor::Null => "null",
        Cbor::Tag(..) => "tag",
        Cbor::Array(_) => "array",
        Cbor::Map(_) => "map",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// `"get": "https://a.io", "times": 100` without a map header.
    fn bare_pairs() -> Vec<u8> {
        let mut b = vec![0x63];
        b.extend_from_slice(b"get");
        b.push(0x6c);
        b.extend_from_slice(b"https://a.io");
        b.push(0x65);
        b.extend_from_slice(b"times");
        b.extend_from_slice(&[0x18, 0x64]);
        b
    }

    #[test]
    fn wraps_bare_pairs() {
        let framed = add_map_delimiters(&[0x63, b'a', b'b', b'c']);
        assert_eq!(framed.first(), Some(&0xbf));
        assert_eq!(framed.last(), Some(&0xff));
    }

    #[test]
    fn leaves_definite_maps_alone() {
        let data = [0xa1, 0x61, b'a', 0x01];
        assert_eq!(add_map_delimiters(&data), data.to_vec());
    }

    #[test]
    fn empty_payload_is_empty_map() {
        assert_eq!(add_map_delimiters(&[]), vec![0xbf, 0xff]);
        assert!(parse_cbor_map(&[]).unwrap().is_empty());
    }

    #[test]
    fn parses_bare_pairs_in_order() {
        let map = parse_cbor_map(&bare_pairs()).unwrap();
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["get", "times"]);
        assert_eq!(map["get"], json!("https://a.io"));
        assert_eq!(map["times"], json!(100));
    }

    #[test]
    fn parses_definite_map() {
        let map = parse_cbor_map(&[0xa1, 0x61, b'a', 0x20]).unwrap();
        assert_eq!(map["a"], json!(-1));
    }

    #[test]
    fn nested_array_and_bytes() {
        // "path": ["a", "b"], "raw": h'beef'
        let mut b = vec![0x64];
        b.extend_from_slice(b"path");
        b.extend_from_slice(&[0x82, 0x61, b'a', 0x61, b'b']);
        b.push(0x63);
        b.extend_from_slice(b"raw");
        b.extend_from_slice(&[0x42, 0xbe, 0xef]);
        let map = parse_cbor_map(&b).unwrap();
        assert_eq!(map["path"], json!(["a", "b"]));
        assert_eq!(map["raw"], json!("0xbeef"));
    }

    #[test]
    fn garbage_is_encoding_error() {
        let err = parse_cbor_map(&[0x63, b'a']).unwrap_err();
        assert!(matches!(err, DecodeError::PayloadEncoding(_)));
    }

    #[test]
    fn big_numbers() {
        assert_eq!(big_endian_to_decimal(&[0x01, 0x00]), "256");
        assert_eq!(
            big_endian_to_decimal(&[0xff; 16]),
            "340282366920938463463374607431768211455"
        );
        assert_eq!(decimal_add_one("999"), "1000");
        let v = bignum_to_json(Cbor::Bytes(vec![0xff; 16]), false).unwrap();
        assert_eq!(v, json!("340282366920938463463374607431768211455"));
        let v = bignum_to_json(Cbor::Bytes(vec![0x09]), true).unwrap();
        assert_eq!(v, json!(-10));
    }
}
