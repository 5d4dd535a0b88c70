//! Dual MessagePack/JSON payload encoding (spec §4.1 "Serialization").
//!
//! A sending peer picks an encoding according to `use_msgpack`; a receiving
//! peer must accept either, since the other end of a subject may be running
//! with a different setting (or a different language's SDK entirely). We
//! disambiguate by content-type header when present, falling back to a
//! byte-level sniff: MessagePack's first byte for a map (the envelope is
//! always a map/object) never coincides with JSON's leading `{`.

use aegis_types::CoreError;
use serde::{de::DeserializeOwned, Serialize};

pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const CONTENT_TYPE_MSGPACK: &str = "application/msgpack";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Encodes `value` as MessagePack if `use_msgpack`, else JSON. Returns the
/// bytes and the content-type string to attach as a header.
pub fn encode<T: Serialize>(value: &T, use_msgpack: bool) -> Result<(Vec<u8>, &'static str), CoreError> {
    if use_msgpack {
        let bytes = rmp_serde::to_vec_named(value)
            .map_err(|e| CoreError::Validation(format!("msgpack encode failed: {e}")))?;
        Ok((bytes, CONTENT_TYPE_MSGPACK))
    } else {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| CoreError::Validation(format!("json encode failed: {e}")))?;
        Ok((bytes, CONTENT_TYPE_JSON))
    }
}

/// Decodes `bytes` into `T`, using `content_type` if given, else sniffing
/// the first byte.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], content_type: Option<&str>) -> Result<T, CoreError> {
    let use_msgpack = match content_type {
        Some(CONTENT_TYPE_MSGPACK) => true,
        Some(CONTENT_TYPE_JSON) => false,
        _ => sniff_msgpack(bytes),
    };

    if use_msgpack {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Validation(format!("msgpack decode failed: {e}")))
    } else {
        serde_json::from_slice(bytes).map_err(|e| CoreError::Validation(format!("json decode failed: {e}")))
    }
}

/// MessagePack fixmap/map16/map32 headers are `0x80..=0x8f`, `0xde`, `0xdf`;
/// none of those ever opens a valid JSON document, whose first
/// non-whitespace byte for an object envelope is always `{` (0x7b).
fn sniff_msgpack(bytes: &[u8]) -> bool {
    match bytes.first() {
        Some(b) => !matches!(*b, b'{' | b'[' | b' ' | b'\t' | b'\n' | b'\r'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trips_msgpack() {
        let sample = Sample { a: 1, b: "x".into() };
        let (bytes, ct) = encode(&sample, true).unwrap();
        assert_eq!(ct, CONTENT_TYPE_MSGPACK);
        let decoded: Sample = decode(&bytes, Some(ct)).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn round_trips_json() {
        let sample = Sample { a: 2, b: "y".into() };
        let (bytes, ct) = encode(&sample, false).unwrap();
        assert_eq!(ct, CONTENT_TYPE_JSON);
        let decoded: Sample = decode(&bytes, Some(ct)).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn sniffs_without_content_type_header() {
        let sample = Sample { a: 3, b: "z".into() };
        let (msgpack_bytes, _) = encode(&sample, true).unwrap();
        let (json_bytes, _) = encode(&sample, false).unwrap();

        let from_msgpack: Sample = decode(&msgpack_bytes, None).unwrap();
        let from_json: Sample = decode(&json_bytes, None).unwrap();
        assert_eq!(from_msgpack, sample);
        assert_eq!(from_json, sample);
    }
}
