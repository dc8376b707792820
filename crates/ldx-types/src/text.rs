//! Canonical text encoding for values.
//!
//! Values are written as extended JSON. Types JSON cannot express directly
//! are wrapped in single-key marker objects:
//!
//! | Type        | Encoding                                   |
//! |-------------|--------------------------------------------|
//! | `Int64`     | `{"$numberLong": "42"}`                    |
//! | `Double`    | plain number; `{"$numberDouble": "NaN"}` when not finite |
//! | `Binary`    | `{"$binary": "<base64>"}`                  |
//! | `ObjectId`  | `{"$oid": "<24 hex>"}`                     |
//! | `Guid`      | `{"$guid": "<uuid>"}`                      |
//! | `DateTime`  | `{"$date": "<RFC 3339>"}`                  |
//!
//! Non-ASCII characters are escaped as `\uXXXX` so the output is pure ASCII;
//! [`decode_non_ascii`] reverses only those escapes for human-readable export.

use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number};

use crate::error::TypeError;
use crate::object_id::ObjectId;
use crate::value::{Document, Value};

const NUMBER_LONG: &str = "$numberLong";
const NUMBER_DOUBLE: &str = "$numberDouble";
const BINARY: &str = "$binary";
const OID: &str = "$oid";
const GUID: &str = "$guid";
const DATE: &str = "$date";

/// Encode a value as compact, ASCII-only canonical text.
pub fn encode(value: &Value) -> String {
    escape_non_ascii(&to_json(value).to_string())
}

/// Encode a value as indented, ASCII-only canonical text.
pub fn encode_pretty(value: &Value) -> String {
    let json = serde_json::to_string_pretty(&to_json(value)).unwrap_or_default();
    escape_non_ascii(&json)
}

/// Encode a document as compact canonical text.
pub fn encode_document(doc: &Document) -> String {
    escape_non_ascii(&document_to_json(doc).to_string())
}

/// Write the canonical text of `value` to `writer`, optionally decoded.
pub fn encode_to_writer<W: Write>(
    value: &Value,
    writer: &mut W,
    decoded: bool,
) -> std::io::Result<()> {
    let text = encode_pretty(value);
    if decoded {
        writer.write_all(decode_non_ascii(&text).as_bytes())
    } else {
        writer.write_all(text.as_bytes())
    }
}

/// Parse canonical text back into a value.
pub fn parse(text: &str) -> Result<Value, TypeError> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| TypeError::InvalidText(e.to_string()))?;
    from_json(json)
}

/// Parse canonical text that must hold a document.
pub fn parse_document(text: &str) -> Result<Document, TypeError> {
    parse(text)?.into_document()
}

// ---------------------------------------------------------------------------
// JSON mapping
// ---------------------------------------------------------------------------

/// Convert a value into its extended JSON tree.
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Boolean(v) => Json::Bool(*v),
        Value::Int32(v) => Json::Number(Number::from(*v)),
        Value::Int64(v) => marker(NUMBER_LONG, v.to_string()),
        Value::Double(v) => match Number::from_f64(*v) {
            Some(n) => Json::Number(n),
            None => marker(NUMBER_DOUBLE, non_finite_name(*v).to_string()),
        },
        Value::String(v) => Json::String(v.clone()),
        Value::Binary(v) => marker(BINARY, encode_binary(v)),
        Value::ObjectId(v) => marker(OID, v.to_hex()),
        Value::Guid(v) => marker(GUID, v.to_string()),
        Value::DateTime(v) => marker(DATE, format_datetime(v)),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Document(doc) => document_to_json(doc),
    }
}

fn document_to_json(doc: &Document) -> serde_json::Value {
    let map: Map<String, serde_json::Value> =
        doc.iter().map(|(k, v)| (k.to_string(), to_json(v))).collect();
    serde_json::Value::Object(map)
}

fn marker(key: &str, value: String) -> serde_json::Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), serde_json::Value::String(value));
    serde_json::Value::Object(map)
}

fn non_finite_name(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

/// Convert an extended JSON tree into a value.
pub fn from_json(json: serde_json::Value) -> Result<Value, TypeError> {
    use serde_json::Value as Json;

    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(v) => Value::Boolean(v),
        Json::Number(n) => number_to_value(&n),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Json::Object(map) => {
            if map.len() == 1 {
                if let Some(value) = marker_to_value(&map)? {
                    return Ok(value);
                }
            }
            let mut doc = Document::new();
            for (key, value) in map {
                doc.insert(key, from_json(value)?);
            }
            Value::Document(doc)
        }
    })
}

fn number_to_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => Value::Int32(small),
            Err(_) => Value::Int64(i),
        }
    } else {
        Value::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn marker_to_value(map: &Map<String, serde_json::Value>) -> Result<Option<Value>, TypeError> {
    let Some((key, raw)) = map.iter().next() else {
        return Ok(None);
    };
    let known = matches!(
        key.as_str(),
        NUMBER_LONG | NUMBER_DOUBLE | BINARY | OID | GUID | DATE
    );
    if !known {
        return Ok(None);
    }
    let text = raw
        .as_str()
        .ok_or_else(|| TypeError::InvalidText(format!("{key} expects a string")))?;

    let value = match key.as_str() {
        NUMBER_LONG => Value::Int64(
            text.parse()
                .map_err(|_| TypeError::InvalidText(format!("bad {key}: {text}")))?,
        ),
        NUMBER_DOUBLE => Value::Double(match text {
            "NaN" => f64::NAN,
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            other => other
                .parse()
                .map_err(|_| TypeError::InvalidText(format!("bad {key}: {other}")))?,
        }),
        BINARY => Value::Binary(
            STANDARD
                .decode(text)
                .map_err(|e| TypeError::InvalidText(format!("bad {key}: {e}")))?,
        ),
        OID => Value::ObjectId(ObjectId::from_hex(text)?),
        GUID => Value::Guid(
            text.parse()
                .map_err(|_| TypeError::InvalidText(format!("bad {key}: {text}")))?,
        ),
        _ => Value::DateTime(
            DateTime::parse_from_rfc3339(text)
                .map_err(|e| TypeError::InvalidText(format!("bad {key}: {e}")))?
                .with_timezone(&Utc),
        ),
    };
    Ok(Some(value))
}

pub(crate) fn encode_binary(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ---------------------------------------------------------------------------
// Non-ASCII escaping
// ---------------------------------------------------------------------------

/// Replace every non-ASCII character with `\uXXXX` escapes (UTF-16 units).
///
/// Only valid on JSON text, where non-ASCII characters can appear solely
/// inside string literals.
pub fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

/// Turn `\uXXXX` escapes of non-ASCII characters back into the characters.
///
/// Escapes of ASCII code points (quotes, control characters) and any other
/// backslash sequence are left untouched, so the result is still valid
/// JSON.
pub fn decode_non_ascii(json: &str) -> String {
    let bytes = json.as_bytes();
    let mut out = String::with_capacity(json.len());
    let mut i = 0;
    let mut literal_start = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        if let Some(unit) = read_unit(bytes, i) {
            let (ch, consumed) = if (0xd800..0xdc00).contains(&unit) {
                match read_unit(bytes, i + 6).filter(|low| (0xdc00..0xe000).contains(low)) {
                    Some(low) => {
                        let code = 0x10000 + ((u32::from(unit) - 0xd800) << 10) + (u32::from(low) - 0xdc00);
                        (char::from_u32(code), 12)
                    }
                    None => (None, 6),
                }
            } else if unit >= 0x80 {
                (char::from_u32(u32::from(unit)), 6)
            } else {
                (None, 6)
            };
            if let Some(ch) = ch {
                out.push_str(&json[literal_start..i]);
                out.push(ch);
                i += consumed;
                literal_start = i;
                continue;
            }
            i += consumed;
        } else {
            // Skip the escaped character so `\\u00e9` stays literal.
            i += 2;
        }
    }
    out.push_str(&json[literal_start.min(json.len())..]);
    out
}

fn read_unit(bytes: &[u8], at: usize) -> Option<u16> {
    if bytes.get(at) != Some(&b'\\') || bytes.get(at + 1) != Some(&b'u') {
        return None;
    }
    let digits = bytes.get(at + 2..at + 6)?;
    let digits = std::str::from_utf8(digits).ok()?;
    u16::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use proptest::prelude::*;

    #[test]
    fn scalars_encode_as_extended_json() {
        assert_eq!(encode(&Value::Int32(5)), "5");
        assert_eq!(encode(&Value::Int64(5)), r#"{"$numberLong":"5"}"#);
        assert_eq!(encode(&Value::Double(1.5)), "1.5");
        assert_eq!(encode(&Value::Double(f64::NAN)), r#"{"$numberDouble":"NaN"}"#);
        assert_eq!(encode(&Value::Binary(vec![1, 2, 3])), r#"{"$binary":"AQID"}"#);
        assert_eq!(encode(&Value::Null), "null");
    }

    #[test]
    fn non_ascii_is_escaped() {
        let text = encode(&Value::from("naïve 🚀"));
        assert!(text.is_ascii());
        assert_eq!(text, r#""na\u00efve \ud83d\ude80""#);
    }

    #[test]
    fn decode_restores_non_ascii_only() {
        let decoded = decode_non_ascii(r#""na\u00efve \ud83d\ude80 \" \n \u0041""#);
        assert_eq!(decoded, r#""naïve 🚀 \" \n \u0041""#);
    }

    #[test]
    fn decode_leaves_escaped_backslash_alone() {
        // A literal backslash followed by `u00e9` must not be unescaped.
        let text = encode(&Value::from("\\u00e9"));
        assert_eq!(decode_non_ascii(&text), text);
    }

    #[test]
    fn decode_keeps_lone_surrogates() {
        let text = r#""\ud83d x""#;
        assert_eq!(decode_non_ascii(text), text);
    }

    #[test]
    fn document_roundtrip_through_decoded_text() {
        let original = Value::Document(doc! {
            "_id" => ObjectId::new(),
            "name" => "Zoë",
            "tags" => Value::Array(vec![Value::from("日本"), Value::Array(vec![Value::from(1)])]),
            "address" => doc! { "city" => "São Paulo", "zip" => 1234i64 },
            "score" => 9.25,
            "raw" => Value::Binary(vec![0, 255]),
            "when" => Utc::now(),
        });
        let decoded = decode_non_ascii(&encode(&original));
        assert_eq!(parse(&decoded).unwrap(), original);
    }

    #[test]
    fn parse_integer_widths() {
        assert_eq!(parse("7").unwrap(), Value::Int32(7));
        assert_eq!(parse("8589934592").unwrap(), Value::Int64(8_589_934_592));
        assert_eq!(parse("7.0").unwrap(), Value::Double(7.0));
    }

    #[test]
    fn unknown_dollar_keys_stay_documents() {
        let v = parse(r#"{"$where":"x"}"#).unwrap();
        assert!(v.is_document());
    }

    #[test]
    fn malformed_marker_is_an_error() {
        assert!(parse(r#"{"$oid":5}"#).is_err());
        assert!(parse(r#"{"$oid":"xyz"}"#).is_err());
    }

    #[test]
    fn parse_document_rejects_arrays() {
        assert!(matches!(
            parse_document("[1]"),
            Err(TypeError::UnexpectedType { .. })
        ));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Boolean),
            any::<i32>().prop_map(Value::Int32),
            any::<i64>().prop_map(Value::Int64),
            any::<f64>()
                .prop_filter("finite", |v| v.is_finite())
                .prop_map(Value::Double),
            any::<String>().prop_map(Value::String),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Binary),
            any::<[u8; 12]>().prop_map(|b| Value::ObjectId(ObjectId::from_raw(b))),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::vec(("[a-z]{1,6}", inner), 0..4).prop_map(|fields| {
                    let mut doc = Document::new();
                    for (k, v) in fields {
                        doc.insert(k, v);
                    }
                    Value::Document(doc)
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn decoded_text_roundtrips(value in arb_value()) {
            let text = decode_non_ascii(&encode(&value));
            prop_assert_eq!(parse(&text).unwrap(), value);
        }
    }
}
