//! Conversion between application values and stored bytes.
//!
//! Backends only ever see bytes. This module turns [`Value`]s (or any serde
//! type) into bytes and back under one of four [`Mode`]s:
//!
//! - `raw`: identity; only [`Value::Bytes`] can be encoded.
//! - `json`: canonical JSON via `serde_json`.
//! - `pickle`: `MsgPack` via `rmp-serde`; carries every [`Value`] variant,
//!   including binary data nested in structures.
//! - `auto`: json first, pickle as fallback, with an envelope tag so that
//!   decoding picks the right decoder without sniffing.
//!
//! # Auto envelope
//!
//! Tagged payloads start with the byte `0xFF` (never valid as the first byte
//! of UTF-8 text) followed by a one-byte tag:
//!
//! | tag | payload |
//! |-----|---------|
//! | `j` | JSON document |
//! | `p` | `MsgPack` document |
//! | `b` | raw bytes |
//!
//! Strings are written as plain UTF-8 without an envelope. Binary values that
//! are not valid UTF-8 and do not start with `0xFF` are written plain too.
//! On decode, untagged content becomes a string when it is valid UTF-8 and
//! bytes otherwise, so plain files written by other tools read back sensibly.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::value::Value;

/// First byte of every tagged auto-mode payload.
pub const ENVELOPE_SENTINEL: u8 = 0xFF;
const TAG_JSON: u8 = b'j';
const TAG_PICKLE: u8 = b'p';
const TAG_BYTES: u8 = b'b';

/// Serialization mode applied by a store when reading or writing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Bytes in, bytes out.
    Raw,
    /// Canonical JSON.
    Json,
    /// Portable general-object format (`MsgPack`).
    Pickle,
    /// Json with pickle fallback, envelope-tagged.
    #[default]
    Auto,
}

impl Mode {
    /// Lowercase name as used in configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Json => "json",
            Self::Pickle => "pickle",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "json" => Ok(Self::Json),
            "pickle" => Ok(Self::Pickle),
            "auto" | "" => Ok(Self::Auto),
            other => Err(StoreError::serialization(
                "auto",
                format!("unknown serialization mode `{other}`"),
            )),
        }
    }
}

/// Custom encoder that replaces mode-based encoding entirely.
pub type EncodeFn = Arc<dyn Fn(&Value) -> Result<Vec<u8>> + Send + Sync>;

/// Custom decoder that replaces mode-based decoding entirely.
pub type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Value> + Send + Sync>;

// ---- Value encoding ----

/// Encodes a [`Value`] under `mode`.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the value cannot be represented
/// in the requested mode (e.g. a string in raw mode, bytes in json mode).
pub fn encode(value: &Value, mode: Mode) -> Result<Vec<u8>> {
    match mode {
        Mode::Raw => match value {
            Value::Bytes(b) => Ok(b.clone()),
            other => Err(StoreError::serialization(
                "raw",
                format!("raw mode requires bytes, got {}", type_name(other)),
            )),
        },
        Mode::Json => encode_json(value),
        Mode::Pickle => encode_pickle(value),
        Mode::Auto => encode_auto(value),
    }
}

/// Decodes bytes previously produced by [`encode`] under the same `mode`.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the bytes are not a valid
/// document for `mode`.
pub fn decode(bytes: &[u8], mode: Mode) -> Result<Value> {
    match mode {
        Mode::Raw => Ok(Value::Bytes(bytes.to_vec())),
        Mode::Json => decode_json(bytes),
        Mode::Pickle => decode_pickle(bytes),
        Mode::Auto => decode_auto(bytes),
    }
}

fn encode_json(value: &Value) -> Result<Vec<u8>> {
    let json = value.to_json().ok_or_else(|| {
        StoreError::serialization("json", "value contains bytes or non-finite floats")
    })?;
    serde_json::to_vec(&json).map_err(|e| StoreError::serialization("json", e))
}

fn decode_json(bytes: &[u8]) -> Result<Value> {
    let json: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| StoreError::serialization("json", e))?;
    Ok(Value::from_json(json))
}

fn encode_pickle(value: &Value) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| StoreError::serialization("pickle", e))
}

fn decode_pickle(bytes: &[u8]) -> Result<Value> {
    rmp_serde::from_slice(bytes).map_err(|e| StoreError::serialization("pickle", e))
}

fn tagged(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(ENVELOPE_SENTINEL);
    out.push(tag);
    out.extend_from_slice(payload);
    out
}

fn encode_auto(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Bytes(b) => {
            if b.first() != Some(&ENVELOPE_SENTINEL) && std::str::from_utf8(b).is_err() {
                Ok(b.clone())
            } else {
                Ok(tagged(TAG_BYTES, b))
            }
        }
        other => match encode_json(other) {
            Ok(json) => Ok(tagged(TAG_JSON, &json)),
            Err(_) => Ok(tagged(TAG_PICKLE, &encode_pickle(other)?)),
        },
    }
}

/// Splits an auto-mode envelope into `(tag, payload)`, if present.
fn split_envelope(bytes: &[u8]) -> Option<(u8, &[u8])> {
    match bytes {
        [ENVELOPE_SENTINEL, tag @ (TAG_JSON | TAG_PICKLE | TAG_BYTES), payload @ ..] => {
            Some((*tag, payload))
        }
        _ => None,
    }
}

fn decode_auto(bytes: &[u8]) -> Result<Value> {
    match split_envelope(bytes) {
        Some((TAG_JSON, payload)) => decode_json(payload),
        Some((TAG_PICKLE, payload)) => decode_pickle(payload),
        Some((_, payload)) => Ok(Value::Bytes(payload.to_vec())),
        None => Ok(match std::str::from_utf8(bytes) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(bytes.to_vec()),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
    }
}

// ---- Typed encoding ----

/// Encodes any serde type under `mode`.
///
/// Auto mode tries JSON and falls back to `MsgPack` (e.g. for maps with
/// non-string keys), tagging the result like [`encode`] does.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] on encoder failure, and always in
/// raw mode, which only accepts [`Value::Bytes`].
pub fn encode_typed<T: Serialize + ?Sized>(value: &T, mode: Mode) -> Result<Vec<u8>> {
    match mode {
        Mode::Raw => Err(StoreError::serialization(
            "raw",
            "typed values cannot be stored in raw mode",
        )),
        Mode::Json => serde_json::to_vec(value).map_err(|e| StoreError::serialization("json", e)),
        Mode::Pickle => {
            rmp_serde::to_vec_named(value).map_err(|e| StoreError::serialization("pickle", e))
        }
        Mode::Auto => match serde_json::to_vec(value) {
            Ok(json) => Ok(tagged(TAG_JSON, &json)),
            Err(_) => rmp_serde::to_vec_named(value)
                .map(|p| tagged(TAG_PICKLE, &p))
                .map_err(|e| StoreError::serialization("auto", e)),
        },
    }
}

/// Decodes bytes into any serde type under `mode`.
///
/// In auto mode, untagged UTF-8 content is offered to `T` as a JSON string.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the bytes do not decode into `T`.
pub fn decode_typed<T: DeserializeOwned>(bytes: &[u8], mode: Mode) -> Result<T> {
    match mode {
        Mode::Raw => Err(StoreError::serialization(
            "raw",
            "typed values cannot be read in raw mode",
        )),
        Mode::Json => serde_json::from_slice(bytes).map_err(|e| StoreError::serialization("json", e)),
        Mode::Pickle => {
            rmp_serde::from_slice(bytes).map_err(|e| StoreError::serialization("pickle", e))
        }
        Mode::Auto => match split_envelope(bytes) {
            Some((TAG_JSON, payload)) => {
                serde_json::from_slice(payload).map_err(|e| StoreError::serialization("auto", e))
            }
            Some((TAG_PICKLE, payload)) => {
                rmp_serde::from_slice(payload).map_err(|e| StoreError::serialization("auto", e))
            }
            _ => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| StoreError::serialization("auto", e))?;
                serde_json::from_value(serde_json::Value::String(text.to_string()))
                    .map_err(|e| StoreError::serialization("auto", e))
            }
        },
    }
}

// ---- Models ----

/// Encodes a typed model as JSON.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the model fails to serialize.
pub fn encode_model<T: Serialize>(model: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(model).map_err(|e| StoreError::serialization("json", e))
}

/// Decodes JSON bytes into a typed model, validating its structure.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the document does not match `T`.
pub fn decode_model<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::serialization("json", e))
}

/// Validates a dynamic value against a model type, returning the coerced model.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the value is not JSON-representable
/// or does not match `T`.
pub fn coerce_model<T: DeserializeOwned>(value: &Value) -> Result<T> {
    let json = value.to_json().ok_or_else(|| {
        StoreError::serialization("json", "value contains bytes or non-finite floats")
    })?;
    serde_json::from_value(json).map_err(|e| StoreError::serialization("json", e))
}

// ---- Codec ----

/// A mode plus optional encode/decode overrides.
///
/// When an override is present it is used as-is and the mode is ignored for
/// that direction.
#[derive(Clone, Default)]
pub struct Codec {
    mode: Mode,
    encoder: Option<EncodeFn>,
    decoder: Option<DecodeFn>,
}

impl Codec {
    /// Creates a codec for `mode` without overrides.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            encoder: None,
            decoder: None,
        }
    }

    /// Replaces encoding with `f`.
    #[must_use]
    pub fn with_encoder(
        mut self,
        f: impl Fn(&Value) -> Result<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        self.encoder = Some(Arc::new(f));
        self
    }

    /// Replaces decoding with `f`.
    #[must_use]
    pub fn with_decoder(
        mut self,
        f: impl Fn(&[u8]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.decoder = Some(Arc::new(f));
        self
    }

    /// The configured mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Encodes `value`, preferring the override.
    ///
    /// # Errors
    ///
    /// Propagates errors from the override or from [`encode`].
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        self.encode_with(value, None)
    }

    /// Decodes `bytes`, preferring the override.
    ///
    /// # Errors
    ///
    /// Propagates errors from the override or from [`decode`].
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        self.decode_with(bytes, None)
    }

    /// Encodes `value` under a per-call `mode` (the configured one if `None`).
    ///
    /// An encode override still wins over any mode.
    ///
    /// # Errors
    ///
    /// Propagates errors from the override or from [`encode`].
    pub fn encode_with(&self, value: &Value, mode: Option<Mode>) -> Result<Vec<u8>> {
        match &self.encoder {
            Some(f) => f(value),
            None => encode(value, mode.unwrap_or(self.mode)),
        }
    }

    /// Decodes `bytes` under a per-call `mode` (the configured one if `None`).
    ///
    /// # Errors
    ///
    /// Propagates errors from the override or from [`decode`].
    pub fn decode_with(&self, bytes: &[u8], mode: Option<Mode>) -> Result<Value> {
        match &self.decoder {
            Some(f) => f(bytes),
            None => decode(bytes, mode.unwrap_or(self.mode)),
        }
    }

    /// Encodes a serde type. With an encode override the value is first
    /// converted to a [`Value`] through JSON.
    ///
    /// # Errors
    ///
    /// Propagates errors from the override or from [`encode_typed`].
    pub fn encode_typed<T: Serialize + ?Sized>(&self, value: &T, mode: Option<Mode>) -> Result<Vec<u8>> {
        match &self.encoder {
            Some(f) => {
                let json = serde_json::to_value(value)
                    .map_err(|e| StoreError::serialization("json", e))?;
                f(&Value::from_json(json))
            }
            None => encode_typed(value, mode.unwrap_or(self.mode)),
        }
    }

    /// Decodes into a serde type. With a decode override the decoded
    /// [`Value`] is coerced into `T`.
    ///
    /// # Errors
    ///
    /// Propagates errors from the override, [`coerce_model`] or [`decode_typed`].
    pub fn decode_typed<T: DeserializeOwned>(&self, bytes: &[u8], mode: Option<Mode>) -> Result<T> {
        match &self.decoder {
            Some(f) => coerce_model(&f(bytes)?),
            None => decode_typed(bytes, mode.unwrap_or(self.mode)),
        }
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("mode", &self.mode)
            .field("encoder", &self.encoder.is_some())
            .field("decoder", &self.decoder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    fn sample_map() -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from("alice"));
        map.insert("age".to_string(), Value::Int(42));
        map.insert("tags".to_string(), Value::Array(vec![Value::from("a"), Value::Null]));
        Value::Map(map)
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("JSON".parse::<Mode>().unwrap(), Mode::Json);
        assert_eq!("".parse::<Mode>().unwrap(), Mode::Auto);
        assert!("yaml".parse::<Mode>().is_err());
        assert_eq!(Mode::Pickle.to_string(), "pickle");
    }

    #[test]
    fn raw_requires_bytes() {
        assert_eq!(encode(&Value::Bytes(b"abc".to_vec()), Mode::Raw).unwrap(), b"abc");
        let err = encode(&Value::from("abc"), Mode::Raw).unwrap_err();
        assert!(matches!(err, StoreError::Serialization { mode: "raw", .. }));
        assert_eq!(decode(b"\xff\x00", Mode::Raw).unwrap(), Value::Bytes(vec![0xff, 0]));
    }

    #[test]
    fn json_rejects_bytes() {
        let err = encode(&Value::Bytes(vec![1]), Mode::Json).unwrap_err();
        assert!(matches!(err, StoreError::Serialization { mode: "json", .. }));
        assert!(decode(b"{not json", Mode::Json).is_err());
    }

    #[test]
    fn auto_stores_strings_plain() {
        let bytes = encode(&Value::from("hello"), Mode::Auto).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(decode(&bytes, Mode::Auto).unwrap(), Value::from("hello"));
    }

    #[test]
    fn auto_does_not_confuse_numeric_strings_with_numbers() {
        let s = decode(&encode(&Value::from("42"), Mode::Auto).unwrap(), Mode::Auto).unwrap();
        let n = decode(&encode(&Value::Int(42), Mode::Auto).unwrap(), Mode::Auto).unwrap();
        assert_eq!(s, Value::from("42"));
        assert_eq!(n, Value::Int(42));
    }

    #[test]
    fn auto_falls_back_to_pickle_for_nested_bytes() {
        let v = Value::Array(vec![Value::Int(1), Value::Bytes(vec![0, 159, 146, 150])]);
        let bytes = encode(&v, Mode::Auto).unwrap();
        assert_eq!(&bytes[..2], &[ENVELOPE_SENTINEL, TAG_PICKLE]);
        assert_eq!(decode(&bytes, Mode::Auto).unwrap(), v);
    }

    #[test]
    fn auto_tags_utf8_looking_bytes() {
        let v = Value::Bytes(b"plain text".to_vec());
        let bytes = encode(&v, Mode::Auto).unwrap();
        assert_eq!(&bytes[..2], &[ENVELOPE_SENTINEL, TAG_BYTES]);
        assert_eq!(decode(&bytes, Mode::Auto).unwrap(), v);

        let binary = Value::Bytes(vec![0x80, 0x81]);
        assert_eq!(encode(&binary, Mode::Auto).unwrap(), vec![0x80, 0x81]);
        assert_eq!(decode(&[0x80, 0x81], Mode::Auto).unwrap(), binary);
    }

    #[test]
    fn auto_reads_foreign_binary_starting_with_sentinel() {
        // JPEG magic: 0xFF 0xD8 is not a known tag.
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0];
        assert_eq!(decode(&jpeg, Mode::Auto).unwrap(), Value::Bytes(jpeg.to_vec()));
    }

    #[test]
    fn typed_auto_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Point {
            x: i32,
            y: i32,
        }
        let p = Point { x: 1, y: -2 };
        let bytes = encode_typed(&p, Mode::Auto).unwrap();
        assert_eq!(decode_typed::<Point>(&bytes, Mode::Auto).unwrap(), p);

        let none: Option<String> = None;
        let bytes = encode_typed(&none, Mode::Auto).unwrap();
        assert_eq!(decode_typed::<Option<String>>(&bytes, Mode::Auto).unwrap(), None);
    }

    #[test]
    fn typed_auto_falls_back_for_non_string_keys() {
        let mut map = BTreeMap::new();
        map.insert((1, 2), "pair".to_string());
        let bytes = encode_typed(&map, Mode::Auto).unwrap();
        assert_eq!(&bytes[..2], &[ENVELOPE_SENTINEL, TAG_PICKLE]);
        let decoded: BTreeMap<(i32, i32), String> = decode_typed(&bytes, Mode::Auto).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn typed_auto_reads_plain_strings() {
        assert_eq!(decode_typed::<String>(b"plain", Mode::Auto).unwrap(), "plain");
    }

    #[test]
    fn model_validation() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Person {
            name: String,
            age: u32,
        }
        let person: Person = coerce_model(&sample_map()).unwrap();
        assert_eq!(person, Person { name: "alice".into(), age: 42 });

        let bytes = encode_model(&person).unwrap();
        assert_eq!(decode_model::<Person>(&bytes).unwrap(), person);
        assert!(decode_model::<Person>(br#"{"name": "bob"}"#).is_err());
    }

    #[test]
    fn codec_overrides_take_precedence() {
        let codec = Codec::new(Mode::Raw)
            .with_encoder(|v| Ok(format!("<{}>", v.as_str().unwrap_or_default()).into_bytes()))
            .with_decoder(|b| Ok(Value::from(String::from_utf8_lossy(b).to_uppercase())));
        assert_eq!(codec.encode(&Value::from("x")).unwrap(), b"<x>");
        assert_eq!(codec.decode(b"abc").unwrap(), Value::from("ABC"));
        assert_eq!(codec.mode(), Mode::Raw);
        assert_eq!(codec.encode_with(&Value::from("y"), Some(Mode::Json)).unwrap(), b"<y>");
    }

    #[test]
    fn codec_per_call_mode() {
        let codec = Codec::new(Mode::Auto);
        let v = Value::from(vec![Value::from(1), Value::from(2)]);
        assert_eq!(codec.encode_with(&v, Some(Mode::Json)).unwrap(), b"[1,2]");
        assert_eq!(codec.decode_with(b"[1,2]", Some(Mode::Json)).unwrap(), v);
        let bytes = codec.encode_typed(&vec![1u8, 2], None).unwrap();
        assert_eq!(codec.decode_typed::<Vec<u8>>(&bytes, None).unwrap(), vec![1, 2]);

        let upper = Codec::new(Mode::Json).with_decoder(|_| Ok(Value::from(7)));
        assert_eq!(upper.decode_typed::<i64>(b"ignored", None).unwrap(), 7);
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1e12f64..1e12f64).prop_map(Value::Float),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(".*", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    fn any_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            json_value(),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            prop::collection::vec(any::<u8>(), 0..8)
                .prop_map(|b| Value::Array(vec![Value::Bytes(b), Value::Int(0)])),
        ]
    }

    proptest! {
        #[test]
        fn json_roundtrip(v in json_value()) {
            prop_assert_eq!(decode(&encode(&v, Mode::Json).unwrap(), Mode::Json).unwrap(), v);
        }

        #[test]
        fn pickle_roundtrip(v in any_value()) {
            prop_assert_eq!(decode(&encode(&v, Mode::Pickle).unwrap(), Mode::Pickle).unwrap(), v);
        }

        #[test]
        fn raw_roundtrip(b in prop::collection::vec(any::<u8>(), 0..64)) {
            let v = Value::Bytes(b);
            prop_assert_eq!(decode(&encode(&v, Mode::Raw).unwrap(), Mode::Raw).unwrap(), v);
        }

        #[test]
        fn auto_roundtrip(v in any_value()) {
            prop_assert_eq!(decode(&encode(&v, Mode::Auto).unwrap(), Mode::Auto).unwrap(), v);
        }
    }
}
