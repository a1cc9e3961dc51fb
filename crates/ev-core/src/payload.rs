//! Heterogeneous event payloads and their JSON wire codec.
//!
//! A payload is one of three variants:
//! - `Any`: a freely typed scalar (number, string, bool, null),
//! - `Json`: raw JSON text (object or array), preserved byte-for-byte,
//! - `Bytes`: an opaque binary blob.
//!
//! On the wire a scalar encodes as the corresponding JSON literal, raw JSON
//! encodes as itself, and bytes encode as `{"$binary": "<base64>"}`. The
//! decoder inverts this by dispatching on the top-level token; any object
//! carrying a string-valued `$binary` key is taken to be binary.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::value::RawValue;
use serde_json::Value;

/// Sentinel key marking a JSON object as a base64-encoded binary payload.
pub const BINARY_KEY: &str = "$binary";

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A scalar: number, string, bool, or null.
    Any(Value),
    /// Raw JSON text, an object or array, kept exactly as received.
    Json(String),
    /// Opaque binary data.
    Bytes(Vec<u8>),
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The variant/content combination is not representable, e.g. an `Any`
    /// holding an object, or an empty input.
    #[error("invalid type")]
    InvalidType,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 in binary payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Payload {
    /// Decode a payload from JSON text per the top-level-token table.
    pub fn from_json(raw: &[u8]) -> Result<Self, PayloadError> {
        let raw: &RawValue = serde_json::from_slice(raw)?;
        Self::classify(raw.get())
    }

    /// Build a payload from a byte buffer. With `raw` set the bytes are
    /// taken verbatim as binary; otherwise they are decoded as JSON.
    pub fn from_bytes(data: Vec<u8>, raw: bool) -> Result<Self, PayloadError> {
        if raw {
            return Ok(Payload::Bytes(data));
        }
        Self::from_json(&data)
    }

    /// Build an `Any` payload from a scalar value.
    pub fn from_scalar(value: Value) -> Result<Self, PayloadError> {
        match value {
            Value::Object(_) | Value::Array(_) => Err(PayloadError::InvalidType),
            value => Ok(Payload::Any(value)),
        }
    }

    /// True for zero-length `Json` and `Bytes` payloads. An explicit
    /// `Any(null)` is a legal, non-empty payload.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Any(_) => false,
            Payload::Json(raw) => raw.is_empty(),
            Payload::Bytes(data) => data.is_empty(),
        }
    }

    /// The raw JSON text, if this is a `Json` payload.
    pub fn json(&self) -> Option<&str> {
        match self {
            Payload::Json(raw) => Some(raw),
            _ => None,
        }
    }

    fn classify(raw: &str) -> Result<Self, PayloadError> {
        match raw.as_bytes().first() {
            Some(b'{') => {
                let value: Value = serde_json::from_str(raw)?;
                if let Some(Value::String(encoded)) = value.get(BINARY_KEY) {
                    return Ok(Payload::Bytes(BASE64.decode(encoded)?));
                }
                Ok(Payload::Json(raw.to_owned()))
            }
            Some(b'[') => {
                // Validated above by the RawValue parse; keep the text.
                Ok(Payload::Json(raw.to_owned()))
            }
            Some(_) => {
                let value: Value = serde_json::from_str(raw)?;
                Self::from_scalar(value)
            }
            None => Err(PayloadError::InvalidType),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Any(value) => match value {
                Value::Object(_) | Value::Array(_) => {
                    Err(serde::ser::Error::custom(PayloadError::InvalidType))
                }
                value => value.serialize(serializer),
            },
            Payload::Json(raw) => {
                let raw: &RawValue = serde_json::from_str(raw).map_err(serde::ser::Error::custom)?;
                raw.serialize(serializer)
            }
            Payload::Bytes(data) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(BINARY_KEY, &BASE64.encode(data))?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Self::classify(raw.get()).map_err(serde::de::Error::custom)
    }
}
