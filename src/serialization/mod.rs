//! JSON wire format for values in the shared store.
//!
//! Other services read and write the same keys, so values are plain UTF-8
//! JSON with no envelope or version header.
//!
//! A stored value counts as *blank* when it is zero bytes, `null`, `""`,
//! `[]` or `{}`. Blank values are reported as absent, which matches how the
//! services sharing the store treat them.
//!
//! ```rust
//! use marquee::serialization::{decode, encode};
//!
//! # fn main() -> marquee::Result<()> {
//! let bytes = encode(&serde_json::json!({"id": 42}))?;
//! let value: Option<serde_json::Value> = decode(&bytes)?;
//! assert_eq!(value.unwrap()["id"], 42);
//!
//! assert_eq!(decode::<serde_json::Value>(b"{}")?, None);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Encode a value for the store.
///
/// # Errors
/// `Error::SerializationError` if the value has no JSON form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::SerializationError(e.to_string()))
}

/// Decode a stored value. Blank values decode to `Ok(None)`.
///
/// # Errors
/// `Error::DeserializationError` if the bytes are not JSON of shape `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<Option<T>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::DeserializationError(e.to_string()))?;
    if is_blank(&value) {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| Error::DeserializationError(e.to_string()))
}

/// True for `null`, `""`, `[]` and `{}`.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
