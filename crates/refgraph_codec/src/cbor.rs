//! CBOR encoding and decoding.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode any serializable value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Encode a property value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_value(value: &Value) -> CodecResult<Vec<u8>> {
    to_cbor(value)
}

/// Decode a property value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes do not hold an encoded [`Value`].
pub fn decode_value(bytes: &[u8]) -> CodecResult<Value> {
    from_cbor(bytes)
}
