//! Canonical serialization for network messages.
//!
//! All payloads that cross the wire are BCS-encoded. Keeping the encode and
//! decode entry points here means every crate agrees on the format.

use serde::{de::DeserializeOwned, Serialize};

/// Error from canonical encode/decode.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Value could not be serialized.
    #[error("encode: {0}")]
    Encode(bcs::Error),
    /// Bytes did not decode into the expected type.
    #[error("decode: {0}")]
    Decode(bcs::Error),
}

/// Encode a value into a fresh buffer.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bcs::to_bytes(value).map_err(CodecError::Encode)
}

/// Encode a value into a caller-provided buffer.
///
/// Callers that frame many messages reuse one allocation this way.
pub fn encode_into_buffer<T: Serialize>(
    buffer: &mut Vec<u8>,
    value: &T,
) -> Result<(), CodecError> {
    bcs::serialize_into(buffer, value).map_err(CodecError::Encode)
}

/// Decode a value from bytes.
pub fn try_decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bcs::from_bytes(bytes).map_err(CodecError::Decode)
}
