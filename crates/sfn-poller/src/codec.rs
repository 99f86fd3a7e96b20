//! JSON payload encoding for task input and output

use serde::{de::DeserializeOwned, Serialize};

/// Payload encode/decode errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value could not be serialized
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload did not match the expected shape
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a handler result as a JSON payload
pub fn marshal<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Encode)
}

/// Decode a JSON payload into the handler's input type
pub fn unmarshal<T: DeserializeOwned>(payload: &str) -> Result<T, CodecError> {
    serde_json::from_str(payload).map_err(CodecError::Decode)
}
