// src/utils/serialization.rs
//! Serialization utilities.
//!
//! Provides:
//! - JSON serialization and deserialization
//! - unpadded base64url encoding used by compact tokens

use serde::{de::DeserializeOwned, Serialize};

/// Serializes a value to a JSON string.
///
/// # Errors
/// `serde_json::Error` if the value cannot be represented as JSON.
pub fn serialize<T: Serialize>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(data)
}

/// Deserializes a value from JSON bytes.
pub fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Unpadded base64url encoding.
pub fn encode_base64url(data: &[u8]) -> String {
    base64::encode_config(data, base64::URL_SAFE_NO_PAD)
}

/// Unpadded base64url decoding.
///
/// Trailing padding is tolerated since some signers emit it.
pub fn decode_base64url(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::decode_config(data.trim_end_matches('='), base64::URL_SAFE_NO_PAD)
}
