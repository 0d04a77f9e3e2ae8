//! Serialization utilities: bincode for snapshots/WAL payloads, JSON for
//! the manifest and the HTTP surface.

use crate::error::{Result, SnapdexError};
use serde::{Deserialize, Serialize};

/// Encode data to bincode bytes.
pub fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| SnapdexError::Serialization(e.to_string()))
}

/// Decode data from bincode bytes.
pub fn from_bincode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| SnapdexError::Serialization(e.to_string()))
}

/// Encode data to pretty-printed JSON bytes.
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| SnapdexError::Serialization(e.to_string()))
}
