//! Content addressing: SHA-256 digests as record identity

use crate::error::{Result, SnapdexError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// The SHA-256 digest of an image's bytes, held as lowercase hex.
///
/// Equal bytes always produce the equal hash, so the hash doubles as the
/// deduplication key and as the stable identifier that index positions
/// resolve back to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw image bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// The hex digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = SnapdexError;

    /// Parse a hash supplied externally (CLI argument, URL path). Accepts
    /// exactly 64 hex digits; uppercase input is normalized to lowercase.
    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SnapdexError::InvalidHash {
                value: s.to_string(),
            });
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}
