//! Content digests for deduplication and cache keys
//!
//! Digests are MD5 over canonicalized JSON and are used purely for
//! content addressing, not cryptographic integrity. The hash is stored as a
//! raw 16-byte array rather than a hex string, which keeps hash-map lookups
//! over large identifier snapshots cheap.
//!
//! Canonicalization relies on `serde_json` without the `preserve_order`
//! feature: object members live in a `BTreeMap`, so serialization is
//! key-sorted at every level and two JSON-equivalent documents always
//! produce the same byte stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ValidationError, ValidationResult};

/// MD5 content digest stored as a 16-byte array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 16]);

impl Digest {
    /// Compute the digest of raw bytes
    pub fn compute(bytes: &[u8]) -> Self {
        Digest(md5::compute(bytes).0)
    }

    /// Create a digest from a 32-character hex string (case insensitive)
    pub fn from_hex(hex: &str) -> ValidationResult<Self> {
        if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidDigest {
                digest: hex.to_string(),
            });
        }

        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            // Safe: length and characters validated above
            let pair = std::str::from_utf8(chunk).unwrap();
            bytes[i] = u8::from_str_radix(pair, 16).unwrap();
        }

        Ok(Digest(bytes))
    }

    /// Lowercase 32-character hex representation
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;
        self.0.iter().fold(String::with_capacity(32), |mut acc, b| {
            write!(&mut acc, "{:02x}", b).unwrap();
            acc
        })
    }

    /// Raw byte array representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = ValidationError;

    fn from_str(s: &str) -> ValidationResult<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Digest::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Digest of a JSON value after canonical (key-sorted) serialization
///
/// Identical logical content yields the same digest regardless of the
/// key insertion order of the input.
pub fn digest_json(value: &Value) -> Digest {
    // Object keys are already sorted by serde_json's BTreeMap-backed Map
    let serialized = serde_json::to_string(value).unwrap_or_default();
    Digest::compute(serialized.as_bytes())
}

/// Digest of an id set, used as the cache key for export batches
///
/// Ids are sorted before joining so the digest identifies the set, not the
/// order in which ids were resolved.
pub fn digest_ids(ids: &[String]) -> Digest {
    let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    Digest::compute(sorted.join(",").as_bytes())
}
