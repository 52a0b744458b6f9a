//! Content-addressed asset identifiers of the form `did:op:<64 hex>`.

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

use crate::{constants::DID_PREFIX, encoding::keccak256};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DidFormatError {
    #[error("Identifier {0:?} does not start with `did:op:`")]
    MissingPrefix(String),
    #[error("Identifier hash must be 64 hex characters, found {0}")]
    InvalidLength(usize),
    #[error("Identifier hash contains non-hex characters")]
    InvalidHex,
}

/// An asset identifier.
///
/// Always holds exactly 32 bytes; there is no way to build a `Did` from a
/// malformed string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Did([u8; 32]);

impl Did {
    /// Provisional identifier used before a document is sealed.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        Self(bytes)
    }

    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The identifier of a document whose checksum map serializes to
    /// `canonical_json`.
    pub fn from_canonical_json(canonical_json: &str) -> Self {
        Self(keccak256(canonical_json.as_bytes()))
    }

    /// Parse the bare 64 hex hash (no prefix).
    pub fn from_hash_hex(hash: &str) -> Result<Self, DidFormatError> {
        if hash.len() != 64 {
            return Err(DidFormatError::InvalidLength(hash.len()));
        }
        let bytes = hex::decode(hash).map_err(|_| DidFormatError::InvalidHex)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex of the hash, without prefix.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Did {
    type Err = DidFormatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hash = value
            .strip_prefix(DID_PREFIX)
            .ok_or_else(|| DidFormatError::MissingPrefix(value.to_string()))?;
        Self::from_hash_hex(hash)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DID_PREFIX}{}", self.hash_hex())
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({self})")
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Did::from_str(&value).map_err(D::Error::custom)
    }
}
