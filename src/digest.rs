//! Cryptographic content digest of an asset's bytes plus its identity.
//!
//! Grounded on the SHA-2 usage in `deck-store` (see DESIGN.md): a fixed-size
//! hash computed with `sha2`, hex-encoded for JSON serialization so the
//! persisted graph stays human-diffable.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::asset_id::AssetId;

/// A SHA-256 digest of `(AssetId identity string, content bytes)`, separated
/// by a NUL byte so that two assets with identical content but different
/// identity never collide.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn of(id: &AssetId, content: &[u8]) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(id.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(content);
        Digest(hasher.finalize().into())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Digest {
    fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_hex()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid digest hex string: {0}")]
pub struct DigestParseError(String);

impl TryFrom<String> for Digest {
    type Error = DigestParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() != 64 {
            return Err(DigestParseError(value));
        }
        let mut bytes = [0u8; 32];
        for (idx, chunk) in value.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).map_err(|_| DigestParseError(value.clone()))?;
            bytes[idx] = u8::from_str_radix(s, 16).map_err(|_| DigestParseError(value.clone()))?;
        }
        Ok(Digest(bytes))
    }
}
