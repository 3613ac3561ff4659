// SPDX-License-Identifier: MIT OR Apache-2.0
//! The 16-byte content-addressed identifier of a rendered image.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of raw bytes in a [`Digest`].
pub const DIGEST_LEN: usize = 16;

/// Errors produced when decoding a digest from its hex rendering.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    /// The input was not exactly 32 hex characters.
    #[error("digest must be {len} hex characters, got {0}", len = DIGEST_LEN * 2)]
    InvalidLength(usize),

    /// The input contained a non-hex character.
    #[error("digest contains non-hex input: {0}")]
    InvalidHex(String),
}

/// A 16-byte content hash of a rendered image, typically written as 32 hex
/// characters in input JSON.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Render the digest as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != DIGEST_LEN * 2 {
            return Err(DigestError::InvalidLength(s.len()));
        }
        let raw = hex::decode(s).map_err(|_| DigestError::InvalidHex(s.to_string()))?;
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_hex()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}
