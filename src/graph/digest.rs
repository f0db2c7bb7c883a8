//! Content-addressed node identifiers

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

const ALGORITHM: &str = "sha256";

/// Content hash of a graph node, rendered as `sha256:<hex>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Hash raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{}:{}", ALGORITHM, hex::encode(hash)))
    }

    /// Parse and validate a `sha256:<hex>` string
    pub fn parse(s: &str) -> BridgeResult<Self> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| BridgeError::InvalidDigest(format!("missing algorithm in '{}'", s)))?;

        if algorithm != ALGORITHM {
            return Err(BridgeError::InvalidDigest(format!(
                "unsupported algorithm '{}' in '{}'",
                algorithm, s
            )));
        }

        if encoded.len() != 64
            || !encoded
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(BridgeError::InvalidDigest(format!(
                "expected 64 lowercase hex characters in '{}'",
                s
            )));
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex portion without the algorithm prefix
    pub fn encoded(&self) -> &str {
        self.0
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.0)
    }

    /// Abbreviated form for display (12 hex characters)
    pub fn short(&self) -> &str {
        let encoded = self.encoded();
        &encoded[..encoded.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = BridgeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}
