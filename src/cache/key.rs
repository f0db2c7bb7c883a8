//! Cache source references and their keys

use crate::error::BridgeResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;

/// Cache source attached to a build request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheOptionsEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

impl CacheOptionsEntry {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

/// Derive the key under which a cache source is shared
///
/// Registry sources are keyed by their ref so the same image cache is
/// shared across requests. Every other source is keyed by a hash of the
/// whole reference; attributes are ordered, so identical references always
/// produce the same key.
pub fn cache_source_key(entry: &CacheOptionsEntry) -> BridgeResult<String> {
    if entry.kind == "registry" {
        if let Some(reference) = entry.attrs.get("ref").filter(|r| !r.is_empty()) {
            return Ok(reference.clone());
        }
    }

    let canonical = serde_json::to_vec(entry)?;
    let hash = Sha256::digest(&canonical);
    Ok(format!("{}:{}", entry.kind, hex::encode(hash)))
}
