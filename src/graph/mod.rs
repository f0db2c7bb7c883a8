//! Build graph definitions
//!
//! A definition is a content-addressed DAG: every op is identified by the
//! digest of its encoding, inputs refer to other ops by digest, and the last
//! op is a terminal pointer selecting the graph output. Definitions may carry
//! per-node metadata and a source map relating nodes back to the build
//! instructions that produced them.

mod digest;
mod op;
mod platform;

pub use digest::Digest;
pub use op::{
    CacheOpt, CacheSharing, ExecOp, FileAction, FileOp, Input, MergeOp, Meta, Mount, MountType,
    NetMode, Op, OpKind, SecretOpt, SecurityMode, SourceOp, SshOpt,
};
pub use platform::Platform;

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Description key holding a user-facing vertex name
pub const CUSTOM_NAME: &str = "llb.customname";

/// Serialized build graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub ops: Vec<Op>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<Digest, OpMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceMap>,
}

/// Per-node metadata that does not contribute to the content address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpMetadata {
    pub ignore_cache: bool,
    pub description: BTreeMap<String, String>,
    pub caps: BTreeMap<String, bool>,
}

/// Mapping from graph nodes to the build instructions that produced them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMap {
    #[serde(default)]
    pub locations: HashMap<Digest, Locations>,
    #[serde(default)]
    pub infos: Vec<SourceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locations {
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub source_index: usize,
    pub ranges: Vec<Range>,
}

/// Human-authored file a definition was generated from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    #[serde(default)]
    pub character: u32,
}

impl Range {
    /// Range spanning whole lines
    pub fn lines(start: u32, end: u32) -> Self {
        Self {
            start: Position {
                line: start,
                character: 0,
            },
            end: Position {
                line: end,
                character: 0,
            },
        }
    }
}

impl Definition {
    /// Read a JSON-encoded definition from disk
    pub async fn load_from_file(path: &Path) -> BridgeResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            BridgeError::io(format!("reading definition from {}", path.display()), e)
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn metadata_for(&self, digest: &Digest) -> Option<&OpMetadata> {
        self.metadata.get(digest)
    }

    /// Recorded locations for a node, each resolved to its source file
    pub fn locations_for(&self, digest: &Digest) -> Vec<(&SourceInfo, &[Range])> {
        let Some(source) = &self.source else {
            return vec![];
        };
        let Some(locs) = source.locations.get(digest) else {
            return vec![];
        };
        locs.locations
            .iter()
            .filter_map(|loc| {
                source
                    .infos
                    .get(loc.source_index)
                    .map(|info| (info, loc.ranges.as_slice()))
            })
            .collect()
    }
}
