//! Build graph operations

use super::{Digest, Platform};
use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reference to an output of another node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub digest: Digest,
    #[serde(default)]
    pub index: usize,
}

/// One node of the build graph
///
/// The digest of an op is the hash of its canonical JSON encoding, so every
/// map inside an op is ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// `None` only for the terminal pointer at the end of a definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<OpKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Source(SourceOp),
    Exec(ExecOp),
    File(FileOp),
    Merge(MergeOp),
}

/// Reference to an external source (image, git repository, URL, local context)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOp {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

impl SourceOp {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            attrs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecOp {
    pub meta: Meta,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub network: NetMode,
    #[serde(default)]
    pub security: SecurityMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default)]
    pub cwd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
}

/// Network mode requested by a process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetMode {
    /// Isolated network namespace with outbound access
    #[default]
    Sandbox,
    /// Host network namespace
    Host,
    /// No network at all
    None,
}

/// Sandboxing level requested by a process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    #[default]
    Sandbox,
    Insecure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    #[default]
    Bind,
    Secret,
    Ssh,
    Cache,
    Tmpfs,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSharing {
    #[default]
    Shared,
    Private,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOpt {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub sharing: CacheSharing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretOpt {
    pub id: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshOpt {
    pub id: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Index into the op inputs; `None` mounts scratch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<usize>,
    pub dest: String,
    /// Index of the op output this mount produces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<usize>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub mount_type: MountType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_opt: Option<CacheOpt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_opt: Option<SecretOpt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_opt: Option<SshOpt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Mkdir { path: String },
    Mkfile { path: String, data: String },
    Rm { path: String },
    Copy { src: String, dest: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOp {
    pub actions: Vec<FileAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOp {}

impl Op {
    pub fn source(source: SourceOp) -> Self {
        Self {
            inputs: vec![],
            platform: None,
            op: Some(OpKind::Source(source)),
        }
    }

    pub fn exec(exec: ExecOp, inputs: Vec<Input>) -> Self {
        Self {
            inputs,
            platform: None,
            op: Some(OpKind::Exec(exec)),
        }
    }

    /// Terminal pointer selecting the graph output
    pub fn terminal(input: Input) -> Self {
        Self {
            inputs: vec![input],
            platform: None,
            op: None,
        }
    }

    /// Content address of this op
    pub fn digest(&self) -> BridgeResult<Digest> {
        let encoded = serde_json::to_vec(self)?;
        Ok(Digest::from_bytes(&encoded))
    }

    pub fn is_terminal(&self) -> bool {
        self.op.is_none()
    }

    pub fn source_op(&self) -> Option<&SourceOp> {
        match &self.op {
            Some(OpKind::Source(src)) => Some(src),
            _ => None,
        }
    }

    pub fn exec_op(&self) -> Option<&ExecOp> {
        match &self.op {
            Some(OpKind::Exec(exec)) => Some(exec),
            _ => None,
        }
    }

    /// Structural checks that do not need the rest of the graph
    pub fn validate(&self) -> BridgeResult<()> {
        match &self.op {
            None => Err(BridgeError::InvalidDefinition(
                "op without kind outside terminal position".to_string(),
            )),
            Some(OpKind::Source(src)) => {
                if src.identifier.trim().is_empty() {
                    return Err(BridgeError::InvalidDefinition(
                        "source op with empty identifier".to_string(),
                    ));
                }
                if !self.inputs.is_empty() {
                    return Err(BridgeError::InvalidDefinition(format!(
                        "source op {} must not have inputs",
                        src.identifier
                    )));
                }
                Ok(())
            }
            Some(OpKind::Exec(exec)) => self.validate_exec(exec),
            Some(OpKind::File(file)) => {
                if file.actions.is_empty() {
                    return Err(BridgeError::InvalidDefinition(
                        "file op without actions".to_string(),
                    ));
                }
                Ok(())
            }
            Some(OpKind::Merge(_)) => {
                if self.inputs.is_empty() {
                    return Err(BridgeError::InvalidDefinition(
                        "merge op without inputs".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    fn validate_exec(&self, exec: &ExecOp) -> BridgeResult<()> {
        if exec.meta.args.is_empty() {
            return Err(BridgeError::InvalidDefinition(
                "exec op without args".to_string(),
            ));
        }

        for mount in &exec.mounts {
            if let Some(input) = mount.input {
                if input >= self.inputs.len() {
                    return Err(BridgeError::InvalidDefinition(format!(
                        "mount {} references input {} of {}",
                        mount.dest,
                        input,
                        self.inputs.len()
                    )));
                }
            }
            match mount.mount_type {
                MountType::Cache if mount.cache_opt.is_none() => {
                    return Err(BridgeError::InvalidDefinition(format!(
                        "cache mount {} without cache options",
                        mount.dest
                    )));
                }
                MountType::Secret if mount.secret_opt.is_none() => {
                    return Err(BridgeError::InvalidDefinition(format!(
                        "secret mount {} without secret options",
                        mount.dest
                    )));
                }
                MountType::Ssh if mount.ssh_opt.is_none() => {
                    return Err(BridgeError::InvalidDefinition(format!(
                        "ssh mount {} without ssh options",
                        mount.dest
                    )));
                }
                _ => {}
            }
        }

        // outputs number the output mounts 0..n, each exactly once
        let mut outputs: Vec<usize> = exec.mounts.iter().filter_map(|m| m.output).collect();
        let total = outputs.len();
        if let Some(out) = outputs.iter().find(|out| **out >= total) {
            return Err(BridgeError::InvalidDefinition(format!(
                "mount output {} out of range for {} output mounts",
                out, total
            )));
        }
        outputs.sort_unstable();
        outputs.dedup();
        if outputs.len() != total {
            return Err(BridgeError::InvalidDefinition(
                "exec op with duplicate mount outputs".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for Op {
    /// Short human-readable summary used as a default vertex name
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            None => write!(f, "terminal"),
            Some(OpKind::Source(src)) => write!(f, "source {}", src.identifier),
            Some(OpKind::Exec(exec)) => write!(f, "exec {}", exec.meta.args.join(" ")),
            Some(OpKind::File(file)) => write!(f, "file ({} actions)", file.actions.len()),
            Some(OpKind::Merge(_)) => write!(f, "merge ({} inputs)", self.inputs.len()),
        }
    }
}
