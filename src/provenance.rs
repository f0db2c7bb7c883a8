//! Provenance capture for build results
//!
//! Records which external materials (images, repositories, URLs, local
//! contexts), secrets and network access went into a result.

use crate::error::{BridgeError, BridgeResult};
use crate::graph::{Digest, MountType, NetMode, Op, OpKind, Platform, SourceOp};
use crate::result::CachedResult;
use serde::Serialize;

/// An op that contributed to a result
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceOp {
    pub digest: Digest,
    pub op: Op,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capture {
    pub sources: Sources,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssh: Vec<Ssh>,
    pub network_access: bool,
    pub incomplete_materials: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sources {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageSource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub git: Vec<GitSource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpSource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub local: Vec<LocalSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ImageSource {
    #[serde(rename = "ref")]
    pub reference: String,
    pub platform: Option<Platform>,
    /// Loaded from an OCI layout on the client rather than a registry
    pub local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GitSource {
    pub url: String,
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct HttpSource {
    pub url: String,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LocalSource {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Secret {
    pub id: String,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Ssh {
    pub id: String,
    pub optional: bool,
}

impl Capture {
    fn add_source(&mut self, src: &SourceOp, platform: Option<&Platform>) -> BridgeResult<()> {
        let (scheme, rest) = src.identifier.split_once("://").ok_or_else(|| {
            BridgeError::Provenance(format!("unknown source identifier {}", src.identifier))
        })?;

        match scheme {
            "docker-image" | "oci-layout" => self.sources.images.push(ImageSource {
                reference: rest.to_string(),
                platform: platform.cloned(),
                local: scheme == "oci-layout",
            }),
            "git" => self.sources.git.push(GitSource {
                url: src
                    .attrs
                    .get("git.fullurl")
                    .cloned()
                    .unwrap_or_else(|| rest.to_string()),
                commit: src.attrs.get("git.commit").cloned(),
            }),
            "http" | "https" => self.sources.http.push(HttpSource {
                url: src.identifier.clone(),
                checksum: src.attrs.get("http.checksum").cloned(),
            }),
            "local" => {
                self.sources.local.push(LocalSource {
                    name: rest.to_string(),
                });
                self.incomplete_materials = true;
            }
            _ => {
                return Err(BridgeError::Provenance(format!(
                    "unknown source identifier {}",
                    src.identifier
                )))
            }
        }
        Ok(())
    }

    fn add_op(&mut self, pop: &ProvenanceOp) -> BridgeResult<()> {
        match &pop.op.op {
            Some(OpKind::Source(src)) => self.add_source(src, pop.op.platform.as_ref())?,
            Some(OpKind::Exec(exec)) => {
                if exec.network != NetMode::None {
                    self.network_access = true;
                }
                for mount in &exec.mounts {
                    match (mount.mount_type, &mount.secret_opt, &mount.ssh_opt) {
                        (MountType::Secret, Some(opt), _) => self.secrets.push(Secret {
                            id: opt.id.clone(),
                            optional: opt.optional,
                        }),
                        (MountType::Ssh, _, Some(opt)) => self.ssh.push(Ssh {
                            id: opt.id.clone(),
                            optional: opt.optional,
                        }),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.sources.images.sort();
        self.sources.images.dedup();
        self.sources.git.sort();
        self.sources.git.dedup();
        self.sources.http.sort();
        self.sources.http.dedup();
        self.sources.local.sort();
        self.sources.local.dedup();
        self.secrets.sort();
        self.secrets.dedup_by(|a, b| a.id == b.id && {
            b.optional &= a.optional;
            true
        });
        self.ssh.sort();
        self.ssh.dedup_by(|a, b| a.id == b.id && {
            b.optional &= a.optional;
            true
        });
    }
}

/// Build the provenance record of a successful result
pub fn capture_provenance(res: &dyn CachedResult) -> BridgeResult<Capture> {
    let mut capture = Capture::default();
    for pop in res.provenance() {
        capture
            .add_op(&pop)
            .map_err(|e| match e {
                BridgeError::Provenance(_) => BridgeError::vertex(pop.digest.clone(), e),
                other => other,
            })?;
    }
    capture.normalize();
    Ok(capture)
}
