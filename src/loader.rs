//! Graph loader
//!
//! Turns a [`Definition`] into an [`Edge`] the builder can evaluate. Every
//! op is validated, passed through the source policy and the load options,
//! and linked to its inputs. Vertices are shared by digest, so the loaded
//! graph keeps the DAG shape of the definition.

use crate::cache::CacheManager;
use crate::entitlements::{EntitlementSet, Values};
use crate::error::{BridgeError, BridgeResult};
use crate::graph::{
    Definition, Digest, MountType, NetMode, Op, OpKind, OpMetadata, Platform, SecurityMode,
    CUSTOM_NAME,
};
use crate::policy::SourcePolicyEvaluator;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Capabilities a definition may require
const SUPPORTED_CAPS: &[&str] = &[
    "source.image",
    "source.git",
    "source.http",
    "source.local",
    "source.ocilayout",
    "exec.meta.base",
    "exec.meta.network",
    "exec.security",
    "exec.mount.bind",
    "exec.mount.cache",
    "exec.mount.secret",
    "exec.mount.ssh",
    "exec.mount.tmpfs",
    "file.base",
    "merge",
];

/// Ready-to-evaluate reference to one output of a vertex
#[derive(Debug, Clone)]
pub struct Edge {
    pub vertex: Arc<Vertex>,
    pub index: usize,
}

/// A loaded graph node
#[derive(Debug)]
pub struct Vertex {
    /// Definition digest, recomputed when a policy or input rewrite changed the op
    pub digest: Digest,
    pub name: String,
    pub op: Op,
    pub inputs: Vec<Edge>,
    pub options: VertexOptions,
}

#[derive(Clone, Default)]
pub struct VertexOptions {
    pub ignore_cache: bool,
    pub description: BTreeMap<String, String>,
    pub cache_sources: Vec<Arc<dyn CacheManager>>,
    /// Platform the op runs on, set by platform normalization
    pub platform: Option<Platform>,
}

impl fmt::Debug for VertexOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache_sources: Vec<&str> = self.cache_sources.iter().map(|cm| cm.id()).collect();
        f.debug_struct("VertexOptions")
            .field("ignore_cache", &self.ignore_cache)
            .field("description", &self.description)
            .field("cache_sources", &cache_sources)
            .field("platform", &self.platform)
            .finish()
    }
}

impl Edge {
    /// Visit every distinct vertex reachable from this edge, inputs first
    pub fn walk(&self, f: &mut dyn FnMut(&Arc<Vertex>)) {
        let mut seen = BTreeSet::new();
        walk_vertex(&self.vertex, &mut seen, f);
    }
}

fn walk_vertex(v: &Arc<Vertex>, seen: &mut BTreeSet<Digest>, f: &mut dyn FnMut(&Arc<Vertex>)) {
    if !seen.insert(v.digest.clone()) {
        return;
    }
    for input in &v.inputs {
        walk_vertex(&input.vertex, seen, f);
    }
    f(v);
}

/// Hook applied to every op before it becomes a vertex
pub type LoadOpt<'a> =
    Box<dyn FnMut(&mut Op, Option<&OpMetadata>, &mut VertexOptions) -> BridgeResult<()> + Send + 'a>;

/// Load a definition into an evaluable edge
pub fn load(
    def: &Definition,
    policy: Option<&dyn SourcePolicyEvaluator>,
    opts: Vec<LoadOpt<'_>>,
) -> BridgeResult<Edge> {
    let Some(terminal) = def.ops.last() else {
        return Err(BridgeError::InvalidDefinition(
            "definition contains no ops".to_string(),
        ));
    };
    if !terminal.is_terminal() || terminal.inputs.len() != 1 {
        return Err(BridgeError::InvalidDefinition(
            "last op of a definition must be a terminal with one input".to_string(),
        ));
    }

    let mut ops = HashMap::with_capacity(def.ops.len());
    for op in &def.ops[..def.ops.len() - 1] {
        ops.insert(op.digest()?, op);
    }

    let mut loader = Loader {
        def,
        ops,
        policy,
        opts,
        loaded: HashMap::new(),
    };
    let output = &terminal.inputs[0];
    let vertex = loader.vertex(&output.digest)?;
    Ok(Edge {
        vertex,
        index: output.index,
    })
}

struct Loader<'d, 'a> {
    def: &'d Definition,
    ops: HashMap<Digest, &'d Op>,
    policy: Option<&'a dyn SourcePolicyEvaluator>,
    opts: Vec<LoadOpt<'a>>,
    loaded: HashMap<Digest, Arc<Vertex>>,
}

impl Loader<'_, '_> {
    fn vertex(&mut self, dgst: &Digest) -> BridgeResult<Arc<Vertex>> {
        if let Some(v) = self.loaded.get(dgst) {
            return Ok(v.clone());
        }
        let Some(op) = self.ops.get(dgst).copied() else {
            return Err(BridgeError::InvalidDefinition(format!(
                "missing input {}",
                dgst
            )));
        };

        let mut op = op.clone();
        self.prepare(dgst, &mut op)
            .map_err(|e| BridgeError::vertex(dgst.clone(), e))
            .and_then(|options| self.link(dgst, op, options))
    }

    /// Validation, policy and load options for a single op
    fn prepare(&mut self, dgst: &Digest, op: &mut Op) -> BridgeResult<VertexOptions> {
        op.validate()?;

        if let (Some(policy), Some(OpKind::Source(src))) = (self.policy, op.op.as_mut()) {
            policy.evaluate(src)?;
        }

        let def = self.def;
        let meta = def.metadata_for(dgst);
        let mut options = VertexOptions::default();
        if let Some(meta) = meta {
            options.ignore_cache = meta.ignore_cache;
            options.description = meta.description.clone();
        }
        for opt in self.opts.iter_mut() {
            opt(op, meta, &mut options)?;
        }
        Ok(options)
    }

    fn link(&mut self, dgst: &Digest, mut op: Op, options: VertexOptions) -> BridgeResult<Arc<Vertex>> {
        let original = self.ops.get(dgst).copied();
        let mut inputs = Vec::with_capacity(op.inputs.len());
        for input in op.inputs.iter_mut() {
            let sub = match self.vertex(&input.digest) {
                Err(BridgeError::InvalidDefinition(msg)) => {
                    return Err(BridgeError::vertex(
                        dgst.clone(),
                        BridgeError::InvalidDefinition(msg),
                    ))
                }
                other => other?,
            };
            input.digest = sub.digest.clone();
            inputs.push(Edge {
                vertex: sub,
                index: input.index,
            });
        }

        let rewritten = original.is_some_and(|orig| {
            orig.op != op.op
                || orig
                    .inputs
                    .iter()
                    .zip(&op.inputs)
                    .any(|(a, b)| a.digest != b.digest)
        });
        // Load options may set fields like the platform; only source
        // rewrites and rewired inputs move a vertex to a new digest.
        let digest = if rewritten { op.digest()? } else { dgst.clone() };

        let name = options
            .description
            .get(CUSTOM_NAME)
            .cloned()
            .unwrap_or_else(|| op.to_string());

        let vertex = Arc::new(Vertex {
            digest,
            name,
            op,
            inputs,
            options,
        });
        self.loaded.insert(dgst.clone(), vertex.clone());
        Ok(vertex)
    }
}

/// Reject exec ops asking for more than the granted entitlements
pub fn validate_entitlements(ents: EntitlementSet) -> LoadOpt<'static> {
    Box::new(move |op: &mut Op, _: Option<&OpMetadata>, _: &mut VertexOptions| {
        if let Some(exec) = op.exec_op() {
            ents.check(Values {
                network_host: exec.network == NetMode::Host,
                security_insecure: exec.security == SecurityMode::Insecure,
            })?;
        }
        Ok(())
    })
}

/// Give every op a normalized platform, defaulting to `default`
pub fn normalize_runtime_platforms(default: Platform) -> LoadOpt<'static> {
    let default = default.normalize();
    Box::new(move |op: &mut Op, _: Option<&OpMetadata>, options: &mut VertexOptions| {
        let platform = match op.platform.take() {
            Some(p) => p.normalize(),
            None => default.clone(),
        };
        options.platform = Some(platform.clone());
        op.platform = Some(platform);
        Ok(())
    })
}

/// Let the builder consult the given cache managers for every vertex
pub fn with_cache_sources(managers: Vec<Arc<dyn CacheManager>>) -> LoadOpt<'static> {
    Box::new(move |_: &mut Op, _: Option<&OpMetadata>, options: &mut VertexOptions| {
        options.cache_sources = managers.clone();
        Ok(())
    })
}

/// Reject ops that require capabilities this build cannot provide
pub fn with_validate_caps() -> LoadOpt<'static> {
    Box::new(|_: &mut Op, meta: Option<&OpMetadata>, _: &mut VertexOptions| {
        let Some(meta) = meta else {
            return Ok(());
        };
        for (cap, required) in &meta.caps {
            if *required && !SUPPORTED_CAPS.contains(&cap.as_str()) {
                return Err(BridgeError::InvalidDefinition(format!(
                    "unsupported capability {}",
                    cap
                )));
            }
        }
        Ok(())
    })
}

/// Collects cache mount ids of ops that asked to ignore the cache
///
/// Those mounts must be pruned before the build runs so stale contents
/// are not reused.
#[derive(Debug, Default)]
pub struct PrunedCacheIds {
    ids: BTreeSet<String>,
}

impl PrunedCacheIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observer(&mut self) -> LoadOpt<'_> {
        let ids = &mut self.ids;
        Box::new(move |op: &mut Op, meta: Option<&OpMetadata>, _: &mut VertexOptions| {
            if !meta.is_some_and(|m| m.ignore_cache) {
                return Ok(());
            }
            if let Some(exec) = op.exec_op() {
                for mount in &exec.mounts {
                    if mount.mount_type != MountType::Cache {
                        continue;
                    }
                    if let Some(cache) = &mount.cache_opt {
                        let id = if cache.id.is_empty() {
                            mount.dest.clone()
                        } else {
                            cache.id.clone()
                        };
                        ids.insert(id);
                    }
                }
            }
            Ok(())
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }
}
