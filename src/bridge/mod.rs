//! Bridge between build requests and the solver
//!
//! The bridge owns the per-job context a build runs in: the worker pool,
//! the shared cache-source registry, the job's entitlements and ambient
//! source policy. It loads definitions into edges, hands them to the
//! builder, gates process execution on entitlements and produces
//! [`ResultProxy`] handles for lazily evaluated requests.

mod proxy;

pub use proxy::{ResultProxy, SolveRequest};

use crate::builder::Builder;
use crate::cache::{CacheOptionsEntry, CacheSourceRegistry};
use crate::entitlements::Values;
use crate::error::{BridgeError, BridgeResult};
use crate::executor::{Executor, Mount, ProcessInfo, ResourceRecorder};
use crate::graph::{Definition, Digest, NetMode, Platform, SecurityMode, SourceOp};
use crate::loader::{self, PrunedCacheIds};
use crate::policy::{compose_policies, Engine, SourcePolicy, SourcePolicyEvaluator};
use crate::progress::{VertexWarning, WarnOpts};
use crate::result::CachedResultRef;
use crate::worker::{MetaResponse, ResolveOpt, WorkerController};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{oneshot, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

pub struct Bridge {
    builder: Arc<dyn Builder>,
    workers: Arc<dyn WorkerController>,
    cache_sources: Arc<CacheSourceRegistry>,
    default_platform: Platform,
    executor: OnceCell<Result<Arc<dyn Executor>, Arc<BridgeError>>>,
}

impl Bridge {
    pub fn new(
        builder: Arc<dyn Builder>,
        workers: Arc<dyn WorkerController>,
        cache_sources: Arc<CacheSourceRegistry>,
    ) -> Self {
        Self {
            builder,
            workers,
            cache_sources,
            default_platform: Platform::host(),
            executor: OnceCell::new(),
        }
    }

    /// Platform given to ops that do not name one
    pub fn with_default_platform(mut self, platform: Platform) -> Self {
        self.default_platform = platform.normalize();
        self
    }

    pub fn cache_sources(&self) -> &Arc<CacheSourceRegistry> {
        &self.cache_sources
    }

    /// Attach a non-fatal diagnostic to a graph node
    ///
    /// Without a progress writer the warning is dropped.
    pub fn warn(&self, dgst: &Digest, msg: &str, opts: WarnOpts) -> BridgeResult<()> {
        let Some(pw) = self.builder.progress() else {
            return Ok(());
        };
        let level = if opts.level == 0 { 1 } else { opts.level };
        pw.write_warning(VertexWarning {
            id: Uuid::new_v4().to_string(),
            vertex: dgst.clone(),
            level,
            short: msg.to_string(),
            detail: opts.detail,
            url: opts.url,
            source_info: opts.source_info,
            range: opts.range,
            timestamp: Utc::now(),
        })
    }

    /// Load a definition and evaluate it with the builder
    pub async fn load_result(
        &self,
        cancel: &CancellationToken,
        def: &Definition,
        cache_imports: &[CacheOptionsEntry],
        policies: &[Option<SourcePolicy>],
    ) -> BridgeResult<CachedResultRef> {
        let worker = self.workers.default_worker()?;
        let entitlements = self.builder.entitlements()?;
        let ambient = self.builder.source_policy()?;
        let policy = compose_policies(ambient, policies)?;

        let cache_sources = self.cache_sources.resolve(cache_imports, worker)?;

        let mut pruned = PrunedCacheIds::new();
        let edge = loader::load(
            def,
            policy.as_deref(),
            vec![
                pruned.observer(),
                loader::validate_entitlements(entitlements),
                loader::with_cache_sources(cache_sources),
                loader::normalize_runtime_platforms(self.default_platform.clone()),
                loader::with_validate_caps(),
            ],
        )
        .map_err(|e| BridgeError::LoadGraph(Box::new(e)))?;

        if !pruned.is_empty() {
            let ids = pruned.ids();
            info!(ids = ?ids, "pruning cache mounts");
            for worker in self.workers.workers() {
                worker.prune_cache_mounts(&ids).await?;
            }
        }

        debug!(vertex = %edge.vertex.digest, name = %edge.vertex.name, "building");
        self.builder.build(cancel, edge).await
    }

    /// Resolve metadata of a source, after the job's policies have vetted it
    pub async fn resolve_source_metadata(
        &self,
        op: &SourceOp,
        mut opt: ResolveOpt,
    ) -> BridgeResult<MetaResponse> {
        let worker = self.workers.default_worker()?;
        if opt.log_name.is_none() {
            opt.log_name = Some(format!("resolve image config for {}", op.identifier));
        }
        if let Some(ambient) = self.builder.source_policy()? {
            opt.source_policies.push(ambient);
        }

        let mut op = op.clone();
        let policies = std::mem::take(&mut opt.source_policies);
        let identifier = op.identifier.clone();
        Engine::new(policies)
            .and_then(|engine| engine.evaluate(&mut op))
            .map_err(|e| BridgeError::PolicyResolve {
                identifier,
                source: Box::new(e),
            })?;

        debug!(
            worker = %worker.id(),
            source = %op.identifier,
            platform = ?opt.platform,
            "resolving source metadata"
        );
        worker.resolve_source_metadata(&op, &opt).await
    }

    /// Create a lazily evaluated handle for a build request
    pub fn new_result_proxy(self: &Arc<Self>, req: SolveRequest) -> Arc<ResultProxy> {
        Arc::new(ResultProxy::new(self.clone(), req))
    }

    fn validate_entitlements(&self, process: &ProcessInfo) -> BridgeResult<()> {
        self.builder.entitlements()?.check(Values {
            network_host: process.meta.net_mode == NetMode::Host,
            security_insecure: process.meta.security_mode == SecurityMode::Insecure,
        })
    }

    /// Executor of the default worker, looked up on first use
    ///
    /// A failed lookup is remembered and returned to every later caller.
    async fn load_executor(&self) -> BridgeResult<Arc<dyn Executor>> {
        let executor = self
            .executor
            .get_or_init(|| async {
                let worker = self.workers.default_worker().map_err(Arc::new)?;
                debug!(worker = %worker.id(), "acquired executor");
                Ok(worker.executor())
            })
            .await;
        match executor {
            Ok(executor) => Ok(executor.clone()),
            Err(e) => Err(BridgeError::Shared(e.clone())),
        }
    }
}

#[async_trait]
impl Executor for Bridge {
    async fn run(
        &self,
        id: &str,
        rootfs: Mount,
        mounts: Vec<Mount>,
        process: ProcessInfo,
        started: Option<oneshot::Sender<()>>,
    ) -> BridgeResult<Option<Box<dyn ResourceRecorder>>> {
        self.validate_entitlements(&process)?;
        let executor = self.load_executor().await?;
        executor.run(id, rootfs, mounts, process, started).await
    }

    async fn exec(&self, id: &str, process: ProcessInfo) -> BridgeResult<()> {
        self.validate_entitlements(&process)?;
        let executor = self.load_executor().await?;
        executor.exec(id, process).await
    }
}
