//! Worker contract
//!
//! Workers own the executor, local cache mounts and source resolution. The
//! bridge never constructs them; it receives a controller that hands out
//! the default worker and enumerates all of them.

use crate::error::BridgeResult;
use crate::executor::Executor;
use crate::graph::{Digest, Platform, SourceOp};
use crate::policy::SourcePolicy;
use async_trait::async_trait;
use std::sync::Arc;

/// Options for resolving metadata of a source (e.g. an image config)
#[derive(Debug, Clone, Default)]
pub struct ResolveOpt {
    pub log_name: Option<String>,
    pub platform: Option<Platform>,
    pub source_policies: Vec<SourcePolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetaResponse {
    /// The op as resolved, after policy rewrites
    pub op: SourceOp,
    pub digest: Option<Digest>,
    pub config: Option<serde_json::Value>,
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    fn executor(&self) -> Arc<dyn Executor>;

    /// Drop the contents of the named cache mounts
    async fn prune_cache_mounts(&self, ids: &[String]) -> BridgeResult<()>;

    async fn resolve_source_metadata(
        &self,
        op: &SourceOp,
        opt: &ResolveOpt,
    ) -> BridgeResult<MetaResponse>;
}

pub trait WorkerController: Send + Sync {
    fn default_worker(&self) -> BridgeResult<Arc<dyn Worker>>;

    fn workers(&self) -> Vec<Arc<dyn Worker>>;
}
