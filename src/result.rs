//! Build outputs produced by the solver
//!
//! Results hold references to underlying storage and must be released
//! exactly once by whoever owns them.

use crate::cache::ExportableCacheKey;
use crate::error::BridgeResult;
use crate::provenance::ProvenanceOp;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// An output of a single graph node
#[async_trait]
pub trait BuildResult: Send + Sync + fmt::Debug {
    fn id(&self) -> String;

    /// Drop the reference held on the underlying storage
    async fn release(&self) -> BridgeResult<()>;
}

/// A result of evaluating a whole graph, with the cache keys it was stored
/// under and the ops that produced it
pub trait CachedResult: BuildResult {
    fn cache_keys(&self) -> Vec<ExportableCacheKey>;

    /// Every op that contributed to this result
    fn provenance(&self) -> Vec<ProvenanceOp>;
}

pub type ResultRef = Arc<dyn BuildResult>;
pub type CachedResultRef = Arc<dyn CachedResult>;

/// Release a batch of results, continuing past failures
///
/// Returns the last error encountered.
pub async fn release_all(results: Vec<ResultRef>) -> BridgeResult<()> {
    let mut last_err = None;
    for res in results {
        if let Err(e) = res.release().await {
            tracing::warn!(result = %res.id(), error = %e, "failed to release result");
            last_err = Some(e);
        }
    }
    last_err.map_or(Ok(()), Err)
}
