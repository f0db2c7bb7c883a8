//! Cache manager whose backend is resolved in the background

use super::{CacheKey, CacheKeyWithSelector, CacheManager, CacheRecord, ExportableCacheKey};
use crate::error::{BridgeError, BridgeResult};
use crate::graph::Digest;
use crate::result::ResultRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

type Resolved = Result<Option<Arc<dyn CacheManager>>, Arc<BridgeError>>;

/// Cache manager that starts resolving its backend on creation
///
/// Resolution runs exactly once. Every operation waits for it; a failed
/// resolution fails every operation with the same error, and a resolution
/// that yields no backend turns the manager into a no-op.
pub struct LazyCacheManager {
    id: String,
    resolved: Shared<BoxFuture<'static, Resolved>>,
}

impl LazyCacheManager {
    /// Spawn `resolve` on the runtime and return the handle immediately
    pub fn spawn<F>(id: impl Into<String>, resolve: F) -> Arc<Self>
    where
        F: Future<Output = BridgeResult<Option<Arc<dyn CacheManager>>>> + Send + 'static,
    {
        let id = id.into();
        let task = tokio::spawn(resolve);
        let task_id = id.clone();
        let resolved = async move {
            let outcome = match task.await {
                Ok(Ok(manager)) => Ok(manager),
                Ok(Err(e)) => Err(Arc::new(e)),
                Err(join) => Err(Arc::new(BridgeError::Internal(format!(
                    "cache resolution task for {} failed: {}",
                    task_id, join
                )))),
            };
            debug!(id = %task_id, ok = outcome.is_ok(), "cache source resolved");
            outcome
        }
        .boxed()
        .shared();

        Arc::new(Self { id, resolved })
    }

    /// Whether background resolution has completed and been observed
    pub fn is_resolved(&self) -> bool {
        self.resolved.peek().is_some()
    }

    async fn wait(&self) -> BridgeResult<Option<Arc<dyn CacheManager>>> {
        self.resolved.clone().await.map_err(BridgeError::Shared)
    }
}

#[async_trait]
impl CacheManager for LazyCacheManager {
    fn id(&self) -> &str {
        &self.id
    }

    async fn query(
        &self,
        inputs: &[CacheKeyWithSelector],
        input_index: usize,
        dgst: &Digest,
        output_index: usize,
    ) -> BridgeResult<Vec<CacheKey>> {
        match self.wait().await? {
            Some(main) => main.query(inputs, input_index, dgst, output_index).await,
            None => Ok(vec![]),
        }
    }

    async fn records(&self, key: &CacheKey) -> BridgeResult<Vec<CacheRecord>> {
        match self.wait().await? {
            Some(main) => main.records(key).await,
            None => Ok(vec![]),
        }
    }

    async fn load(&self, record: &CacheRecord) -> BridgeResult<ResultRef> {
        match self.wait().await? {
            Some(main) => main.load(record).await,
            None => Err(BridgeError::CacheRecordNotFound(record.id.clone())),
        }
    }

    async fn save(
        &self,
        key: &CacheKey,
        result: ResultRef,
        created_at: DateTime<Utc>,
    ) -> BridgeResult<ExportableCacheKey> {
        match self.wait().await? {
            Some(main) => main.save(key, result, created_at).await,
            None => Ok(ExportableCacheKey::unexported(key.clone())),
        }
    }

    async fn release_unreferenced(&self) -> BridgeResult<()> {
        match self.wait().await? {
            Some(main) => main.release_unreferenced().await,
            None => Ok(()),
        }
    }
}
