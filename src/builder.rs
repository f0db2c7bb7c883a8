//! Graph execution engine contract

use crate::entitlements::EntitlementSet;
use crate::error::BridgeResult;
use crate::loader::Edge;
use crate::policy::SourcePolicy;
use crate::progress::ProgressWriter;
use crate::result::CachedResultRef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Walks a loaded graph and produces its cached result
///
/// Also carries the context of the build job the bridge serves: the
/// entitlements it was granted and its ambient source policy.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Evaluate an edge; fails with [`crate::BridgeError::Canceled`] when `cancel` fires
    async fn build(&self, cancel: &CancellationToken, edge: Edge) -> BridgeResult<CachedResultRef>;

    fn entitlements(&self) -> BridgeResult<EntitlementSet>;

    fn source_policy(&self) -> BridgeResult<Option<SourcePolicy>>;

    fn progress(&self) -> Option<Arc<dyn ProgressWriter>> {
        None
    }
}
