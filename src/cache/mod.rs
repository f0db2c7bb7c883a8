//! Cache sources
//!
//! Maps cache-source references submitted with a build request to cache
//! managers the solver can query. Resolution may involve network round
//! trips, so it is started once per cache source, shared by every request
//! naming the same source, and awaited lazily by the managers' operations.
//!
//! # Keys
//!
//! | Reference | Key |
//! |-----------|-----|
//! | `registry` with a `ref` attribute | the ref, verbatim |
//! | anything else | `<type>:<sha256 of the canonical reference>` |

mod key;
mod lazy;
mod registry;

pub use key::{cache_source_key, CacheOptionsEntry};
pub use lazy::LazyCacheManager;
pub use registry::CacheSourceRegistry;

use crate::error::BridgeResult;
use crate::graph::Digest;
use crate::result::ResultRef;
use crate::worker::Worker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identity of a cached node output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub id: String,
    pub digest: Digest,
    pub output: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKeyWithSelector {
    pub key: CacheKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Digest>,
}

/// A stored result for a cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub id: String,
    pub key: CacheKey,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub priority: i32,
}

/// A cache key together with the exporter able to export it, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportableCacheKey {
    pub key: CacheKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter: Option<String>,
}

impl ExportableCacheKey {
    pub fn unexported(key: CacheKey) -> Self {
        Self {
            key,
            exporter: None,
        }
    }
}

/// Content descriptor of an imported cache manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Lookup and storage of cached results
#[async_trait]
pub trait CacheManager: Send + Sync {
    fn id(&self) -> &str;

    /// Find cache keys for an output of `dgst` given the keys of one input
    async fn query(
        &self,
        inputs: &[CacheKeyWithSelector],
        input_index: usize,
        dgst: &Digest,
        output_index: usize,
    ) -> BridgeResult<Vec<CacheKey>>;

    async fn records(&self, key: &CacheKey) -> BridgeResult<Vec<CacheRecord>>;

    async fn load(&self, record: &CacheRecord) -> BridgeResult<ResultRef>;

    async fn save(
        &self,
        key: &CacheKey,
        result: ResultRef,
        created_at: DateTime<Utc>,
    ) -> BridgeResult<ExportableCacheKey>;

    async fn release_unreferenced(&self) -> BridgeResult<()>;
}

/// Configures the importer for one cache-source type from reference attributes
#[async_trait]
pub trait CacheImporterResolver: Send + Sync {
    async fn resolve(
        &self,
        attrs: &BTreeMap<String, String>,
    ) -> BridgeResult<(Arc<dyn CacheImporter>, Descriptor)>;
}

/// Turns an imported cache manifest into a cache manager
///
/// `Ok(None)` means the source legitimately holds no cache.
#[async_trait]
pub trait CacheImporter: Send + Sync {
    async fn resolve(
        &self,
        desc: Descriptor,
        id: &str,
        worker: Arc<dyn Worker>,
    ) -> BridgeResult<Option<Arc<dyn CacheManager>>>;
}
