//! Shared registry of cache managers keyed by cache source

use super::{cache_source_key, CacheImporterResolver, CacheManager, CacheOptionsEntry, LazyCacheManager};
use crate::error::{BridgeError, BridgeResult};
use crate::worker::Worker;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Resolves cache-source references to cache managers
///
/// Handles are created on first reference and kept for the lifetime of the
/// registry, so every request naming the same source shares one resolution
/// and its outcome.
pub struct CacheSourceRegistry {
    importers: HashMap<String, Arc<dyn CacheImporterResolver>>,
    managers: Mutex<HashMap<String, Arc<LazyCacheManager>>>,
}

impl CacheSourceRegistry {
    pub fn new() -> Self {
        Self {
            importers: HashMap::new(),
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Register the importer for a cache-source type (e.g. `registry`, `local`)
    pub fn with_importer(
        mut self,
        kind: impl Into<String>,
        resolver: Arc<dyn CacheImporterResolver>,
    ) -> Self {
        self.importers.insert(kind.into(), resolver);
        self
    }

    /// Return one handle per entry, creating and starting missing ones
    ///
    /// Handles may still be resolving; their operations wait for it.
    pub fn resolve(
        &self,
        entries: &[CacheOptionsEntry],
        worker: Arc<dyn Worker>,
    ) -> BridgeResult<Vec<Arc<dyn CacheManager>>> {
        let mut handles: Vec<Arc<dyn CacheManager>> = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = cache_source_key(entry)?;

            let mut managers = self.lock_managers();
            let handle = match managers.get(&id) {
                Some(existing) => existing.clone(),
                None => {
                    let lcm = LazyCacheManager::spawn(
                        id.clone(),
                        import(
                            id.clone(),
                            entry.clone(),
                            self.importers.get(&entry.kind).cloned(),
                            worker.clone(),
                        ),
                    );
                    managers.insert(id, lcm.clone());
                    lcm
                }
            };
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Existing handle for a cache-source key
    pub fn get(&self, id: &str) -> Option<Arc<LazyCacheManager>> {
        self.lock_managers().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_managers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_managers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<LazyCacheManager>>> {
        self.managers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CacheSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn import(
    id: String,
    entry: CacheOptionsEntry,
    resolver: Option<Arc<dyn CacheImporterResolver>>,
    worker: Arc<dyn Worker>,
) -> BridgeResult<Option<Arc<dyn CacheManager>>> {
    debug!(id = %id, kind = %entry.kind, "importing cache manifest");

    let outcome = async {
        let resolver =
            resolver.ok_or_else(|| BridgeError::UnknownCacheImporter(entry.kind.clone()))?;
        let (importer, desc) =
            resolver
                .resolve(&entry.attrs)
                .await
                .map_err(|e| BridgeError::CacheImporterConfig {
                    kind: entry.kind.clone(),
                    source: Box::new(e),
                })?;
        importer.resolve(desc, &id, worker).await
    }
    .await;

    if let Err(e) = &outcome {
        debug!(id = %id, error = %e, "error while importing cache manifest");
    }
    outcome
}
