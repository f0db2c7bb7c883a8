//! In-memory collaborators for unit tests

use crate::builder::Builder;
use crate::cache::{
    CacheImporter, CacheImporterResolver, CacheKey, CacheKeyWithSelector, CacheManager,
    CacheRecord, Descriptor, ExportableCacheKey,
};
use crate::entitlements::EntitlementSet;
use crate::errdefs::ExecError;
use crate::error::{BridgeError, BridgeResult};
use crate::executor::{Executor, Mount, ProcessInfo, ResourceRecorder};
use crate::graph::{Digest, SourceOp};
use crate::loader::Edge;
use crate::policy::SourcePolicy;
use crate::progress::ProgressWriter;
use crate::provenance::ProvenanceOp;
use crate::result::{BuildResult, CachedResult, CachedResultRef, ResultRef};
use crate::worker::{MetaResponse, ResolveOpt, Worker, WorkerController};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

pub fn cache_key(id: &str) -> CacheKey {
    CacheKey {
        id: id.to_string(),
        digest: Digest::from_bytes(id.as_bytes()),
        output: 0,
    }
}

#[derive(Debug)]
pub struct FakeResult {
    id: String,
    releases: AtomicUsize,
    fail_release: bool,
    provenance: Vec<ProvenanceOp>,
}

impl FakeResult {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            releases: AtomicUsize::new(0),
            fail_release: false,
            provenance: vec![],
        }
    }

    pub fn failing_release(id: &str) -> Self {
        Self {
            fail_release: true,
            ..Self::new(id)
        }
    }

    pub fn with_provenance(mut self, ops: Vec<ProvenanceOp>) -> Self {
        self.provenance = ops;
        self
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildResult for FakeResult {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn release(&self) -> BridgeResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(BridgeError::Internal(format!("cannot release {}", self.id)));
        }
        Ok(())
    }
}

impl CachedResult for FakeResult {
    fn cache_keys(&self) -> Vec<ExportableCacheKey> {
        vec![ExportableCacheKey::unexported(cache_key(&self.id))]
    }

    fn provenance(&self) -> Vec<ProvenanceOp> {
        self.provenance.clone()
    }
}

pub struct FakeCacheManager {
    id: String,
    queries: AtomicUsize,
}

impl FakeCacheManager {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheManager for FakeCacheManager {
    fn id(&self) -> &str {
        &self.id
    }

    async fn query(
        &self,
        _inputs: &[CacheKeyWithSelector],
        _input_index: usize,
        dgst: &Digest,
        output_index: usize,
    ) -> BridgeResult<Vec<CacheKey>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(vec![CacheKey {
            id: format!("{}-hit", self.id),
            digest: dgst.clone(),
            output: output_index,
        }])
    }

    async fn records(&self, key: &CacheKey) -> BridgeResult<Vec<CacheRecord>> {
        Ok(vec![CacheRecord {
            id: format!("{}-record", key.id),
            key: key.clone(),
            created_at: Utc::now(),
            size: 0,
            priority: 0,
        }])
    }

    async fn load(&self, record: &CacheRecord) -> BridgeResult<ResultRef> {
        Ok(Arc::new(FakeResult::new(&record.id)))
    }

    async fn save(
        &self,
        key: &CacheKey,
        _result: ResultRef,
        _created_at: DateTime<Utc>,
    ) -> BridgeResult<ExportableCacheKey> {
        Ok(ExportableCacheKey {
            key: key.clone(),
            exporter: Some(self.id.clone()),
        })
    }

    async fn release_unreferenced(&self) -> BridgeResult<()> {
        Ok(())
    }
}

struct FakeImporter;

#[async_trait]
impl CacheImporter for FakeImporter {
    async fn resolve(
        &self,
        _desc: Descriptor,
        id: &str,
        _worker: Arc<dyn Worker>,
    ) -> BridgeResult<Option<Arc<dyn CacheManager>>> {
        Ok(Some(Arc::new(FakeCacheManager::new(id))))
    }
}

pub struct FakeImporterResolver {
    failure: Option<String>,
    resolutions: AtomicUsize,
}

impl FakeImporterResolver {
    pub fn new() -> Self {
        Self {
            failure: None,
            resolutions: AtomicUsize::new(0),
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            failure: Some(msg.to_string()),
            resolutions: AtomicUsize::new(0),
        }
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheImporterResolver for FakeImporterResolver {
    async fn resolve(
        &self,
        attrs: &BTreeMap<String, String>,
    ) -> BridgeResult<(Arc<dyn CacheImporter>, Descriptor)> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.failure {
            return Err(BridgeError::CacheImport(msg.clone()));
        }
        let desc = Descriptor {
            media_type: "application/vnd.oci.image.index.v1+json".to_string(),
            digest: Digest::from_bytes(&serde_json::to_vec(attrs)?),
            size: 0,
            annotations: BTreeMap::new(),
        };
        Ok((Arc::new(FakeImporter), desc))
    }
}

#[derive(Default)]
pub struct FakeExecutor {
    runs: AtomicUsize,
    execs: AtomicUsize,
}

impl FakeExecutor {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn execs(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn run(
        &self,
        _id: &str,
        _rootfs: Mount,
        _mounts: Vec<Mount>,
        _process: ProcessInfo,
        started: Option<oneshot::Sender<()>>,
    ) -> BridgeResult<Option<Box<dyn ResourceRecorder>>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(started) = started {
            let _ = started.send(());
        }
        Ok(None)
    }

    async fn exec(&self, _id: &str, _process: ProcessInfo) -> BridgeResult<()> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeWorker {
    id: String,
    pub executor: Arc<FakeExecutor>,
    executor_requests: AtomicUsize,
    pruned: Mutex<Vec<String>>,
    resolved: Mutex<Vec<SourceOp>>,
}

impl FakeWorker {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            executor: Arc::new(FakeExecutor::default()),
            executor_requests: AtomicUsize::new(0),
            pruned: Mutex::new(vec![]),
            resolved: Mutex::new(vec![]),
        }
    }

    pub fn executor_requests(&self) -> usize {
        self.executor_requests.load(Ordering::SeqCst)
    }

    pub fn pruned(&self) -> Vec<String> {
        self.pruned.lock().unwrap().clone()
    }

    pub fn resolved(&self) -> Vec<SourceOp> {
        self.resolved.lock().unwrap().clone()
    }
}

#[async_trait]
impl Worker for FakeWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn executor(&self) -> Arc<dyn Executor> {
        self.executor_requests.fetch_add(1, Ordering::SeqCst);
        self.executor.clone()
    }

    async fn prune_cache_mounts(&self, ids: &[String]) -> BridgeResult<()> {
        self.pruned.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }

    async fn resolve_source_metadata(
        &self,
        op: &SourceOp,
        _opt: &ResolveOpt,
    ) -> BridgeResult<MetaResponse> {
        self.resolved.lock().unwrap().push(op.clone());
        Ok(MetaResponse {
            op: op.clone(),
            digest: Some(Digest::from_bytes(op.identifier.as_bytes())),
            config: None,
        })
    }
}

pub struct FakeWorkers {
    workers: Vec<Arc<FakeWorker>>,
}

impl FakeWorkers {
    pub fn new(workers: Vec<Arc<FakeWorker>>) -> Self {
        Self { workers }
    }
}

impl WorkerController for FakeWorkers {
    fn default_worker(&self) -> BridgeResult<Arc<dyn Worker>> {
        self.workers
            .first()
            .map(|w| w.clone() as Arc<dyn Worker>)
            .ok_or_else(|| BridgeError::Worker("no workers available".to_string()))
    }

    fn workers(&self) -> Vec<Arc<dyn Worker>> {
        self.workers
            .iter()
            .map(|w| w.clone() as Arc<dyn Worker>)
            .collect()
    }
}

/// Scripted outcome of one `build` call
pub enum Step {
    Succeed,
    Fail(String),
    /// Fail with an exec error owning one input and one mount result
    ExecFail(String),
    WaitForCancel,
    /// Wait for cancellation, then fail owning an input whose release fails
    CanceledWithPartials,
}

pub struct FakeBuilder {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    entitlements: EntitlementSet,
    policy: Option<SourcePolicy>,
    progress: Option<Arc<dyn ProgressWriter>>,
    results: Mutex<Vec<Arc<FakeResult>>>,
    edges: Mutex<Vec<Edge>>,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            gate: None,
            entitlements: EntitlementSet::new(),
            policy: None,
            progress: None,
            results: Mutex::new(vec![]),
            edges: Mutex::new(vec![]),
        }
    }

    /// Queue the outcome of the next build; builds succeed once the script runs out
    pub fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    /// Hold every build until the gate is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_entitlements(mut self, entitlements: EntitlementSet) -> Self {
        self.entitlements = entitlements;
        self
    }

    pub fn with_policy(mut self, policy: SourcePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressWriter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every result handed out so far, partial ones included
    pub fn results(&self) -> Vec<Arc<FakeResult>> {
        self.results.lock().unwrap().clone()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.edges.lock().unwrap().clone()
    }

    fn produce(&self, id: String) -> Arc<FakeResult> {
        self.keep(FakeResult::new(&id))
    }

    fn keep(&self, res: FakeResult) -> Arc<FakeResult> {
        let res = Arc::new(res);
        self.results.lock().unwrap().push(res.clone());
        res
    }
}

#[async_trait]
impl Builder for FakeBuilder {
    async fn build(&self, cancel: &CancellationToken, edge: Edge) -> BridgeResult<CachedResultRef> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.edges.lock().unwrap().push(edge.clone());

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = gate.notified() => {}
                _ = cancel.cancelled() => return Err(BridgeError::Canceled),
            }
        }

        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Succeed);
        let dgst = edge.vertex.digest.clone();
        match step {
            Step::Succeed => {
                let mut ops = Vec::new();
                edge.walk(&mut |v: &Arc<crate::loader::Vertex>| {
                    ops.push(ProvenanceOp {
                        digest: v.digest.clone(),
                        op: v.op.clone(),
                    })
                });
                let res = Arc::new(FakeResult::new(&format!("result-{}", n)).with_provenance(ops));
                self.results.lock().unwrap().push(res.clone());
                Ok(res as CachedResultRef)
            }
            Step::Fail(msg) => Err(BridgeError::vertex(dgst, BridgeError::Executor(msg))),
            Step::ExecFail(msg) => {
                let input = self.produce(format!("input-{}", n));
                let mount = self.produce(format!("mount-{}", n));
                let err = ExecError::new(
                    BridgeError::Executor(msg),
                    vec![input as ResultRef],
                    vec![mount as ResultRef],
                );
                Err(BridgeError::vertex(dgst, BridgeError::Exec(err)))
            }
            Step::WaitForCancel => {
                cancel.cancelled().await;
                Err(BridgeError::Canceled)
            }
            Step::CanceledWithPartials => {
                cancel.cancelled().await;
                let input = self.keep(FakeResult::failing_release(&format!("input-{}", n)));
                let mount = self.produce(format!("mount-{}", n));
                let err = ExecError::new(
                    BridgeError::Canceled,
                    vec![input as ResultRef],
                    vec![mount as ResultRef],
                );
                Err(BridgeError::vertex(dgst, BridgeError::Exec(err)))
            }
        }
    }

    fn entitlements(&self) -> BridgeResult<EntitlementSet> {
        Ok(self.entitlements.clone())
    }

    fn source_policy(&self) -> BridgeResult<Option<SourcePolicy>> {
        Ok(self.policy.clone())
    }

    fn progress(&self) -> Option<Arc<dyn ProgressWriter>> {
        self.progress.clone()
    }
}
