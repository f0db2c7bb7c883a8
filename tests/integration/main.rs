//! Integration tests for solvebridge

mod fixtures {
    use solvebridge::graph::{
        CacheOpt, Definition, Digest, ExecOp, Input, Location, Locations, Meta, Mount, MountType,
        NetMode, Op, OpMetadata, Range, SourceInfo, SourceMap, SourceOp,
    };
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    pub const ALPINE: &str = "docker-image://docker.io/library/alpine:latest";

    /// Single image source with its instruction on the given Dockerfile lines
    pub fn image_definition(identifier: &str, lines: &[u32]) -> (Definition, Digest) {
        let src = Op::source(SourceOp::new(identifier));
        let dgst = src.digest().unwrap();
        let terminal = Op::terminal(Input {
            digest: dgst.clone(),
            index: 0,
        });

        let locations = lines
            .iter()
            .map(|line| Location {
                source_index: 0,
                ranges: vec![Range::lines(*line, *line)],
            })
            .collect();
        let source = SourceMap {
            locations: HashMap::from([(dgst.clone(), Locations { locations })]),
            infos: vec![SourceInfo {
                filename: "Dockerfile".to_string(),
                language: Some("Dockerfile".to_string()),
                data: None,
            }],
        };

        let def = Definition {
            ops: vec![src, terminal],
            metadata: HashMap::new(),
            source: Some(source),
        };
        (def, dgst)
    }

    /// Image source followed by an exec with a cache mount
    pub fn exec_definition(network: NetMode, ignore_cache: bool) -> Definition {
        let src = Op::source(SourceOp::new(ALPINE));
        let src_dgst = src.digest().unwrap();
        let exec = Op::exec(
            ExecOp {
                meta: Meta {
                    args: vec!["apk".to_string(), "add".to_string(), "git".to_string()],
                    cwd: "/".to_string(),
                    ..Default::default()
                },
                mounts: vec![
                    Mount {
                        input: Some(0),
                        dest: "/".to_string(),
                        output: Some(0),
                        ..Default::default()
                    },
                    Mount {
                        dest: "/var/cache/apk".to_string(),
                        mount_type: MountType::Cache,
                        cache_opt: Some(CacheOpt {
                            id: "apk-cache".to_string(),
                            sharing: Default::default(),
                        }),
                        ..Default::default()
                    },
                ],
                network,
                security: Default::default(),
            },
            vec![Input {
                digest: src_dgst,
                index: 0,
            }],
        );
        let exec_dgst = exec.digest().unwrap();
        let terminal = Op::terminal(Input {
            digest: exec_dgst.clone(),
            index: 0,
        });

        let mut metadata = HashMap::new();
        if ignore_cache {
            metadata.insert(
                exec_dgst,
                OpMetadata {
                    ignore_cache: true,
                    ..Default::default()
                },
            );
        }

        Definition {
            ops: vec![src, exec, terminal],
            metadata,
            source: None,
        }
    }

    pub fn write_json(dir: &Path, name: &str, value: &impl serde::Serialize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    pub fn deny_policy(pattern: &str) -> serde_json::Value {
        serde_json::json!({
            "version": 1,
            "rules": [
                { "action": "DENY", "selector": { "identifier": pattern } }
            ]
        })
    }
}

mod cli_tests {
    use super::fixtures::*;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use solvebridge::graph::NetMode;
    use tempfile::TempDir;

    /// Command isolated from the user's configuration
    fn solvebridge(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("solvebridge");
        cmd.env_remove("SOLVEBRIDGE_CONFIG")
            .arg("--config")
            .arg(temp.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("solvebridge")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("inspect"))
            .stdout(predicate::str::contains("cache-key"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("solvebridge")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("solvebridge"));
    }

    #[test]
    fn config_path_follows_flag() {
        let temp = TempDir::new().unwrap();
        solvebridge(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                temp.path().join("config.toml").display().to_string(),
            ));
    }

    #[test]
    fn config_init_then_show() {
        let temp = TempDir::new().unwrap();
        solvebridge(&temp)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(temp.path().join("config.toml").exists());

        solvebridge(&temp)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));

        solvebridge(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[entitlements]"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[general\n").unwrap();
        solvebridge(&temp)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn cache_key_registry_ref() {
        let temp = TempDir::new().unwrap();
        solvebridge(&temp)
            .args([
                "cache-key",
                "--type",
                "registry",
                "--attr",
                "ref=ghcr.io/acme/app:cache",
                "--attr",
                "mode=max",
            ])
            .assert()
            .success()
            .stdout("ghcr.io/acme/app:cache\n");
    }

    #[test]
    fn cache_key_ignores_attr_order() {
        let temp = TempDir::new().unwrap();
        let first = solvebridge(&temp)
            .args(["cache-key", "-t", "local", "-a", "src=/a", "-a", "digest=x"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let second = solvebridge(&temp)
            .args(["cache-key", "-t", "local", "-a", "digest=x", "-a", "src=/a"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        assert_eq!(first, second);
        assert!(String::from_utf8_lossy(&first).starts_with("local:"));
    }

    #[test]
    fn policy_check_reports_each_file() {
        let temp = TempDir::new().unwrap();
        let good = write_json(temp.path(), "good.json", &deny_policy("docker-image://*"));
        let bad = write_json(
            temp.path(),
            "bad.json",
            &serde_json::json!({ "rules": [ { "action": "CONVERT", "selector": { "identifier": "*" } } ] }),
        );

        solvebridge(&temp)
            .args(["policy", "check"])
            .arg(&good)
            .assert()
            .success()
            .stdout(predicate::str::contains("1 rules"));

        solvebridge(&temp)
            .args(["policy", "check"])
            .arg(&good)
            .arg(&bad)
            .assert()
            .failure()
            .stdout(predicate::str::contains("bad.json"))
            .stderr(predicate::str::contains("1 of 2 policy files are invalid"));
    }

    #[test]
    fn policy_eval_converts_and_denies() {
        let temp = TempDir::new().unwrap();
        let convert = write_json(
            temp.path(),
            "convert.json",
            &serde_json::json!({
                "rules": [{
                    "action": "CONVERT",
                    "selector": { "identifier": "docker-image://docker.io/library/alpine:*" },
                    "updates": { "identifier": "docker-image://mirror.local/library/alpine:$1" }
                }]
            }),
        );
        solvebridge(&temp)
            .args(["policy", "eval"])
            .arg(&convert)
            .arg(ALPINE)
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "docker-image://mirror.local/library/alpine:latest",
            ));

        let deny = write_json(temp.path(), "deny.json", &deny_policy("docker-image://*"));
        solvebridge(&temp)
            .args(["policy", "eval"])
            .arg(&deny)
            .arg(ALPINE)
            .assert()
            .failure()
            .stderr(predicate::str::contains("denied by policy"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn inspect_lists_vertices_and_pruned_mounts() {
        let temp = TempDir::new().unwrap();
        let def = write_json(
            temp.path(),
            "def.json",
            &exec_definition(NetMode::Sandbox, true),
        );

        solvebridge(&temp)
            .arg("inspect")
            .arg(&def)
            .args(["--platform", "linux/x86_64"])
            .assert()
            .success()
            .stdout(predicate::str::contains("exec apk add git"))
            .stdout(predicate::str::contains("linux/amd64"))
            .stdout(predicate::str::contains("apk-cache"))
            .stdout(predicate::str::contains("2 vertices"));
    }

    #[test]
    fn inspect_requires_network_entitlement() {
        let temp = TempDir::new().unwrap();
        let def = write_json(temp.path(), "def.json", &exec_definition(NetMode::Host, false));

        solvebridge(&temp)
            .arg("inspect")
            .arg(&def)
            .assert()
            .failure()
            .stderr(predicate::str::contains("network.host is not allowed"));

        solvebridge(&temp)
            .arg("inspect")
            .arg(&def)
            .args(["--allow", "network.host"])
            .assert()
            .success();
    }

    #[test]
    fn inspect_points_at_denied_instruction() {
        let temp = TempDir::new().unwrap();
        let (def, _) = image_definition(ALPINE, &[1]);
        let def = write_json(temp.path(), "def.json", &def);
        let policy = write_json(
            temp.path(),
            "policy.json",
            &deny_policy("docker-image://docker.io/library/alpine:*"),
        );

        solvebridge(&temp)
            .arg("inspect")
            .arg(&def)
            .arg("--policy")
            .arg(&policy)
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to load build graph"))
            .stderr(predicate::str::contains("denied by policy"))
            .stderr(predicate::str::contains("Dockerfile:1"));
    }

    #[test]
    fn inspect_applies_configured_policy() {
        let temp = TempDir::new().unwrap();
        let (def, _) = image_definition(ALPINE, &[]);
        let def = write_json(temp.path(), "def.json", &def);
        let policy = write_json(temp.path(), "ambient.json", &deny_policy("docker-image://*"));
        std::fs::write(
            temp.path().join("config.toml"),
            format!("[policy]\npath = {:?}\n", policy.display().to_string()),
        )
        .unwrap();

        solvebridge(&temp)
            .arg("inspect")
            .arg(&def)
            .assert()
            .failure()
            .stderr(predicate::str::contains("denied by policy"));
    }
}

mod bridge_tests {
    use super::fixtures::*;
    use async_trait::async_trait;
    use solvebridge::builder::Builder;
    use solvebridge::cache::{
        cache_source_key, CacheImporter, CacheImporterResolver, CacheManager, CacheOptionsEntry,
        CacheSourceRegistry, Descriptor, ExportableCacheKey,
    };
    use solvebridge::entitlements::{Entitlement, EntitlementSet};
    use solvebridge::error::{BridgeError, BridgeResult};
    use solvebridge::executor::{
        Executor, Meta, Mount, ProcessInfo, ResourceRecorder,
    };
    use solvebridge::graph::{Digest, NetMode, SourceOp};
    use solvebridge::loader::Edge;
    use solvebridge::policy::SourcePolicy;
    use solvebridge::provenance::ProvenanceOp;
    use solvebridge::result::{BuildResult, CachedResult, CachedResultRef};
    use solvebridge::worker::{MetaResponse, ResolveOpt, Worker, WorkerController};
    use solvebridge::{Bridge, SolveRequest};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug)]
    struct Output {
        id: String,
        releases: AtomicUsize,
    }

    #[async_trait]
    impl BuildResult for Output {
        fn id(&self) -> String {
            self.id.clone()
        }

        async fn release(&self) -> BridgeResult<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl CachedResult for Output {
        fn cache_keys(&self) -> Vec<ExportableCacheKey> {
            vec![]
        }

        fn provenance(&self) -> Vec<ProvenanceOp> {
            vec![]
        }
    }

    #[derive(Default)]
    struct RecordingBuilder {
        entitlements: EntitlementSet,
        edges: Mutex<Vec<Edge>>,
    }

    #[async_trait]
    impl Builder for RecordingBuilder {
        async fn build(
            &self,
            _cancel: &CancellationToken,
            edge: Edge,
        ) -> BridgeResult<CachedResultRef> {
            let id = edge.vertex.digest.to_string();
            self.edges.lock().unwrap().push(edge);
            Ok(Arc::new(Output {
                id,
                releases: AtomicUsize::new(0),
            }))
        }

        fn entitlements(&self) -> BridgeResult<EntitlementSet> {
            Ok(self.entitlements.clone())
        }

        fn source_policy(&self) -> BridgeResult<Option<SourcePolicy>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Executor for CountingExecutor {
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
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct LocalWorker {
        executor: Arc<CountingExecutor>,
    }

    #[async_trait]
    impl Worker for LocalWorker {
        fn id(&self) -> &str {
            "local"
        }

        fn executor(&self) -> Arc<dyn Executor> {
            self.executor.clone()
        }

        async fn prune_cache_mounts(&self, _ids: &[String]) -> BridgeResult<()> {
            Ok(())
        }

        async fn resolve_source_metadata(
            &self,
            op: &SourceOp,
            _opt: &ResolveOpt,
        ) -> BridgeResult<MetaResponse> {
            Ok(MetaResponse {
                op: op.clone(),
                digest: None,
                config: None,
            })
        }
    }

    struct Workers(Arc<LocalWorker>);

    impl WorkerController for Workers {
        fn default_worker(&self) -> BridgeResult<Arc<dyn Worker>> {
            Ok(self.0.clone())
        }

        fn workers(&self) -> Vec<Arc<dyn Worker>> {
            vec![self.0.clone()]
        }
    }

    struct EmptyImporter;

    #[async_trait]
    impl CacheImporter for EmptyImporter {
        async fn resolve(
            &self,
            _desc: Descriptor,
            _id: &str,
            _worker: Arc<dyn Worker>,
        ) -> BridgeResult<Option<Arc<dyn CacheManager>>> {
            Ok(None)
        }
    }

    struct EmptyResolver;

    #[async_trait]
    impl CacheImporterResolver for EmptyResolver {
        async fn resolve(
            &self,
            _attrs: &BTreeMap<String, String>,
        ) -> BridgeResult<(Arc<dyn CacheImporter>, Descriptor)> {
            Ok((
                Arc::new(EmptyImporter),
                Descriptor {
                    media_type: "application/vnd.oci.image.index.v1+json".to_string(),
                    digest: Digest::from_bytes(b"index"),
                    size: 0,
                    annotations: BTreeMap::new(),
                },
            ))
        }
    }

    struct Harness {
        bridge: Arc<Bridge>,
        builder: Arc<RecordingBuilder>,
        executor: Arc<CountingExecutor>,
    }

    fn harness(entitlements: EntitlementSet) -> Harness {
        let builder = Arc::new(RecordingBuilder {
            entitlements,
            ..Default::default()
        });
        let executor = Arc::new(CountingExecutor::default());
        let worker = Arc::new(LocalWorker {
            executor: executor.clone(),
        });
        let registry = CacheSourceRegistry::new().with_importer("registry", Arc::new(EmptyResolver));
        let bridge = Bridge::new(
            builder.clone(),
            Arc::new(Workers(worker)),
            Arc::new(registry),
        );
        Harness {
            bridge: Arc::new(bridge),
            builder,
            executor,
        }
    }

    fn rootfs() -> Mount {
        Mount {
            src: Arc::new(Output {
                id: "rootfs".to_string(),
                releases: AtomicUsize::new(0),
            }),
            dest: "/".to_string(),
            readonly: false,
            selector: None,
        }
    }

    #[tokio::test]
    async fn identical_cache_refs_share_one_manager() {
        let h = harness(EntitlementSet::new());
        let (def, _) = image_definition(ALPINE, &[]);
        let entry = CacheOptionsEntry::new("registry")
            .with_attr("ref", "ghcr.io/acme/app:cache")
            .with_attr("mode", "max");
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let res = h
                .bridge
                .load_result(&cancel, &def, &[entry.clone(), entry.clone()], &[])
                .await
                .unwrap();
            res.release().await.unwrap();
        }

        let registry = h.bridge.cache_sources();
        assert_eq!(registry.len(), 1);
        assert!(registry
            .get(&cache_source_key(&entry).unwrap())
            .is_some());

        let edges = h.builder.edges.lock().unwrap();
        assert_eq!(edges.len(), 2);
        let ids: Vec<&str> = edges[0]
            .vertex
            .options
            .cache_sources
            .iter()
            .map(|cm| cm.id())
            .collect();
        assert_eq!(ids, vec!["ghcr.io/acme/app:cache"; 2]);
    }

    #[tokio::test]
    async fn host_network_needs_entitlement_before_executor() {
        let h = harness(EntitlementSet::new());
        let process = ProcessInfo::new(Meta {
            args: vec!["sh".to_string()],
            net_mode: NetMode::Host,
            ..Default::default()
        });

        let err = h
            .bridge
            .run("denied", rootfs(), vec![], process.clone(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::EntitlementDenied(Entitlement::NetworkHost)
        ));
        assert_eq!(h.executor.runs.load(Ordering::SeqCst), 0);

        let granted = harness(EntitlementSet::new().with(Entitlement::NetworkHost));
        let (tx, rx) = oneshot::channel();
        granted
            .bridge
            .run("allowed", rootfs(), vec![], process, Some(tx))
            .await
            .unwrap();
        rx.await.unwrap();
        assert_eq!(granted.executor.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn proxy_error_names_every_source_range_in_order() {
        let h = harness(EntitlementSet::new());
        let (def, _) = image_definition(ALPINE, &[2, 5]);
        let policy: SourcePolicy =
            serde_json::from_value(deny_policy("docker-image://*")).unwrap();
        let proxy = h.bridge.new_result_proxy(SolveRequest {
            definition: Arc::new(def),
            source_policies: vec![Some(policy)],
            ..Default::default()
        });

        let cancel = CancellationToken::new();
        let err = proxy.result(&cancel).await.unwrap_err();
        let locations: Vec<String> = err
            .source_locations()
            .iter()
            .map(|l| l.to_string())
            .collect();
        assert_eq!(locations, vec!["Dockerfile:2", "Dockerfile:5"]);

        // memoized failure is translated the same way again
        let again = proxy.result(&cancel).await.unwrap_err();
        assert_eq!(again.source_locations().len(), 2);
        assert!(h.builder.edges.lock().unwrap().is_empty());
        proxy.release().await.unwrap();
    }
}
