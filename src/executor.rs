//! Process execution contract implemented by workers

use crate::error::BridgeResult;
use crate::graph::{NetMode, SecurityMode};
use crate::result::ResultRef;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Process description handed to an executor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub user: String,
    pub tty: bool,
    pub net_mode: NetMode,
    pub security_mode: SecurityMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    pub meta: Meta,
}

impl ProcessInfo {
    pub fn new(meta: Meta) -> Self {
        Self { meta }
    }
}

/// Filesystem mounted into a process
#[derive(Debug, Clone)]
pub struct Mount {
    pub src: ResultRef,
    pub dest: String,
    pub readonly: bool,
    pub selector: Option<String>,
}

/// Resource usage sampling for a running process
pub trait ResourceRecorder: Send + Sync {
    fn close(&self);
}

impl std::fmt::Debug for dyn ResourceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRecorder").finish_non_exhaustive()
    }
}

/// Runs processes in a sandboxed root filesystem
#[async_trait]
pub trait Executor: Send + Sync {
    /// Start a container process; `started` fires once the process runs
    async fn run(
        &self,
        id: &str,
        rootfs: Mount,
        mounts: Vec<Mount>,
        process: ProcessInfo,
        started: Option<oneshot::Sender<()>>,
    ) -> BridgeResult<Option<Box<dyn ResourceRecorder>>>;

    /// Run an additional process inside a running container
    async fn exec(&self, id: &str, process: ProcessInfo) -> BridgeResult<()>;
}
