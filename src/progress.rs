//! Progress events attached to graph nodes

use crate::error::{BridgeError, BridgeResult};
use crate::graph::{Digest, Range, SourceInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Non-fatal diagnostic reported against a graph node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VertexWarning {
    pub id: String,
    pub vertex: Digest,
    pub level: i32,
    pub short: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub range: Vec<Range>,
    pub timestamp: DateTime<Utc>,
}

/// Options for [`crate::bridge::Bridge::warn`]
#[derive(Debug, Clone, Default)]
pub struct WarnOpts {
    /// Severity; `0` is treated as `1`
    pub level: i32,
    pub source_info: Option<SourceInfo>,
    pub range: Vec<Range>,
    pub detail: Vec<String>,
    pub url: Option<String>,
}

pub trait ProgressWriter: Send + Sync {
    fn write_warning(&self, warning: VertexWarning) -> BridgeResult<()>;
}

/// Progress writer backed by an unbounded channel
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<VertexWarning>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VertexWarning>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressWriter for ChannelProgress {
    fn write_warning(&self, warning: VertexWarning) -> BridgeResult<()> {
        self.tx
            .send(warning)
            .map_err(|_| BridgeError::Internal("progress receiver closed".to_string()))
    }
}
