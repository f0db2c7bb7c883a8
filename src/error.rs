//! Error types for solvebridge
//!
//! All modules use `BridgeResult<T>` as their return type.

use crate::entitlements::Entitlement;
use crate::errdefs::{ExecError, SourceLocation};
use crate::graph::Digest;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// All errors that can occur while loading and evaluating build graphs
#[derive(Error, Debug)]
pub enum BridgeError {
    // Policy errors
    #[error("invalid nil policy")]
    NilPolicy,

    #[error("invalid source policy: {0}")]
    InvalidPolicy(String),

    #[error("source {identifier} denied by policy")]
    SourceDenied { identifier: String },

    #[error("could not resolve {identifier} due to policy: {source}")]
    PolicyResolve {
        identifier: String,
        source: Box<BridgeError>,
    },

    // Entitlement errors
    #[error("{0} is not allowed")]
    EntitlementDenied(Entitlement),

    #[error("unknown entitlement: {0}")]
    UnknownEntitlement(String),

    // Cache errors
    #[error("unknown cache importer: {0}")]
    UnknownCacheImporter(String),

    #[error("failed to configure {kind} cache importer: {source}")]
    CacheImporterConfig {
        kind: String,
        source: Box<BridgeError>,
    },

    #[error("cache import failed: {0}")]
    CacheImport(String),

    #[error("cache record not found: {0}")]
    CacheRecordNotFound(String),

    // Graph errors
    #[error("invalid build graph: {0}")]
    InvalidDefinition(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid platform: {0}")]
    InvalidPlatform(String),

    #[error("failed to load build graph: {0}")]
    LoadGraph(Box<BridgeError>),

    /// Failure attributed to a single graph node.
    #[error("{source}")]
    Vertex {
        digest: Digest,
        source: Box<BridgeError>,
    },

    /// Failure annotated with the build instruction that produced the node.
    #[error("{source}")]
    WithSource {
        location: SourceLocation,
        source: Box<BridgeError>,
    },

    // Execution errors
    #[error("{0}")]
    Exec(ExecError),

    #[error("operation canceled")]
    Canceled,

    #[error("{0}")]
    Released(&'static str),

    #[error("failed to capture provenance: {0}")]
    Provenance(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("executor error: {0}")]
    Executor(String),

    /// A memoized error handed to more than one caller.
    #[error("{0}")]
    Shared(Arc<BridgeError>),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Attribute an error to a graph node
    pub fn vertex(digest: Digest, source: BridgeError) -> Self {
        Self::Vertex {
            digest,
            source: Box::new(source),
        }
    }

    /// The error this one wraps, if any
    pub fn inner(&self) -> Option<&BridgeError> {
        match self {
            Self::PolicyResolve { source, .. }
            | Self::CacheImporterConfig { source, .. }
            | Self::Vertex { source, .. }
            | Self::WithSource { source, .. } => Some(source),
            Self::LoadGraph(source) => Some(source),
            Self::Exec(ee) => Some(ee.cause()),
            Self::Shared(shared) => Some(shared),
            _ => None,
        }
    }

    /// Iterate from this error down through every wrapped error
    pub fn chain(&self) -> impl Iterator<Item = &BridgeError> {
        std::iter::successors(Some(self), |e| e.inner())
    }

    /// Whether the failure was caused by cancellation rather than the build itself
    pub fn is_canceled(&self) -> bool {
        self.chain().any(|e| matches!(e, Self::Canceled))
    }

    /// The outermost structural execution error in the chain
    pub fn exec_error(&self) -> Option<&ExecError> {
        self.chain().find_map(|e| match e {
            Self::Exec(ee) => Some(ee),
            _ => None,
        })
    }

    /// Digests of every graph node this error is attributed to, outermost first
    pub fn vertex_digests(&self) -> Vec<&Digest> {
        let mut digests: Vec<&Digest> = Vec::new();
        for e in self.chain() {
            if let Self::Vertex { digest, .. } = e {
                if !digests.contains(&digest) {
                    digests.push(digest);
                }
            }
        }
        digests
    }

    /// Source locations attached to this error, in the order they were attached
    pub fn source_locations(&self) -> Vec<&SourceLocation> {
        let mut locations: Vec<&SourceLocation> = self
            .chain()
            .filter_map(|e| match e {
                Self::WithSource { location, .. } => Some(location),
                _ => None,
            })
            .collect();
        locations.reverse();
        locations
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.chain().any(|e| {
            matches!(
                e,
                Self::Canceled | Self::CacheImport(_) | Self::Worker(_)
            )
        })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        self.chain().find_map(|e| match e {
            Self::EntitlementDenied(Entitlement::NetworkHost) => {
                Some("Grant the build the network.host entitlement")
            }
            Self::EntitlementDenied(Entitlement::SecurityInsecure) => {
                Some("Grant the build the security.insecure entitlement")
            }
            Self::EntitlementDenied(Entitlement::Device) => {
                Some("Grant the build the device entitlement")
            }
            Self::UnknownCacheImporter(_) => Some("Supported cache importers depend on the worker"),
            Self::SourceDenied { .. } => Some("Check the rules of the applied source policies"),
            _ => None,
        })
    }
}
