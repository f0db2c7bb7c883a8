//! Configuration schema for solvebridge
//!
//! Configuration is stored at `~/.config/solvebridge/config.toml`

use crate::entitlements::EntitlementSet;
use crate::error::BridgeResult;
use crate::graph::Platform;
use crate::policy::SourcePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Capabilities granted to builds
    pub entitlements: EntitlementsConfig,

    /// Ambient source policy
    pub policy: PolicyConfig,

    /// Platform normalization
    pub platform: PlatformConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitlementsConfig {
    /// Granted entitlements (`network.host`, `security.insecure`, `device`)
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// JSON source policy evaluated before any policy submitted with a build
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Default platform as `os/arch[/variant]`; the host platform when unset
    pub default: Option<String>,
}

impl Config {
    pub fn entitlements(&self) -> BridgeResult<EntitlementSet> {
        EntitlementSet::parse(self.entitlements.allowed.as_slice())
    }

    pub fn default_platform(&self) -> BridgeResult<Platform> {
        match &self.platform.default {
            Some(p) => Ok(Platform::parse(p)?.normalize()),
            None => Ok(Platform::host()),
        }
    }

    /// Load the ambient policy file, if one is configured
    pub async fn ambient_policy(&self) -> BridgeResult<Option<SourcePolicy>> {
        match &self.policy.path {
            Some(path) => Ok(Some(SourcePolicy::load_from_file(path).await?)),
            None => Ok(None),
        }
    }
}
