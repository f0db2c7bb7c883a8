//! Target platform specifiers (`os/arch[/variant]`)

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Runtime target of a graph node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Platform of the machine running the bridge
    pub fn host() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH).normalize()
    }

    /// Parse `os/arch[/variant]`
    pub fn parse(s: &str) -> BridgeResult<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let platform = match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Self::new(*os, *arch),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Self::new(*os, *arch).with_variant(*variant)
            }
            _ => {
                return Err(BridgeError::InvalidPlatform(format!(
                    "'{}' (expected os/arch[/variant])",
                    s
                )))
            }
        };
        Ok(platform.normalize())
    }

    /// Canonicalize OS and architecture aliases
    pub fn normalize(mut self) -> Self {
        self.os = self.os.to_lowercase();
        if self.os == "macos" {
            self.os = "darwin".to_string();
        }

        let arch = self.architecture.to_lowercase();
        let (arch, variant) = match (arch.as_str(), self.variant.as_deref()) {
            ("x86_64" | "x86-64" | "amd64", v) => ("amd64", v.map(str::to_string)),
            ("i386" | "i686" | "386", _) => ("386", None),
            ("aarch64" | "arm64", Some("v8") | None) => ("arm64", None),
            ("aarch64" | "arm64", Some(v)) => ("arm64", Some(v.to_string())),
            ("armhf", _) => ("arm", Some("v7".to_string())),
            ("armel", _) => ("arm", Some("v6".to_string())),
            ("arm", None) => ("arm", Some("v7".to_string())),
            ("arm", Some(v)) => ("arm", Some(v.to_string())),
            (other, v) => (other, v.map(str::to_string)),
        };
        self.architecture = arch.to_string();
        self.variant = variant;
        self
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}/{}/{}", self.os, self.architecture, variant),
            None => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}

impl FromStr for Platform {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
