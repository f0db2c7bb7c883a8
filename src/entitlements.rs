//! Capability grants a build request may hold
//!
//! Host networking, relaxed sandboxing and device access are denied unless
//! the request was explicitly granted the matching entitlement.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Entitlement {
    NetworkHost,
    SecurityInsecure,
    Device,
}

impl Entitlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkHost => "network.host",
            Self::SecurityInsecure => "security.insecure",
            Self::Device => "device",
        }
    }
}

impl fmt::Display for Entitlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entitlement {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "network.host" => Ok(Self::NetworkHost),
            "security.insecure" => Ok(Self::SecurityInsecure),
            "device" => Ok(Self::Device),
            other => Err(BridgeError::UnknownEntitlement(other.to_string())),
        }
    }
}

impl TryFrom<String> for Entitlement {
    type Error = BridgeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Entitlement> for String {
    fn from(e: Entitlement) -> Self {
        e.as_str().to_string()
    }
}

/// Capabilities requested by a single process or node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Values {
    pub network_host: bool,
    pub security_insecure: bool,
}

/// Entitlements granted to a build request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSet(BTreeSet<Entitlement>);

impl EntitlementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of entitlement names
    pub fn parse<S: AsRef<str>>(names: &[S]) -> BridgeResult<Self> {
        names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<BridgeResult<BTreeSet<_>>>()
            .map(Self)
    }

    pub fn with(mut self, entitlement: Entitlement) -> Self {
        self.0.insert(entitlement);
        self
    }

    pub fn allows(&self, entitlement: Entitlement) -> bool {
        self.0.contains(&entitlement)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entitlement> {
        self.0.iter()
    }

    /// Fail with the first requested capability that was not granted
    pub fn check(&self, values: Values) -> BridgeResult<()> {
        if values.network_host && !self.allows(Entitlement::NetworkHost) {
            return Err(BridgeError::EntitlementDenied(Entitlement::NetworkHost));
        }
        if values.security_insecure && !self.allows(Entitlement::SecurityInsecure) {
            return Err(BridgeError::EntitlementDenied(Entitlement::SecurityInsecure));
        }
        Ok(())
    }
}

impl FromIterator<Entitlement> for EntitlementSet {
    fn from_iter<I: IntoIterator<Item = Entitlement>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
