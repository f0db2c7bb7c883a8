//! Source policies
//!
//! A source policy is an ordered rule set that allows, denies or rewrites
//! references to external build sources. Policies submitted with a request
//! are validated before any work begins; the ambient policy of the build
//! context takes precedence over all of them.

mod engine;

pub use engine::{Engine, SourcePolicyEvaluator};

use crate::error::{BridgeError, BridgeResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePolicy {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: PolicyAction,
    #[serde(default)]
    pub selector: Option<Selector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Update>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyAction {
    Allow,
    Deny,
    Convert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub identifier: String,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<AttrConstraint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchType {
    #[default]
    Wildcard,
    Exact,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrConstraint {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub condition: AttrMatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttrMatch {
    #[default]
    Equal,
    NotEqual,
    Matches,
}

/// Replacement applied by a `CONVERT` rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

impl SourcePolicy {
    /// Read a JSON policy document
    pub async fn load_from_file(path: &Path) -> BridgeResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            BridgeError::io(format!("reading source policy from {}", path.display()), e)
        })?;
        serde_json::from_str(&content)
            .map_err(|e| BridgeError::InvalidPolicy(format!("{}: {}", path.display(), e)))
    }
}

/// Structural validation of a submitted policy
pub fn validate_source_policy(policy: &SourcePolicy) -> BridgeResult<()> {
    for (idx, rule) in policy.rules.iter().enumerate() {
        let selector = rule
            .selector
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidPolicy(format!("rule {}: missing selector", idx)))?;

        if selector.identifier.is_empty() {
            return Err(BridgeError::InvalidPolicy(format!(
                "rule {}: selector identifier must not be empty",
                idx
            )));
        }

        if selector.match_type == MatchType::Regex {
            Regex::new(&selector.identifier).map_err(|e| {
                BridgeError::InvalidPolicy(format!("rule {}: invalid selector regex: {}", idx, e))
            })?;
        }

        for constraint in &selector.constraints {
            if constraint.key.is_empty() {
                return Err(BridgeError::InvalidPolicy(format!(
                    "rule {}: constraint key must not be empty",
                    idx
                )));
            }
            if constraint.condition == AttrMatch::Matches {
                Regex::new(&constraint.value).map_err(|e| {
                    BridgeError::InvalidPolicy(format!(
                        "rule {}: invalid constraint regex for {}: {}",
                        idx, constraint.key, e
                    ))
                })?;
            }
        }

        if rule.action == PolicyAction::Convert {
            match &rule.updates {
                None => {
                    return Err(BridgeError::InvalidPolicy(format!(
                        "rule {}: missing updates for CONVERT policy",
                        idx
                    )))
                }
                Some(update) if update.identifier.is_empty() && update.attrs.is_empty() => {
                    return Err(BridgeError::InvalidPolicy(format!(
                        "rule {}: empty updates for CONVERT policy",
                        idx
                    )))
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Combine the ambient policy with the policies submitted for a request
///
/// Returns `None` when there is nothing to evaluate. A single invalid or
/// missing submitted policy rejects the whole request.
pub fn compose_policies(
    ambient: Option<SourcePolicy>,
    submitted: &[Option<SourcePolicy>],
) -> BridgeResult<Option<Arc<dyn SourcePolicyEvaluator>>> {
    if ambient.is_none() && submitted.is_empty() {
        return Ok(None);
    }

    let mut policies = Vec::with_capacity(submitted.len() + 1);
    for policy in submitted {
        let policy = policy.as_ref().ok_or(BridgeError::NilPolicy)?;
        validate_source_policy(policy)?;
        policies.push(policy.clone());
    }

    if let Some(ambient) = ambient {
        policies.insert(0, ambient);
    }

    Ok(Some(Arc::new(Engine::new(policies)?)))
}
