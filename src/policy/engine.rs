//! Rule evaluation for source policies

use super::{AttrMatch, MatchType, PolicyAction, SourcePolicy, Update};
use crate::error::{BridgeError, BridgeResult};
use crate::graph::SourceOp;
use regex::Regex;
use tracing::debug;

/// Upper bound on chained `CONVERT` rewrites of a single source
const MAX_CONVERSIONS: usize = 20;

/// Evaluates source ops against policy rules
///
/// Returns `Ok(true)` when the op was rewritten, `Ok(false)` when it is
/// allowed unchanged and an error when it is rejected.
pub trait SourcePolicyEvaluator: Send + Sync {
    fn evaluate(&self, op: &mut SourceOp) -> BridgeResult<bool>;
}

struct CompiledRule {
    action: PolicyAction,
    matcher: Regex,
    constraints: Vec<CompiledConstraint>,
    updates: Option<Update>,
}

struct CompiledConstraint {
    key: String,
    condition: AttrMatch,
    value: String,
    pattern: Option<Regex>,
}

/// Ordered rule engine: the first matching rule across all policies decides
pub struct Engine {
    rules: Vec<CompiledRule>,
}

impl Engine {
    pub fn new(policies: Vec<SourcePolicy>) -> BridgeResult<Self> {
        let mut rules = Vec::new();
        for policy in policies {
            for rule in policy.rules {
                let Some(selector) = rule.selector else {
                    return Err(BridgeError::InvalidPolicy("missing selector".to_string()));
                };
                let matcher = compile_selector(&selector.identifier, selector.match_type)?;
                let constraints = selector
                    .constraints
                    .into_iter()
                    .map(|c| {
                        let pattern = match c.condition {
                            AttrMatch::Matches => Some(Regex::new(&c.value).map_err(|e| {
                                BridgeError::InvalidPolicy(format!(
                                    "invalid constraint regex for {}: {}",
                                    c.key, e
                                ))
                            })?),
                            _ => None,
                        };
                        Ok(CompiledConstraint {
                            key: c.key,
                            condition: c.condition,
                            value: c.value,
                            pattern,
                        })
                    })
                    .collect::<BridgeResult<Vec<_>>>()?;

                rules.push(CompiledRule {
                    action: rule.action,
                    matcher,
                    constraints,
                    updates: rule.updates,
                });
            }
        }
        Ok(Self { rules })
    }

    /// Apply the first matching rule once
    fn apply(&self, op: &mut SourceOp) -> BridgeResult<bool> {
        for rule in &self.rules {
            if !rule.matches(op) {
                continue;
            }
            match rule.action {
                PolicyAction::Allow => return Ok(false),
                PolicyAction::Deny => {
                    return Err(BridgeError::SourceDenied {
                        identifier: op.identifier.clone(),
                    })
                }
                PolicyAction::Convert => {
                    let Some(update) = &rule.updates else {
                        return Err(BridgeError::InvalidPolicy(
                            "missing updates for CONVERT policy".to_string(),
                        ));
                    };
                    let mut changed = false;
                    if !update.identifier.is_empty() {
                        let rewritten = rule
                            .matcher
                            .replace(&op.identifier, update.identifier.as_str())
                            .into_owned();
                        if rewritten != op.identifier {
                            debug!(from = %op.identifier, to = %rewritten, "source converted by policy");
                            op.identifier = rewritten;
                            changed = true;
                        }
                    }
                    for (key, value) in &update.attrs {
                        if op.attrs.get(key) != Some(value) {
                            op.attrs.insert(key.clone(), value.clone());
                            changed = true;
                        }
                    }
                    return Ok(changed);
                }
            }
        }
        Ok(false)
    }
}

impl SourcePolicyEvaluator for Engine {
    fn evaluate(&self, op: &mut SourceOp) -> BridgeResult<bool> {
        let mut mutated = false;
        for _ in 0..MAX_CONVERSIONS {
            if !self.apply(op)? {
                return Ok(mutated);
            }
            mutated = true;
        }
        Err(BridgeError::InvalidPolicy(format!(
            "too many conversions while evaluating {}",
            op.identifier
        )))
    }
}

impl CompiledRule {
    fn matches(&self, op: &SourceOp) -> bool {
        self.matcher.is_match(&op.identifier) && self.constraints.iter().all(|c| c.matches(op))
    }
}

impl CompiledConstraint {
    fn matches(&self, op: &SourceOp) -> bool {
        let actual = op.attrs.get(&self.key);
        match self.condition {
            AttrMatch::Equal => actual == Some(&self.value),
            AttrMatch::NotEqual => actual != Some(&self.value),
            AttrMatch::Matches => match (actual, &self.pattern) {
                (Some(v), Some(re)) => re.is_match(v),
                _ => false,
            },
        }
    }
}

/// Build an anchored regex for a selector identifier
///
/// Wildcards become capture groups so `CONVERT` updates can refer to them
/// as `$1`, `$2`, ...
fn compile_selector(identifier: &str, match_type: MatchType) -> BridgeResult<Regex> {
    let pattern = match match_type {
        MatchType::Exact => format!("^{}$", regex::escape(identifier)),
        MatchType::Regex => identifier.to_string(),
        MatchType::Wildcard => {
            let mut pattern = String::from("^");
            for c in identifier.chars() {
                match c {
                    '*' => pattern.push_str("(.*)"),
                    '?' => pattern.push_str("(.)"),
                    other => pattern.push_str(&regex::escape(&other.to_string())),
                }
            }
            pattern.push('$');
            pattern
        }
    };
    Regex::new(&pattern)
        .map_err(|e| BridgeError::InvalidPolicy(format!("invalid selector {}: {}", identifier, e)))
}
