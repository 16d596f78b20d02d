//! Policy rule types and configuration schema.
//!
//! A `PolicyConfig` is deserialized from TOML and holds an ordered list of
//! `PolicyRule`s. Rules are evaluated in declaration order — the first
//! matching rule wins. If no rule matches, the gate denies by default
//! (spec §4.4, "Decision algorithm").

use serde::{Deserialize, Serialize};

/// The decision a rule produces when it matches a capability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleVerdict {
    Allow,
    Deny,
    RequireApproval,
}

/// A single policy rule loaded from TOML.
///
/// Rules are matched in the order they appear in the policy file. The first
/// rule whose `action_type` and `capability` patterns match wins; subsequent
/// rules are not evaluated for that capability.
///
/// Both `action_type` and `capability` support the wildcard `"*"`, which
/// matches any value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Stable identifier used in logs and deny reasons.
    pub id: String,

    /// Human-readable explanation of what this rule controls.
    pub description: String,

    /// The action type to match: `"admit"`, `"dispatch"`, or `"*"`.
    pub action_type: String,

    /// The capability pattern to match. Use `"*"` to match any capability.
    pub capability: String,

    /// The decision this rule produces when it matches.
    pub verdict: RuleVerdict,

    /// Used when `verdict = "deny"`. Falls back to a generic message.
    pub deny_reason: Option<String>,
}

impl PolicyRule {
    /// Return true if this rule matches the given `action_type` and
    /// `capability`.
    pub fn matches(&self, action_type: &str, capability: &str) -> bool {
        let action_matches = self.action_type == "*" || self.action_type == action_type;
        let capability_matches = self.capability == "*" || self.capability == capability;
        action_matches && capability_matches
    }
}

/// The top-level structure deserialized from a TOML policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Ordered list of rules. First match wins.
    pub rules: Vec<PolicyRule>,
}
