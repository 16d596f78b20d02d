//! TOML-driven policy gate implementation.
//!
//! `TomlPolicyGate` loads a `PolicyConfig` from a TOML string or file and
//! implements [`PolicyGate`].
//!
//! Evaluation algorithm (spec §4.4, "Decision algorithm"), run once per
//! capability named on the action:
//!
//! 1. Iterate rules in declaration order.
//! 2. The first rule whose `action_type` and `capability` patterns match the
//!    capability under test wins.
//! 3. `allow` still requires the subject to hold the capability outright —
//!    a matching allow rule cannot substitute for a missing grant.
//! 4. `require-approval` is allowed only if `subject.approvals[capability]`
//!    is `Some(true)`; if the key is absent, the reason is
//!    `DenyReason::approval_required`; if explicitly `false`, it is a hard
//!    deny.
//! 5. No matching rule denies by default.
//!
//! The overall decision is `allow` only if every capability named on the
//! action clears its check; otherwise every collected `DenyReason` is
//! returned together so callers can apply the `denies_only_approval_required`
//! tie-break.

use std::path::Path;

use tracing::{debug, warn};

use plan_contracts::error::{EngineError, EngineResult};
use plan_contracts::policy::{ActionType, DenyReason, PolicyAction, PolicyDecision, PolicySubject};

use crate::rule::{PolicyConfig, RuleVerdict};

/// The pure decision function at the heart of component C4.
pub trait PolicyGate: Send + Sync {
    fn evaluate(&self, subject: &PolicySubject, action: &PolicyAction) -> PolicyDecision;
}

fn action_type_str(action_type: ActionType) -> &'static str {
    match action_type {
        ActionType::Admit => "admit",
        ActionType::Dispatch => "dispatch",
    }
}

/// A [`PolicyGate`] that reads rules from a TOML document.
#[derive(Debug)]
pub struct TomlPolicyGate {
    config: PolicyConfig,
}

impl TomlPolicyGate {
    /// Parse `s` as TOML and build a `TomlPolicyGate`.
    pub fn from_toml_str(s: &str) -> EngineResult<Self> {
        let config: PolicyConfig = toml::from_str(s).map_err(|e| EngineError::ConfigError {
            reason: format!("failed to parse policy TOML: {e}"),
        })?;
        Ok(Self { config })
    }

    /// Read the file at `path` and parse it as TOML policy configuration.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigError {
            reason: format!("failed to read policy file '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check a single capability against the rule set, given the subject's
    /// granted capabilities and recorded approvals.
    fn check_capability(
        &self,
        action_type: &str,
        capability: &str,
        subject: &PolicySubject,
    ) -> Option<DenyReason> {
        for rule in &self.config.rules {
            if !rule.matches(action_type, capability) {
                continue;
            }

            debug!(rule_id = %rule.id, action_type, capability, "policy rule matched");

            return match rule.verdict {
                RuleVerdict::Allow => {
                    if subject.capabilities.iter().any(|c| c == capability) {
                        None
                    } else {
                        Some(DenyReason {
                            reason: format!(
                                "rule '{}' allows capability '{capability}' but subject does not hold it",
                                rule.id
                            ),
                            capability: Some(capability.to_string()),
                        })
                    }
                }
                RuleVerdict::Deny => Some(DenyReason {
                    reason: rule
                        .deny_reason
                        .clone()
                        .unwrap_or_else(|| format!("denied by rule '{}'", rule.id)),
                    capability: Some(capability.to_string()),
                }),
                RuleVerdict::RequireApproval => match subject.approvals.get(capability) {
                    Some(true) => None,
                    Some(false) => Some(DenyReason {
                        reason: format!("approval for capability '{capability}' was rejected"),
                        capability: Some(capability.to_string()),
                    }),
                    None => Some(DenyReason::approval_required(capability)),
                },
            };
        }

        warn!(action_type, capability, "no policy rule matched; denying by default");
        Some(DenyReason {
            reason: format!(
                "denied by default: no policy rule matched action '{action_type}' on capability '{capability}'"
            ),
            capability: Some(capability.to_string()),
        })
    }
}

impl PolicyGate for TomlPolicyGate {
    fn evaluate(&self, subject: &PolicySubject, action: &PolicyAction) -> PolicyDecision {
        let action_type = action_type_str(action.action_type);

        debug!(agent = %subject.agent, tool = %subject.tool, action_type, "evaluating policy");

        if action.capabilities.is_empty() {
            return match self.check_capability(action_type, "*", subject) {
                None => PolicyDecision::allow(),
                Some(reason) => PolicyDecision::deny(vec![reason]),
            };
        }

        let denies: Vec<DenyReason> = action
            .capabilities
            .iter()
            .filter_map(|cap| self.check_capability(action_type, cap, subject))
            .collect();

        if denies.is_empty() {
            PolicyDecision::allow()
        } else {
            PolicyDecision::deny(denies)
        }
    }
}
