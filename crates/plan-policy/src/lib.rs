//! # plan-policy
//!
//! A TOML-driven, deny-by-default policy gate for the plan execution engine
//! (component C4).
//!
//! Rules are declared in a TOML file, evaluated in order, and the first
//! matching rule per capability wins. If no rule matches, the capability is
//! denied.
//!
//! ```rust,ignore
//! use plan_policy::TomlPolicyGate;
//!
//! let gate = TomlPolicyGate::from_file(Path::new("policy.toml"))?;
//! let decision = gate.evaluate(&subject, &action);
//! ```

pub mod engine;
pub mod rule;

pub use engine::{PolicyGate, TomlPolicyGate};
pub use rule::{PolicyConfig, PolicyRule, RuleVerdict};

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use plan_contracts::error::EngineError;
    use plan_contracts::policy::{ActionType, PolicyAction, PolicySubject};

    use super::*;

    fn subject(capabilities: &[&str], approvals: &[(&str, bool)]) -> PolicySubject {
        PolicySubject {
            agent: "test-agent".to_string(),
            tool: "repo-reader".to_string(),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            approvals: approvals.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            run_mode: "live".to_string(),
        }
    }

    fn action(action_type: ActionType, capabilities: &[&str]) -> PolicyAction {
        PolicyAction {
            action_type,
            plan_id: Some("p1".to_string()),
            step_id: Some("s1".to_string()),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            run_mode: "live".to_string(),
        }
    }

    #[test]
    fn deny_by_default_when_no_rules_match() {
        let gate = TomlPolicyGate::from_toml_str("rules = []").unwrap();
        let decision = gate.evaluate(&subject(&[], &[]), &action(ActionType::Dispatch, &["repo.read"]));
        assert!(!decision.allow);
        assert_eq!(decision.deny.len(), 1);
    }

    #[test]
    fn explicit_allow_requires_the_capability_to_be_held() {
        let toml = r#"
            [[rules]]
            id = "allow-repo-read"
            description = "allow repo reads"
            action_type = "dispatch"
            capability = "repo.read"
            verdict = "allow"
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();

        let denied = gate.evaluate(&subject(&[], &[]), &action(ActionType::Dispatch, &["repo.read"]));
        assert!(!denied.allow);

        let allowed = gate.evaluate(
            &subject(&["repo.read"], &[]),
            &action(ActionType::Dispatch, &["repo.read"]),
        );
        assert!(allowed.allow);
    }

    #[test]
    fn explicit_deny_carries_its_reason() {
        let toml = r#"
            [[rules]]
            id = "deny-repo-delete"
            description = "never allow deletes"
            action_type = "*"
            capability = "repo.delete"
            verdict = "deny"
            deny_reason = "deletion is prohibited"
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();
        let decision = gate.evaluate(
            &subject(&["repo.delete"], &[]),
            &action(ActionType::Dispatch, &["repo.delete"]),
        );
        assert!(!decision.allow);
        assert_eq!(decision.deny[0].reason, "deletion is prohibited");
    }

    #[test]
    fn require_approval_without_approval_record_is_approval_required() {
        let toml = r#"
            [[rules]]
            id = "approve-write"
            description = "writes require approval"
            action_type = "dispatch"
            capability = "repo.write"
            verdict = "require-approval"
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();
        let decision = gate.evaluate(&subject(&[], &[]), &action(ActionType::Dispatch, &["repo.write"]));

        assert!(!decision.allow);
        assert!(decision.denies_only_approval_required());
    }

    #[test]
    fn require_approval_with_granted_approval_allows() {
        let toml = r#"
            [[rules]]
            id = "approve-write"
            description = "writes require approval"
            action_type = "dispatch"
            capability = "repo.write"
            verdict = "require-approval"
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();
        let decision = gate.evaluate(
            &subject(&[], &[("repo.write", true)]),
            &action(ActionType::Dispatch, &["repo.write"]),
        );
        assert!(decision.allow);
    }

    #[test]
    fn require_approval_with_rejected_approval_is_hard_deny() {
        let toml = r#"
            [[rules]]
            id = "approve-write"
            description = "writes require approval"
            action_type = "dispatch"
            capability = "repo.write"
            verdict = "require-approval"
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();
        let decision = gate.evaluate(
            &subject(&[], &[("repo.write", false)]),
            &action(ActionType::Dispatch, &["repo.write"]),
        );
        assert!(!decision.allow);
        assert!(!decision.denies_only_approval_required());
    }

    #[test]
    fn wildcard_capability_matches_any_capability() {
        let toml = r#"
            [[rules]]
            id = "allow-all"
            description = "allow everything by default"
            action_type = "admit"
            capability = "*"
            verdict = "allow"
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();
        let decision = gate.evaluate(&subject(&["anything"], &[]), &action(ActionType::Admit, &["anything"]));
        assert!(decision.allow);
    }

    #[test]
    fn first_match_wins() {
        let toml = r#"
            [[rules]]
            id = "first-allow"
            description = "first rule allows"
            action_type = "dispatch"
            capability = "repo.read"
            verdict = "allow"

            [[rules]]
            id = "second-deny"
            description = "should never fire"
            action_type = "dispatch"
            capability = "repo.read"
            verdict = "deny"
            deny_reason = "unreachable"
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();
        let decision = gate.evaluate(
            &subject(&["repo.read"], &[]),
            &action(ActionType::Dispatch, &["repo.read"]),
        );
        assert!(decision.allow);
    }

    #[test]
    fn action_with_no_capabilities_checks_wildcard_only() {
        let toml = r#"
            [[rules]]
            id = "allow-admit"
            description = "admission with no capabilities is allowed"
            action_type = "admit"
            capability = "*"
            verdict = "allow"
        "#;
        let gate = TomlPolicyGate::from_toml_str(toml).unwrap();
        let decision = gate.evaluate(&subject(&[], &[]), &action(ActionType::Admit, &[]));
        assert!(decision.allow);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = TomlPolicyGate::from_toml_str("this is not valid toml ][[[").unwrap_err();
        assert!(matches!(err, EngineError::ConfigError { .. }));
    }
}
