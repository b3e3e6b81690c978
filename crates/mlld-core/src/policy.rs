//! Policy configuration: named capability allow/deny lists registered via
//! `Environment::recordPolicyConfig` and referenced from a
//! `SecurityDescriptor.policy` slot (§3.4, §4.2).
//!
//! This is distinct from [`crate::capability::CapabilitySet`]: a
//! `CapabilitySet` is what the *evaluator* carries for itself (the sandbox
//! the whole evaluation runs under); `PolicyConfig` is mlld-author-declared
//! policy scoped to a value's provenance, consulted by the guard engine.

use std::collections::HashMap;

/// Named allow/deny capability lists, e.g. `{allow: ["fs:read"], deny: ["fs:write"]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    pub name: String,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl PolicyConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, allow: Vec<String>, deny: Vec<String>) -> Self {
        Self { name: name.into(), allow, deny }
    }

    /// `deny` wins ties: an operation explicitly denied is denied even if
    /// also present in `allow`. An operation absent from both lists is
    /// permitted by default — policies are a blocklist-with-allowlist-escape
    /// hatch, not a default-deny sandbox (that's `CapabilitySet`'s job).
    #[must_use]
    pub fn permits(&self, operation: &str) -> bool {
        if self.deny.iter().any(|d| d == operation) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|a| a == operation)
    }
}

/// `name → policy-config` registry held by an [`crate::environment::Environment`].
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    configs: HashMap<String, PolicyConfig>,
}

impl PolicyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, config: PolicyConfig) {
        self.configs.insert(config.name.clone(), config);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PolicyConfig> {
        self.configs.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_wins_over_allow() {
        let cfg = PolicyConfig::new("p", vec!["fs:read".into()], vec!["fs:read".into()]);
        assert!(!cfg.permits("fs:read"));
    }

    #[test]
    fn empty_allow_list_permits_everything_not_denied() {
        let cfg = PolicyConfig::new("p", vec![], vec!["fs:write".into()]);
        assert!(cfg.permits("fs:read"));
        assert!(!cfg.permits("fs:write"));
    }

    #[test]
    fn registry_round_trips_by_name() {
        let mut reg = PolicyRegistry::new();
        reg.record(PolicyConfig::new("strict", vec![], vec!["net:*".into()]));
        assert!(!reg.get("strict").unwrap().permits("net:*"));
        assert!(reg.get("other").is_none());
    }
}
