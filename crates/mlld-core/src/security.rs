//! `SecurityDescriptor`: the `{labels, taint, sources, policy}` tuple carried
//! by every `Variable` and `StructuredValue` (§3.4).
//!
//! Descriptors are immutable; every operation that would "change" one returns
//! a new descriptor built by [`SecurityDescriptor::merge`] or
//! [`SecurityDescriptor::derive`]. This mirrors the capability model in
//! [`crate::capability`]: neither carries mutable state once constructed.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::intern::{intern, Symbol};
use crate::policy::PolicyConfig;

/// Any label or taint tag beginning with this prefix cannot be removed by a
/// later `merge`/`derive` (§3.4 `labelsProtected`). Taint tags created by the
/// evaluator itself (`src:mcp`, `src:exec`, ...) always use this prefix.
pub const PROTECTED_PREFIX: &str = "src:";

/// A set of interned strings with set semantics, ordered for stable display
/// and serialization (`BTreeSet` over interned symbols: comparing symbols
/// compares their issue order, not lexical order, but that's fine — we only
/// need a total order for determinism, not alphabetical order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet(BTreeSet<Symbol>);

impl LabelSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter<I: IntoIterator<Item = impl AsRef<str>>>(iter: I) -> Self {
        let mut set = BTreeSet::new();
        for s in iter {
            set.insert(intern(s.as_ref()));
        }
        Self(set)
    }

    pub fn insert(&mut self, s: &str) {
        self.0.insert(intern(s));
    }

    #[must_use]
    pub fn contains(&self, s: &str) -> bool {
        self.0.contains(&intern(s))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
        self.0.iter().map(|sym| sym.as_str())
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        self.0.is_superset(&other.0)
    }
}

/// `labelsProtected(l)`: true if `l` can never be dropped once present.
#[must_use]
pub fn label_protected(label: &str, user_declared_protected: &[String]) -> bool {
    label.starts_with(PROTECTED_PREFIX) || user_declared_protected.iter().any(|p| p == label)
}

/// `{labels, taint, sources, policy}` traveling with every value (§3.4).
///
/// Cloning is cheap: the policy slot is reference-counted, and labels/taint
/// are small interned sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityDescriptor {
    pub labels: LabelSet,
    pub taint: LabelSet,
    /// Audit trail, oldest first, stable-deduped on merge.
    pub sources: Vec<String>,
    pub policy: Option<Arc<PolicyConfig>>,
}

impl SecurityDescriptor {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_taint(taint: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self { taint: LabelSet::from_iter(taint), ..Self::default() }
    }

    /// Union labels, union taint, concatenate sources (stable dedup), resolve
    /// policy by "last non-null wins within same scope; union across scopes"
    /// — we approximate "same scope" as "the incoming side owns policy
    /// unless it has none", which matches how callers always pass the more
    /// specific side as `b`.
    #[must_use]
    pub fn merge(a: &Self, b: &Self) -> Self {
        let mut sources = a.sources.clone();
        for s in &b.sources {
            if !sources.contains(s) {
                sources.push(s.clone());
            }
        }
        Self {
            labels: a.labels.union(&b.labels),
            taint: a.taint.union(&b.taint),
            sources,
            policy: b.policy.clone().or_else(|| a.policy.clone()),
        }
    }

    /// Merges any number of descriptors contributed by the inputs of a
    /// derived value. `descriptor(derived) ⊇ ⋃ descriptors(inputs)` (§8).
    #[must_use]
    pub fn merge_all<'a, I: IntoIterator<Item = &'a Self>>(descriptors: I) -> Self {
        descriptors.into_iter().fold(Self::empty(), |acc, d| Self::merge(&acc, d))
    }

    /// `derive(descriptor, newSource, newTaint?)`: merge with a fresh taint
    /// tag and a single new source entry. Used whenever the evaluator itself
    /// produces a value (command output, file read, pipeline stage, MCP call).
    #[must_use]
    pub fn derive(&self, new_source: impl Into<String>, new_taint: Option<&str>) -> Self {
        let mut next = self.clone();
        next.sources.push(new_source.into());
        if let Some(t) = new_taint {
            next.taint.insert(t);
        }
        next
    }

    /// True if this descriptor's ancestry still carries `label`, honoring
    /// protection: callers cannot construct a descriptor that silently drops
    /// a protected label because `merge`/`derive` only ever add to the set.
    #[must_use]
    pub fn carries(&self, label: &str) -> bool {
        self.labels.contains(label) || self.taint.contains(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_associative_on_identical_inputs() {
        let a = SecurityDescriptor::with_taint(["src:exec"]);
        let left = SecurityDescriptor::merge(&SecurityDescriptor::merge(&a, &a), &a);
        let right = SecurityDescriptor::merge(&a, &SecurityDescriptor::merge(&a, &a));
        assert_eq!(left, right);
    }

    #[test]
    fn merge_unions_taint_and_dedups_sources() {
        let a = SecurityDescriptor { sources: vec!["cmd:git".into()], ..SecurityDescriptor::with_taint(["src:exec"]) };
        let b = SecurityDescriptor { sources: vec!["cmd:git".into(), "file:/a.md".into()], ..SecurityDescriptor::with_taint(["src:file"]) };
        let merged = SecurityDescriptor::merge(&a, &b);
        assert!(merged.taint.contains("src:exec"));
        assert!(merged.taint.contains("src:file"));
        assert_eq!(merged.sources, vec!["cmd:git".to_string(), "file:/a.md".to_string()]);
    }

    #[test]
    fn protected_prefix_is_recognized() {
        assert!(label_protected("src:mcp", &[]));
        assert!(!label_protected("public", &[]));
        assert!(label_protected("secret", &["secret".to_string()]));
    }

    #[test]
    fn derive_adds_source_and_taint_without_losing_existing() {
        let base = SecurityDescriptor::with_taint(["src:mcp"]);
        let derived = base.derive("cmd:echo", Some("src:exec"));
        assert!(derived.taint.contains("src:mcp"));
        assert!(derived.taint.contains("src:exec"));
        assert_eq!(derived.sources, vec!["cmd:echo".to_string()]);
    }
}
