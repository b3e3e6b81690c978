//! Capability-based permission system for the evaluator process itself.
//!
//! Capabilities control which collaborator operations (§6.2: filesystem,
//! shell, HTTP, MCP, code runners) the evaluator is allowed to invoke at
//! all — the outermost gate, checked before guard clauses ever run. Where
//! [`crate::guard`] evaluates author-written `/guard` policy per value, a
//! `CapabilitySet` is the host's own sandbox profile for the whole
//! evaluation (e.g. "this embedding never allows shell exec").
//!
//! # Usage
//!
//! ```
//! use mlld_core::capability::{Capability, CapabilitySet};
//!
//! let caps = CapabilitySet::new(vec![
//!     Capability::CallFunction("read_file".into()),
//!     Capability::CallFunction("fetch".into()),
//! ]);
//!
//! assert!(caps.allows_function("read_file"));
//! assert!(!caps.allows_function("exec_command"));
//! ```

use std::fmt;

/// A single permission grant.
///
/// Each variant represents a class of collaborator operation the evaluator
/// is allowed to perform. The capability is checked against the operation's
/// name before `Environment` delegates to the actual collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Permission to invoke a specific collaborator operation by name
    /// (e.g. `"fs:read"`, `"shell:exec"`).
    CallFunction(String),

    /// Permission to invoke any collaborator operation (wildcard).
    ///
    /// Use with caution — this bypasses per-operation checks. Appropriate
    /// for trusted embeddings such as a local CLI.
    CallAnyFunction,

    /// Permission to perform operations on host-managed proxy objects
    /// (e.g. MCP resource handles). Without this capability, proxy method
    /// calls are denied regardless of `CallFunction`/`CallAnyFunction`.
    ProxyAccess,

    /// Custom capability identified by a string key, for domain-specific
    /// permissions that don't fit the built-in categories. The host is
    /// responsible for interpreting these.
    Custom(String),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallFunction(name) => write!(f, "call:{name}"),
            Self::CallAnyFunction => f.write_str("call:*"),
            Self::ProxyAccess => f.write_str("proxy:*"),
            Self::Custom(key) => write!(f, "custom:{key}"),
        }
    }
}

/// Error returned when an operation is denied by the capability set.
#[derive(Debug, Clone)]
pub struct PermissionDenied {
    /// Human-readable description of the denied operation.
    pub operation: String,
    /// Capability that would have been required.
    pub required: String,
}

impl fmt::Display for PermissionDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PermissionError: {} denied (requires capability '{}')",
            self.operation, self.required
        )
    }
}

impl std::error::Error for PermissionDenied {}

/// A set of granted capabilities for one evaluation (§5 "shared resources").
///
/// The capability set is immutable once created — capabilities cannot be
/// escalated during evaluation. A child `Environment` inherits its parent's
/// set verbatim (see `Environment::create_child`).
///
/// An empty capability set (`CapabilitySet::none()`) denies every
/// collaborator operation, making the evaluation a pure computation with no
/// host interaction (no file reads, no shell, no network).
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    capabilities: Vec<Capability>,
}

impl CapabilitySet {
    /// Creates a new capability set with the given permissions.
    #[must_use]
    pub fn new(capabilities: Vec<Capability>) -> Self {
        Self { capabilities }
    }

    /// Creates an empty capability set that denies everything.
    ///
    /// This is the most restrictive profile — directives can still compute,
    /// but every `readFile`/`executeCommand` call is denied.
    #[must_use]
    pub fn none() -> Self {
        Self {
            capabilities: Vec::new(),
        }
    }

    /// Creates a capability set that allows all operations.
    ///
    /// The default for `Environment::root` — matches running without a
    /// sandbox profile at all, for trusted embeddings such as a local CLI.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            capabilities: vec![Capability::CallAnyFunction, Capability::ProxyAccess],
        }
    }

    /// Checks whether a specific collaborator operation is allowed.
    ///
    /// Returns `Ok(())` if `operation` matches a `CallFunction` capability
    /// or if `CallAnyFunction` is granted. Returns `Err(PermissionDenied)` otherwise.
    pub fn check_function_call(&self, operation: &str) -> Result<(), PermissionDenied> {
        for cap in &self.capabilities {
            match cap {
                Capability::CallAnyFunction => return Ok(()),
                Capability::CallFunction(name) if name == operation => return Ok(()),
                _ => {}
            }
        }
        Err(PermissionDenied {
            operation: format!("collaborator operation '{operation}'"),
            required: format!("call:{operation}"),
        })
    }

    /// Checks whether proxy object access is allowed.
    ///
    /// Returns `Ok(())` if `ProxyAccess` is granted. Returns `Err(PermissionDenied)`
    /// otherwise.
    pub fn check_proxy_access(&self, method: &str) -> Result<(), PermissionDenied> {
        for cap in &self.capabilities {
            if matches!(cap, Capability::ProxyAccess) {
                return Ok(());
            }
        }
        Err(PermissionDenied {
            operation: format!("proxy method call '{method}'"),
            required: "proxy:*".into(),
        })
    }

    /// Returns `true` if the given function name is allowed.
    #[must_use]
    pub fn allows_function(&self, function_name: &str) -> bool {
        self.check_function_call(function_name).is_ok()
    }

    /// Returns `true` if proxy access is allowed.
    #[must_use]
    pub fn allows_proxy(&self) -> bool {
        self.check_proxy_access("").is_ok()
    }

    /// Creates a subset of this capability set, retaining only capabilities
    /// that also appear in `restrict`.
    ///
    /// Used when forking sessions to narrow permissions:
    /// ```
    /// # use mlld_core::capability::{Capability, CapabilitySet};
    /// let parent = CapabilitySet::new(vec![
    ///     Capability::CallFunction("read".into()),
    ///     Capability::CallFunction("write".into()),
    /// ]);
    /// let child = parent.subset(&[Capability::CallFunction("read".into())]);
    /// assert!(child.allows_function("read"));
    /// assert!(!child.allows_function("write"));
    /// ```
    #[must_use]
    pub fn subset(&self, restrict: &[Capability]) -> Self {
        let capabilities = self
            .capabilities
            .iter()
            .filter(|cap| restrict.contains(cap))
            .cloned()
            .collect();
        Self { capabilities }
    }

    /// Returns the capabilities as a slice for inspection.
    #[must_use]
    pub fn as_slice(&self) -> &[Capability] {
        &self.capabilities
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.capabilities.is_empty() {
            return f.write_str("CapabilitySet(none)");
        }
        f.write_str("CapabilitySet(")?;
        for (i, cap) in self.capabilities.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{cap}")?;
        }
        f.write_str(")")
    }
}
