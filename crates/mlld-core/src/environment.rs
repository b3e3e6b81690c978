//! `Environment`: the hierarchical, name-keyed scope every directive
//! evaluates against (§3.2, §4.2).
//!
//! A slot-indexed frame stack addressed by compiler-assigned integers would
//! be fast, but it presumes a compiled program that already knows every
//! local's slot. A tree-walking evaluator over a dynamically-extensible
//! directive stream has no such compile pass, so scopes here are name-keyed
//! instead: each `Environment` owns a map of its own bindings and a link to
//! its parent, and lookup walks the chain. A child scope is cheap to
//! create, discards everything on exit, and never lets a write escape
//! upward.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::capability::CapabilitySet;
use crate::collab::Collaborators;
use crate::error::{Diagnostic, EvalError};
use crate::guard::GuardRegistry;
use crate::pipeline::PipelineState;
use crate::policy::PolicyConfig;
use crate::policy::PolicyRegistry;
use crate::security::SecurityDescriptor;
use crate::variable::Variable;

struct Inner {
    parent: Option<Environment>,
    variables: RefCell<HashMap<String, Variable>>,
    collaborators: Collaborators,
    capabilities: CapabilitySet,
    policy_registry: RefCell<PolicyRegistry>,
    guard_registry: RefCell<GuardRegistry>,
    pipeline_state: RefCell<Option<PipelineState>>,
    current_file_path: RefCell<Option<String>>,
    working_directory: RefCell<Option<String>>,
}

/// Cheaply cloneable handle to a scope. Clones share the same underlying
/// bindings (`Rc`); a new scope is made with [`Environment::create_child`],
/// never by cloning.
#[derive(Clone)]
pub struct Environment(Rc<Inner>);

impl Environment {
    #[must_use]
    pub fn root(collaborators: Collaborators) -> Self {
        Self::root_with_capabilities(collaborators, CapabilitySet::unrestricted())
    }

    /// Same as [`Environment::root`], but with an explicit sandbox profile
    /// (§5 "shared resources") instead of the unrestricted default — the
    /// gate a host checks before a guard clause ever runs.
    #[must_use]
    pub fn root_with_capabilities(collaborators: Collaborators, capabilities: CapabilitySet) -> Self {
        Self(Rc::new(Inner {
            parent: None,
            variables: RefCell::new(HashMap::new()),
            collaborators,
            capabilities,
            policy_registry: RefCell::new(PolicyRegistry::new()),
            guard_registry: RefCell::new(GuardRegistry::new()),
            pipeline_state: RefCell::new(None),
            current_file_path: RefCell::new(None),
            working_directory: RefCell::new(None),
        }))
    }

    /// Opens a child scope (`/for` body, `/exe` call frame, `/when` arm).
    /// Writes to the child never touch the parent's bindings (§3.2
    /// lifecycle: "a child's writes never become visible in the parent").
    #[must_use]
    pub fn create_child(&self) -> Self {
        Self(Rc::new(Inner {
            parent: Some(self.clone()),
            variables: RefCell::new(HashMap::new()),
            collaborators: self.0.collaborators.clone(),
            capabilities: self.0.capabilities.clone(),
            policy_registry: RefCell::new(self.0.policy_registry.borrow().clone()),
            guard_registry: RefCell::new(self.0.guard_registry.borrow().clone()),
            pipeline_state: RefCell::new(self.0.pipeline_state.borrow().clone()),
            current_file_path: RefCell::new(self.0.current_file_path.borrow().clone()),
            working_directory: RefCell::new(self.0.working_directory.borrow().clone()),
        }))
    }

    /// Walks the parent chain looking for `name`. Shadowing: the nearest
    /// scope that binds `name` wins.
    #[must_use]
    pub fn get_variable(&self, name: &str) -> Option<Variable> {
        if let Some(v) = self.0.variables.borrow().get(name) {
            return Some(v.clone());
        }
        self.0.parent.as_ref().and_then(|p| p.get_variable(name))
    }

    /// Binds `name` in the current scope only (`/var` assignment semantics:
    /// always local, never a write-through to an outer scope).
    pub fn set_variable(&self, variable: Variable) {
        self.0.variables.borrow_mut().insert(variable.name.clone(), variable);
    }

    #[must_use]
    pub fn has_variable(&self, name: &str) -> bool {
        self.get_variable(name).is_some()
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.0.collaborators
    }

    /// The sandbox profile gating which collaborator operations this
    /// evaluation may invoke at all (§5 "shared resources") — the outermost
    /// check, before any `/guard` clause is consulted.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.0.capabilities
    }

    fn check_capability(&self, op: &str) -> Result<(), Diagnostic> {
        self.0
            .capabilities
            .check_function_call(op)
            .map_err(|denied| Diagnostic::new(EvalError::GuardDenied { guard: "capability".into(), reason: denied.to_string() }))
    }

    /// `readFile` (§4.2): delegates to the `FileSystem` collaborator and
    /// tags the result with `src:file` taint plus a `file:<path>` source.
    ///
    /// # Errors
    /// `GUARD_DENIED` if the `fs:read` capability isn't granted;
    /// `FILE_NOT_FOUND` / `FILE_ERROR` as reported by the collaborator.
    pub fn read_file(&self, path: &str) -> Result<(String, SecurityDescriptor), Diagnostic> {
        self.check_capability("fs:read")?;
        let text = self.0.collaborators.fs.read(path)?;
        let mx = SecurityDescriptor::empty().derive(format!("file:{path}"), Some("src:file"));
        Ok((text, mx))
    }

    /// `executeCommand` (§4.2): delegates to the `Shell` collaborator and
    /// tags the result with `src:exec` taint plus a `cmd:<command>` source.
    ///
    /// # Errors
    /// `GUARD_DENIED` if the `shell:exec` capability isn't granted;
    /// `EXECUTION_FAILED` on nonzero exit, as reported by the collaborator.
    pub fn execute_command(&self, command: &str, stdin: Option<&str>) -> Result<(crate::collab::CommandOutput, SecurityDescriptor), Diagnostic> {
        self.check_capability("shell:exec")?;
        let cwd = self.0.working_directory.borrow().clone().or_else(|| self.0.current_file_path.borrow().clone());
        let out = self.0.collaborators.shell.execute(command, stdin, cwd.as_deref())?;
        let mx = SecurityDescriptor::empty().derive(format!("cmd:{command}"), Some("src:exec"));
        Ok((out, mx))
    }

    /// Merges `descriptors` the way `/var` assignment does when its RHS
    /// draws on more than one prior value (§4.2 `mergeSecurityDescriptors`).
    #[must_use]
    pub fn merge_security_descriptors<'a, I: IntoIterator<Item = &'a SecurityDescriptor>>(descriptors: I) -> SecurityDescriptor {
        SecurityDescriptor::merge_all(descriptors)
    }

    pub fn record_policy_config(&self, config: PolicyConfig) {
        self.0.policy_registry.borrow_mut().record(config);
    }

    #[must_use]
    pub fn policy(&self, name: &str) -> Option<PolicyConfig> {
        self.0.policy_registry.borrow().get(name).cloned()
    }

    pub fn install_guard(&self, clause: mlld_ast::GuardClause) {
        self.0.guard_registry.borrow_mut().install(clause);
    }

    /// Guards installed in this scope or any ancestor, innermost first —
    /// the order guards are consulted in (§4.7 "first-match when evaluation"
    /// operates per guard, but guards themselves run nearest-scope-first).
    #[must_use]
    pub fn guards_for(&self, phase: mlld_ast::GuardPhase, operation: &str) -> Vec<mlld_ast::GuardClause> {
        let mut guards = self.0.guard_registry.borrow().matching(phase, operation);
        if let Some(parent) = &self.0.parent {
            guards.extend(parent.guards_for(phase, operation));
        }
        guards
    }

    #[must_use]
    pub fn pipeline_state(&self) -> Option<PipelineState> {
        self.0.pipeline_state.borrow().clone()
    }

    pub fn set_pipeline_state(&self, state: Option<PipelineState>) {
        *self.0.pipeline_state.borrow_mut() = state;
    }

    #[must_use]
    pub fn current_file_path(&self) -> Option<String> {
        self.0.current_file_path.borrow().clone()
    }

    pub fn set_current_file_path(&self, path: Option<String>) {
        *self.0.current_file_path.borrow_mut() = path;
    }

    /// The root directory relative paths (`/var @x = <./rel.md>`, `/run`'s
    /// shell `cwd`) are resolved against (§3.2).
    #[must_use]
    pub fn working_directory(&self) -> Option<String> {
        self.0.working_directory.borrow().clone()
    }

    pub fn set_working_directory(&self, path: Option<String>) {
        *self.0.working_directory.borrow_mut() = path;
    }

    /// `EXECUTION_FAILED`/`FILE_ERROR`-raising helper for evaluators that
    /// need a variable to exist and want the standard taxonomy error rather
    /// than an `Option::unwrap`.
    ///
    /// # Errors
    /// `UNDEFINED_VARIABLE` if `name` is bound nowhere in the scope chain.
    pub fn require_variable(&self, name: &str) -> Result<Variable, Diagnostic> {
        self.get_variable(name)
            .ok_or_else(|| Diagnostic::new(EvalError::UndefinedVariable { name: name.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fake::{FakeFileSystem, FakeShell, NullCodeRunner, NullHttp, NullMcp, NullModuleResolver};
    use crate::variable::{Primitive, Variable, VariableOptions, VariableSource};
    use mlld_ast::DirectiveKind;

    fn collaborators() -> Collaborators {
        Collaborators {
            fs: std::sync::Arc::new(FakeFileSystem::default()),
            shell: std::sync::Arc::new(FakeShell::default()),
            code_runner: std::sync::Arc::new(NullCodeRunner),
            module_resolver: std::sync::Arc::new(NullModuleResolver),
            mcp: std::sync::Arc::new(NullMcp),
            http: std::sync::Arc::new(NullHttp),
        }
    }

    fn src() -> VariableSource {
        VariableSource::simple(DirectiveKind::Var, "literal")
    }

    #[test]
    fn child_scope_sees_parent_bindings() {
        let root = Environment::root(collaborators());
        root.set_variable(Variable::primitive("x", Primitive::Number(1.0), src(), VariableOptions::default()));
        let child = root.create_child();
        assert!(child.has_variable("x"));
    }

    #[test]
    fn child_writes_never_become_visible_in_parent() {
        let root = Environment::root(collaborators());
        let child = root.create_child();
        child.set_variable(Variable::primitive("y", Primitive::Number(2.0), src(), VariableOptions::default()));
        assert!(!root.has_variable("y"));
    }

    #[test]
    fn shadowing_favors_the_nearest_scope() {
        let root = Environment::root(collaborators());
        root.set_variable(Variable::primitive("x", Primitive::Number(1.0), src(), VariableOptions::default()));
        let child = root.create_child();
        child.set_variable(Variable::primitive("x", Primitive::Number(2.0), src(), VariableOptions::default()));
        let Primitive::Number(n) = child.require_variable("x").unwrap().expect_primitive().unwrap() else { panic!() };
        assert_eq!(*n, 2.0);
    }

    #[test]
    fn require_variable_reports_undefined_variable() {
        let root = Environment::root(collaborators());
        let err = root.require_variable("missing").unwrap_err();
        assert!(matches!(err.kind, EvalError::UndefinedVariable { .. }));
    }

    #[test]
    fn read_file_tags_result_with_file_taint() {
        let caps = Collaborators { fs: std::sync::Arc::new(FakeFileSystem::with_file("/a.md", "hi")), ..collaborators() };
        let root = Environment::root(caps);
        let (text, mx) = root.read_file("/a.md").unwrap();
        assert_eq!(text, "hi");
        assert!(mx.taint.contains("src:file"));
    }

    #[test]
    fn read_file_denied_without_fs_read_capability() {
        let caps = Collaborators { fs: std::sync::Arc::new(FakeFileSystem::with_file("/a.md", "hi")), ..collaborators() };
        let root = Environment::root_with_capabilities(caps, crate::capability::CapabilitySet::none());
        let err = root.read_file("/a.md").unwrap_err();
        assert!(matches!(err.kind, EvalError::GuardDenied { ref guard, .. } if guard == "capability"));
    }

    #[test]
    fn child_scope_inherits_working_directory() {
        let root = Environment::root(collaborators());
        root.set_working_directory(Some("/project".into()));
        let child = root.create_child();
        assert_eq!(child.working_directory().as_deref(), Some("/project"));
    }
}
