//! Import/export and module resolution (§4.8).
//!
//! Resolving a specifier and detecting a cycle are this module's job;
//! actually evaluating the resolved document's directives belongs to
//! whatever owns directive dispatch, since that's a recursive call back into
//! the same evaluator that's calling this one. [`ModuleEvaluator`] is the
//! seam: `crate::directives` implements it, `resolve_and_evaluate` drives it.

use indexmap::IndexMap;

use crate::environment::Environment;
use crate::error::{Diagnostic, EvalError};
use crate::security::SecurityDescriptor;
use crate::variable::Variable;

/// `name → exported variable`, built by evaluating a module's `/export`
/// directives and merged into the importer's scope per the binding list in
/// an `/import` directive.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    pub entries: IndexMap<String, Variable>,
}

impl ExportTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(&mut self, variable: Variable) {
        self.entries.insert(variable.name.clone(), variable);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.entries.get(name)
    }
}

/// Evaluates a resolved module's document into an [`ExportTable`]. Kept
/// separate from `ModuleResolver` (which only fetches and parses) so the
/// recursive evaluation step can be swapped independently in tests.
pub trait ModuleEvaluator {
    /// # Errors
    /// Whatever evaluating the module's directives raises.
    fn evaluate_module(&self, document: &mlld_ast::Document, env: &Environment) -> Result<ExportTable, Diagnostic>;
}

/// Resolves `specifier`, detects import cycles via `in_progress`, evaluates
/// the module, and tags every exported binding's descriptor with
/// `src:import:<specifier>` (or `src:http` for remote specifiers, in
/// addition — a module fetched over the network carries both its import
/// provenance and the fact that it crossed the network).
///
/// # Errors
/// `IMPORT_NOT_FOUND` if the resolver can't find `specifier`;
/// `IMPORT_CYCLE` if `specifier` is already on `in_progress`; whatever the
/// module's own evaluation raises.
pub fn resolve_and_evaluate(env: &Environment, specifier: &str, in_progress: &mut Vec<String>, evaluator: &dyn ModuleEvaluator) -> Result<ExportTable, Diagnostic> {
    if in_progress.iter().any(|s| s == specifier) {
        let mut cycle = in_progress.clone();
        cycle.push(specifier.to_string());
        return Err(Diagnostic::new(EvalError::ImportCycle(cycle)));
    }

    let resolved = env.collaborators().module_resolver.resolve(specifier)?;
    in_progress.push(specifier.to_string());
    let module_env = env.create_child();
    let result = evaluator.evaluate_module(&resolved.document, &module_env);
    in_progress.pop();

    let table = result?;
    let mut tagged = ExportTable::new();
    for (name, mut variable) in table.entries {
        let mut mx = SecurityDescriptor::merge(&variable.mx, &SecurityDescriptor::with_taint([format!("src:import:{specifier}")]));
        if resolved.is_remote {
            mx = SecurityDescriptor::merge(&mx, &SecurityDescriptor::with_taint(["src:http"]));
        }
        variable.mx = mx;
        tagged.entries.insert(name, variable);
    }
    Ok(tagged)
}

/// Merges `bindings` (the `/import` directive's selector list) from
/// `exports` into `dest`. A wildcard binding (`* as ns`) is wrapped into a
/// single `Object` variable named `ns`; a named binding imports the
/// matching export directly, aliased if requested.
///
/// # Errors
/// `UNDEFINED_VARIABLE` if a named (non-wildcard) binding isn't present in
/// `exports`.
pub fn apply_bindings(dest: &Environment, exports: &ExportTable, bindings: &[mlld_ast::ImportBinding]) -> Result<(), Diagnostic> {
    for binding in bindings {
        if binding.is_wildcard {
            let ns_name = binding.alias.clone().unwrap_or_else(|| binding.name.clone());
            let mut entries = indexmap::IndexMap::new();
            for (name, variable) in &exports.entries {
                entries.insert(name.clone(), variable.value.clone());
            }
            let mx = SecurityDescriptor::merge_all(exports.entries.values().map(|v| &v.mx));
            let src = crate::variable::VariableSource::simple(mlld_ast::DirectiveKind::Import, "wildcard");
            dest.set_variable(Variable::object(ns_name, entries, false, src, crate::variable::VariableOptions { mx, ..Default::default() }));
            continue;
        }
        let exported = exports.get(&binding.name).ok_or_else(|| {
            Diagnostic::new(EvalError::UndefinedVariable { name: binding.name.clone() })
        })?;
        let mut bound = exported.clone();
        bound.name = binding.alias.clone().unwrap_or_else(|| binding.name.clone());
        dest.set_variable(bound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fake::{FakeFileSystem, FakeShell, NullCodeRunner, NullHttp, NullMcp, NullModuleResolver};
    use crate::collab::{Collaborators, ResolvedModule};
    use crate::variable::{Primitive, VariableOptions, VariableSource};
    use mlld_ast::{Document, ImportBinding};

    fn env() -> Environment {
        Environment::root(Collaborators {
            fs: std::sync::Arc::new(FakeFileSystem::default()),
            shell: std::sync::Arc::new(FakeShell::default()),
            code_runner: std::sync::Arc::new(NullCodeRunner),
            module_resolver: std::sync::Arc::new(NullModuleResolver),
            mcp: std::sync::Arc::new(NullMcp),
            http: std::sync::Arc::new(NullHttp),
        })
    }

    struct FixedResolver(Document);

    impl crate::collab::ModuleResolver for FixedResolver {
        fn resolve(&self, specifier: &str) -> Result<ResolvedModule, Diagnostic> {
            Ok(ResolvedModule { specifier: specifier.to_string(), document: self.0.clone(), is_remote: false })
        }
    }

    struct OneVarEvaluator;

    impl ModuleEvaluator for OneVarEvaluator {
        fn evaluate_module(&self, _document: &Document, _env: &Environment) -> Result<ExportTable, Diagnostic> {
            let mut table = ExportTable::new();
            table.export(Variable::primitive("greeting", Primitive::Number(1.0), VariableSource::simple(mlld_ast::DirectiveKind::Var, "literal"), VariableOptions::default()));
            Ok(table)
        }
    }

    #[test]
    fn resolve_and_evaluate_tags_exports_with_import_taint() {
        let base = env();
        let caps = Collaborators { module_resolver: std::sync::Arc::new(FixedResolver(Document::default())), ..base.collaborators().clone() };
        let e = Environment::root(caps);
        let mut in_progress = Vec::new();
        let table = resolve_and_evaluate(&e, "./util.mld", &mut in_progress, &OneVarEvaluator).unwrap();
        let greeting = table.get("greeting").unwrap();
        assert!(greeting.mx.taint.contains("src:import:./util.mld"));
    }

    #[test]
    fn cycle_is_detected_when_specifier_reappears() {
        let e = env();
        let mut in_progress = vec!["./a.mld".to_string()];
        let err = resolve_and_evaluate(&e, "./a.mld", &mut in_progress, &OneVarEvaluator).unwrap_err();
        assert!(matches!(err.kind, EvalError::ImportCycle(_)));
    }

    #[test]
    fn named_binding_imports_and_can_be_aliased() {
        let e = env();
        let mut exports = ExportTable::new();
        exports.export(Variable::primitive("x", Primitive::Number(5.0), VariableSource::simple(mlld_ast::DirectiveKind::Var, "literal"), VariableOptions::default()));
        let bindings = vec![ImportBinding { name: "x".into(), alias: Some("y".into()), is_wildcard: false }];
        apply_bindings(&e, &exports, &bindings).unwrap();
        assert!(e.has_variable("y"));
        assert!(!e.has_variable("x"));
    }

    #[test]
    fn missing_named_binding_raises_undefined_variable() {
        let e = env();
        let exports = ExportTable::new();
        let bindings = vec![ImportBinding { name: "missing".into(), alias: None, is_wildcard: false }];
        let err = apply_bindings(&e, &exports, &bindings).unwrap_err();
        assert!(matches!(err.kind, EvalError::UndefinedVariable { .. }));
    }

    #[test]
    fn wildcard_binding_wraps_all_exports_in_a_namespace_object() {
        let e = env();
        let mut exports = ExportTable::new();
        exports.export(Variable::primitive("a", Primitive::Number(1.0), VariableSource::simple(mlld_ast::DirectiveKind::Var, "literal"), VariableOptions::default()));
        let bindings = vec![ImportBinding { name: "mod".into(), alias: None, is_wildcard: true }];
        apply_bindings(&e, &exports, &bindings).unwrap();
        let ns = e.require_variable("mod").unwrap();
        assert!(matches!(ns.value, crate::variable::VariableValue::Object { .. }));
    }
}
