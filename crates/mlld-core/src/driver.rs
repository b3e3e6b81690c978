//! The entry driver (§6.3): `evaluate(ast, options) -> {output, exportTable, diagnostics}`.
//!
//! This is the one function anything embedding the evaluator — a CLI, a
//! language server, an MCP server — calls. Everything else in this crate is
//! reachable only through here or through `crate::directives`.

use std::collections::HashMap;

use crate::cancellation::CancellationToken;
use crate::capability::CapabilitySet;
use crate::collab::{Collaborators, ModuleResolver, ResolvedModule};
use crate::directives;
use crate::environment::Environment;
use crate::error::{Diagnostic, EvalError};
use crate::import::ExportTable;
use crate::policy::PolicyConfig;
use crate::security::SecurityDescriptor;
use crate::structured_value::{DataValue, StructuredValue, StructuredValueType};
use crate::variable::{Variable, VariableOptions, VariableSource};

/// How the driver responds to a directive error (§6.3, §7 "user-visible behaviour").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluateMode {
    /// Any non-recovered error aborts the whole evaluation: `evaluate`
    /// reports only the first diagnostic encountered.
    #[default]
    Strict,
    /// Reserved permissive modes: diagnostics accumulate, failing directives
    /// simply produce no output, and evaluation continues to the end of the
    /// document. Carried as two variants (rather than collapsing to one
    /// "permissive") because §3.3's `structuredValueType` distinguishes
    /// `markdown` and `xml` renderings downstream of this driver, even
    /// though neither changes evaluation semantics here.
    Markdown,
    Xml,
}

/// Driver-level configuration (§6.3). The caller owns every collaborator's
/// lifetime; none of this struct holds one.
pub struct EvaluateOptions {
    pub initial_file_path: Option<String>,
    pub working_directory: Option<String>,
    /// Bound as `@payload` at the root scope.
    pub payload: HashMap<String, serde_json::Value>,
    /// Bound as `@state` at the root scope.
    pub state: HashMap<String, serde_json::Value>,
    /// Specifier → already-parsed module, consulted before the collaborator
    /// bundle's own `ModuleResolver` (an embedder's way of injecting modules
    /// it produced itself, e.g. a language server's open-buffers set).
    pub dynamic_modules: HashMap<String, mlld_ast::Document>,
    pub mode: EvaluateMode,
    pub cancellation_signal: CancellationToken,
    pub policy_defaults: Vec<PolicyConfig>,
    /// Host sandbox profile (§5 "shared resources"). Defaults to
    /// [`CapabilitySet::unrestricted`] — a caller that wants to deny e.g.
    /// shell execution supplies a narrower set here.
    pub capabilities: CapabilitySet,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            initial_file_path: None,
            working_directory: None,
            payload: HashMap::new(),
            state: HashMap::new(),
            dynamic_modules: HashMap::new(),
            mode: EvaluateMode::default(),
            cancellation_signal: CancellationToken::new(),
            policy_defaults: Vec::new(),
            capabilities: CapabilitySet::unrestricted(),
        }
    }
}

/// The result of one `evaluate()` call (§6.3).
#[derive(Debug, Default)]
pub struct EvaluateOutput {
    pub output: String,
    pub export_table: ExportTable,
    pub diagnostics: Vec<Diagnostic>,
}

/// Wraps the caller's `ModuleResolver` so `dynamic_modules` specifiers are
/// served locally before falling through to the real resolver.
struct DynamicModuleResolver {
    dynamic: HashMap<String, mlld_ast::Document>,
    fallback: std::sync::Arc<dyn ModuleResolver>,
}

impl ModuleResolver for DynamicModuleResolver {
    fn resolve(&self, specifier: &str) -> Result<ResolvedModule, Diagnostic> {
        if let Some(document) = self.dynamic.get(specifier) {
            return Ok(ResolvedModule { specifier: specifier.to_string(), document: document.clone(), is_remote: false });
        }
        self.fallback.resolve(specifier)
    }
}

/// Single entry point (§6.3). Builds a root [`Environment`] from
/// `collaborators`, binds `@payload`/`@state`, records `policy_defaults`,
/// walks `document`, and shapes the result according to `options.mode`.
#[must_use]
pub fn evaluate(document: &mlld_ast::Document, collaborators: Collaborators, options: EvaluateOptions) -> EvaluateOutput {
    if options.cancellation_signal.is_cancelled() {
        return EvaluateOutput { output: String::new(), export_table: ExportTable::new(), diagnostics: vec![Diagnostic::new(EvalError::Aborted)] };
    }

    let wrapped = Collaborators {
        module_resolver: std::sync::Arc::new(DynamicModuleResolver { dynamic: options.dynamic_modules, fallback: collaborators.module_resolver.clone() }),
        ..collaborators
    };
    let env = Environment::root_with_capabilities(wrapped, options.capabilities);
    env.set_current_file_path(options.initial_file_path.clone());
    env.set_working_directory(options.working_directory.clone());

    for policy in options.policy_defaults {
        env.record_policy_config(policy);
    }

    bind_json_map(&env, "payload", &options.payload);
    bind_json_map(&env, "state", &options.state);

    let (output, export_table, mut diagnostics) = directives::eval_document(document, &env);

    if matches!(options.mode, EvaluateMode::Strict) {
        diagnostics.truncate(1);
    }

    EvaluateOutput { output, export_table, diagnostics }
}

fn bind_json_map(env: &Environment, name: &str, map: &HashMap<String, serde_json::Value>) {
    let mut entries = indexmap::IndexMap::new();
    for (k, v) in map {
        entries.insert(k.clone(), DataValue::from_json(v));
    }
    let data = DataValue::Object(entries);
    let sv = StructuredValue::new(data.to_display_string(), data, StructuredValueType::Json, SecurityDescriptor::empty());
    env.set_variable(Variable::structured(name, sv, VariableSource::simple(mlld_ast::DirectiveKind::Var, "driver-binding"), VariableOptions::default()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fake::{FakeFileSystem, FakeShell, NullCodeRunner, NullHttp, NullMcp, NullModuleResolver};
    use mlld_ast::{Directive, DirectiveKind, DirectiveMeta, DirectiveValues, Expr, Location, Node, Position};

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

    fn loc() -> Location {
        Location { start: Position { line: 1, col: 1 }, end: Position { line: 1, col: 1 }, source: "test.mld".into() }
    }

    #[test]
    fn evaluate_renders_plain_text_nodes() {
        let document = mlld_ast::Document { nodes: vec![Node::Text("hello".into())] };
        let result = evaluate(&document, collaborators(), EvaluateOptions::default());
        assert_eq!(result.output, "hello");
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn cancelled_token_short_circuits_with_aborted() {
        let token = CancellationToken::new();
        token.cancel();
        let document = mlld_ast::Document { nodes: vec![Node::Text("hello".into())] };
        let options = EvaluateOptions { cancellation_signal: token, ..Default::default() };
        let result = evaluate(&document, collaborators(), options);
        assert_eq!(result.output, "");
        assert!(matches!(result.diagnostics[0].kind, EvalError::Aborted));
    }

    #[test]
    fn strict_mode_truncates_to_the_first_diagnostic() {
        let bad_directive = Directive {
            kind: DirectiveKind::Show,
            subtype: "test".into(),
            values: DirectiveValues { value: Some(Expr::VariableReference(mlld_ast::VariableReferenceWithTail { variable: mlld_ast::VariableReference { identifier: "missing".into(), fields: vec![], pipes: vec![], value_type: mlld_ast::ValueTypeHint::Unknown }, with_clause: None })), ..Default::default() },
            raw: String::new(),
            meta: DirectiveMeta::default(),
            location: loc(),
        };
        let document = mlld_ast::Document { nodes: vec![Node::Directive(bad_directive.clone()), Node::Directive(bad_directive)] };
        let result = evaluate(&document, collaborators(), EvaluateOptions::default());
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn payload_is_bound_and_field_accessible() {
        let mut payload = HashMap::new();
        payload.insert("topic".to_string(), serde_json::json!("rust"));
        let directive = Directive {
            kind: DirectiveKind::Show,
            subtype: "test".into(),
            values: DirectiveValues {
                value: Some(Expr::VariableReference(mlld_ast::VariableReferenceWithTail {
                    variable: mlld_ast::VariableReference { identifier: "payload".into(), fields: vec![mlld_ast::FieldAccess::Name("topic".into())], pipes: vec![], value_type: mlld_ast::ValueTypeHint::Unknown },
                    with_clause: None,
                })),
                ..Default::default()
            },
            raw: String::new(),
            meta: DirectiveMeta::default(),
            location: loc(),
        };
        let document = mlld_ast::Document { nodes: vec![Node::Directive(directive)] };
        let options = EvaluateOptions { payload, ..Default::default() };
        let result = evaluate(&document, collaborators(), options);
        assert_eq!(result.output, "rust");
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn capability_denial_is_reported_as_a_diagnostic() {
        let command = mlld_ast::TextLiteral { wrapper: mlld_ast::QuoteKind::Double, parts: vec![mlld_ast::TemplatePart::Text("echo hi".into())], is_multi_line: false };
        let directive = Directive {
            kind: DirectiveKind::Run,
            subtype: "command".into(),
            values: DirectiveValues { value: Some(Expr::Command(mlld_ast::CommandExpr { command, with_clause: None })), ..Default::default() },
            raw: String::new(),
            meta: DirectiveMeta::default(),
            location: loc(),
        };
        let document = mlld_ast::Document { nodes: vec![Node::Directive(directive)] };
        let options = EvaluateOptions { capabilities: crate::capability::CapabilitySet::none(), ..Default::default() };
        let result = evaluate(&document, collaborators(), options);
        assert!(result.diagnostics.iter().any(|d| matches!(&d.kind, EvalError::GuardDenied { guard, .. } if guard == "capability")));
    }
}
