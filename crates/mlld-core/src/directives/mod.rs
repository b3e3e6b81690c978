//! Document and directive dispatch: turns a parsed [`mlld_ast::Document`]
//! into rendered output plus an export table (§4.4, §6.3).
//!
//! [`CoreEvaluator`] is the seam three lower-level modules were built
//! against without depending on this one directly: `interpolation::PipeInvoker`
//! (running a pipe stage means invoking an executable, which is a directive
//! concern), `guard::ConditionEvaluator` (a guard's `when` arms are plain
//! expressions), and `import::ModuleEvaluator` (importing a module means
//! evaluating its directives, recursively, right back through this file).

use mlld_ast::{Directive, DirectiveKind, Document, Expr, Node};

use crate::environment::Environment;
use crate::error::{Diagnostic, EvalError};
use crate::guard::ConditionEvaluator;
use crate::import::{self, ExportTable, ModuleEvaluator};
use crate::interpolation::PipeInvoker;
use crate::policy::PolicyConfig;
use crate::structured_value::StructuredValue;
use crate::variable::{Executable, ExecutableKind, Variable, VariableOptions, VariableSource, VariableValue};

pub mod expr;

/// One import chain per `evaluate()` call. Cycle detection needs to span the
/// whole nested `/import` tree, but `ModuleEvaluator::evaluate_module` has no
/// parameter to thread a `&mut Vec` through recursive module evaluation — so
/// the chain lives here instead, scoped to the evaluating thread (§5: this
/// evaluator is single-threaded and cooperative, never spread across OS
/// threads, so a thread-local is exactly as scoped as an explicit stack would
/// be).
thread_local! {
    static IMPORT_CHAIN: std::cell::RefCell<Vec<String>> = const { std::cell::RefCell::new(Vec::new()) };
}

/// The zero-sized evaluator token every lower-level seam trait is implemented
/// for. Stateless by construction: every call site builds one inline
/// (`&CoreEvaluator`), so any state it needed would have to live on
/// `Environment` or a thread-local anyway.
pub struct CoreEvaluator;

impl PipeInvoker for CoreEvaluator {
    fn invoke_named(&self, name: &str, args: &[Expr], input: &StructuredValue, env: &Environment) -> Result<StructuredValue, Diagnostic> {
        let callee = env.require_variable(name)?;
        let executable = callee.expect_executable()?.clone();
        let call_env = env.create_child();

        let mut params = executable.params.iter();
        if let Some(first) = params.next() {
            call_env.set_variable(Variable::structured(
                first.clone(),
                input.clone(),
                VariableSource::simple(DirectiveKind::Exe, "pipe-input"),
                VariableOptions::default(),
            ));
        }
        for (param, arg) in params.zip(args) {
            let v = expr::eval_expr(arg, env)?;
            call_env.set_variable(Variable { name: param.clone(), ..v });
        }

        let result = expr::eval_expr(&executable.body, &call_env)?;
        let mx = result.mx.derive(format!("pipe:{name}"), Some("src:pipeline"));
        Ok(StructuredValue::auto_detect(result.to_display_string(), mx))
    }

    fn invoke_inline(&self, command: &Expr, input: &StructuredValue, env: &Environment) -> Result<StructuredValue, Diagnostic> {
        let child = env.create_child();
        child.set_variable(Variable::structured(
            "input",
            input.clone(),
            VariableSource::simple(DirectiveKind::Exe, "pipe-inline-input"),
            VariableOptions::default(),
        ));
        let result = expr::eval_expr(command, &child)?;
        let mx = result.mx.derive("pipe:inline", Some("src:pipeline"));
        Ok(StructuredValue::auto_detect(result.to_display_string(), mx))
    }
}

impl ConditionEvaluator for CoreEvaluator {
    fn eval_truthy(&self, expr: &Expr, env: &Environment) -> Result<bool, Diagnostic> {
        let v = expr::eval_expr(expr, env)?;
        Ok(expr::is_truthy(&v))
    }

    fn eval_guard_action(&self, expr: &Expr, env: &Environment) -> Result<crate::guard::GuardVerdict, Diagnostic> {
        use crate::guard::GuardVerdict;
        match expr {
            Expr::Allow => Ok(GuardVerdict::Allow),
            Expr::Deny(reason) => {
                let rendered = expr::eval_text(reason, env, false)?;
                Ok(GuardVerdict::Deny(rendered.to_display_string()))
            }
            other => Ok(if self.eval_truthy(other, env)? { GuardVerdict::Allow } else { GuardVerdict::Deny(String::new()) }),
        }
    }
}

impl ModuleEvaluator for CoreEvaluator {
    fn evaluate_module(&self, document: &Document, env: &Environment) -> Result<ExportTable, Diagnostic> {
        let (_output, exports, mut diagnostics) = run_nodes(&document.nodes, env);
        if !diagnostics.is_empty() {
            return Err(diagnostics.remove(0));
        }
        Ok(exports)
    }
}

/// Evaluates an entire document: the driver's entry point. Rendering doesn't
/// stop at the first directive error — a broken `/show` shouldn't blank out
/// everything after it — so failures are collected rather than propagated.
#[must_use]
pub fn eval_document(document: &Document, env: &Environment) -> (String, ExportTable, Vec<Diagnostic>) {
    run_nodes(&document.nodes, env)
}

fn run_nodes(nodes: &[Node], env: &Environment) -> (String, ExportTable, Vec<Diagnostic>) {
    let mut output = String::new();
    let mut exports = ExportTable::new();
    let mut diagnostics = Vec::new();
    // `/env` opens a scoped block (§4.4.6): the rest of this node list runs
    // against a child scope, and the override reverts the moment this
    // function returns, since the caller's `Environment` handle never moves
    // off the parent. No explicit restore step is needed on any exit path —
    // normal, error, or guard-denied — because the child is simply dropped.
    let mut current_env = env.clone();

    for node in nodes {
        match node {
            Node::Text(text) => output.push_str(text),
            Node::Comment(_) => {}
            Node::CodeFence { language, code } => {
                output.push_str("```");
                if let Some(lang) = language {
                    output.push_str(lang);
                }
                output.push('\n');
                output.push_str(code);
                output.push_str("\n```\n");
            }
            Node::Literal(lit) => match expr::eval_expr(&Expr::Literal(lit.clone()), &current_env) {
                Ok(v) => output.push_str(&v.to_display_string()),
                Err(diag) => diagnostics.push(diag),
            },
            Node::VariableReference(var_ref) => {
                let as_expr = Expr::VariableReference(mlld_ast::VariableReferenceWithTail { variable: var_ref.clone(), with_clause: None });
                match expr::eval_expr(&as_expr, &current_env) {
                    Ok(v) => output.push_str(&v.to_display_string()),
                    Err(diag) => diagnostics.push(diag),
                }
            }
            Node::Directive(directive) if directive.kind == DirectiveKind::Env => {
                tracing::trace!(kind = ?directive.kind, subtype = %directive.subtype, "dispatching directive");
                match eval_env(directive, &current_env) {
                    Ok(child) => current_env = child,
                    Err(diag) => {
                        tracing::debug!(kind = ?directive.kind, error = %diag.kind, "directive evaluation failed");
                        diagnostics.push(diag.with_context(crate::error::ErrorContext {
                            directive_kind: format!("{:?}", directive.kind),
                            subtype: directive.subtype.clone(),
                            location: Some(directive.location.clone()),
                            current_file_path: current_env.current_file_path(),
                        }));
                    }
                }
            }
            Node::Directive(directive) => {
                tracing::trace!(kind = ?directive.kind, subtype = %directive.subtype, "dispatching directive");
                if let Err(diag) = eval_directive(directive, &current_env, &mut output, &mut exports) {
                    tracing::debug!(kind = ?directive.kind, error = %diag.kind, "directive evaluation failed");
                    diagnostics.push(diag.with_context(crate::error::ErrorContext {
                        directive_kind: format!("{:?}", directive.kind),
                        subtype: directive.subtype.clone(),
                        location: Some(directive.location.clone()),
                        current_file_path: current_env.current_file_path(),
                    }));
                }
            }
        }
    }

    (output, exports, diagnostics)
}

/// Routes a single directive to its evaluator by kind (§4.4).
///
/// # Errors
/// Whatever the specific directive's evaluation raises.
fn eval_directive(directive: &Directive, env: &Environment, output: &mut String, exports: &mut ExportTable) -> Result<(), Diagnostic> {
    match directive.kind {
        DirectiveKind::Var => eval_var(directive, env),
        DirectiveKind::Exe => eval_exe(directive, env),
        DirectiveKind::Run => eval_run(directive, env, output),
        DirectiveKind::Show => eval_show(directive, env, output),
        DirectiveKind::When => eval_when_directive(directive, env, output),
        DirectiveKind::For => eval_for_directive(directive, env, output),
        DirectiveKind::Import => eval_import(directive, env),
        DirectiveKind::Export => eval_export(directive, env, exports),
        DirectiveKind::Guard => eval_guard(directive, env),
        // Handled in `run_nodes` directly: it needs the child `Environment`
        // `eval_env` produces, which this uniform `Result<(), _>` signature
        // has no way to hand back.
        DirectiveKind::Env => unreachable!("run_nodes special-cases DirectiveKind::Env before reaching eval_directive"),
    }
}

fn missing(what: &str) -> Diagnostic {
    Diagnostic::new(EvalError::ValidationFailed { reason: format!("directive missing {what}") })
}

/// `/var @name = <expr>` (§4.4.1). Triple-colon deferral is only honored
/// here, at the assignment boundary — every other expression position
/// interpolates eagerly.
fn eval_var(directive: &Directive, env: &Environment) -> Result<(), Diagnostic> {
    let name = directive.values.identifier.clone().ok_or_else(|| missing("identifier"))?;
    let value_expr = directive.values.value.as_ref().ok_or_else(|| missing("value"))?;
    let mut variable = match value_expr {
        Expr::Text(text) => expr::eval_text(text, env, true)?,
        Expr::Object(obj) if directive.meta.is_tools_collection => expr::eval_object_as(obj, env, true)?,
        other => expr::eval_expr(other, env)?,
    };
    variable.name = name;
    env.set_variable(variable);
    Ok(())
}

/// `/exe @name(params) = <body>` (§4.4.2). The body's own `Expr` variant
/// decides what kind of executable this is.
fn eval_exe(directive: &Directive, env: &Environment) -> Result<(), Diagnostic> {
    let name = directive.values.identifier.clone().ok_or_else(|| missing("identifier"))?;
    let body = directive.values.value.clone().ok_or_else(|| missing("value"))?;
    let kind = match &body {
        Expr::Command(_) => ExecutableKind::Command,
        Expr::Code(code) => ExecutableKind::Code { language: code.language },
        Expr::Text(_) => ExecutableKind::Template,
        _ => ExecutableKind::Composite,
    };
    let executable = Executable { kind, params: directive.values.params.clone(), body, captured_scope: None };
    env.set_variable(Variable::executable(name, executable, VariableSource::simple(DirectiveKind::Exe, "exe"), VariableOptions::default()));
    Ok(())
}

/// `/run <command>` (§4.4.3): evaluated for its side effect and its text
/// appended to the rendered document.
fn eval_run(directive: &Directive, env: &Environment, output: &mut String) -> Result<(), Diagnostic> {
    let value_expr = directive.values.value.as_ref().ok_or_else(|| missing("value"))?;
    let result = expr::eval_expr(value_expr, env)?;
    if !directive.meta.is_data_value {
        append_display(output, &result);
    }
    Ok(())
}

/// `/show <expr>` (§4.4): renders an expression's text projection inline.
fn eval_show(directive: &Directive, env: &Environment, output: &mut String) -> Result<(), Diagnostic> {
    let value_expr = directive.values.value.as_ref().ok_or_else(|| missing("value"))?;
    let result = expr::eval_expr(value_expr, env)?;
    append_display(output, &result);
    Ok(())
}

/// `/when [...]` (§4.4.4) at the directive level: runs the matching arm(s)
/// for effect and renders whatever they evaluate to.
fn eval_when_directive(directive: &Directive, env: &Environment, output: &mut String) -> Result<(), Diagnostic> {
    let value_expr = directive.values.value.as_ref().ok_or_else(|| missing("value"))?;
    let result = expr::eval_expr(value_expr, env)?;
    append_display(output, &result);
    Ok(())
}

/// `/for @x in <collection> => <body>` (§4.4.5) at the directive level:
/// renders each iteration's result on its own line.
fn eval_for_directive(directive: &Directive, env: &Environment, output: &mut String) -> Result<(), Diagnostic> {
    let value_expr = directive.values.value.as_ref().ok_or_else(|| missing("value"))?;
    let result = expr::eval_expr(value_expr, env)?;
    append_display(output, &result);
    Ok(())
}

fn append_display(output: &mut String, variable: &Variable) {
    match &variable.value {
        VariableValue::Array { items, .. } => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    output.push('\n');
                }
                output.push_str(&item.to_display_string());
            }
        }
        _ => output.push_str(&variable.to_display_string()),
    }
}

/// `/import { a, b as c, * as ns } from <specifier>` (§4.8).
fn eval_import(directive: &Directive, env: &Environment) -> Result<(), Diagnostic> {
    let specifier_expr = directive.values.module.as_ref().ok_or_else(|| missing("module"))?;
    let specifier = expr::eval_expr(specifier_expr, env)?.to_display_string();
    let table = IMPORT_CHAIN.with(|chain| {
        let mut guard = chain.borrow_mut();
        import::resolve_and_evaluate(env, &specifier, &mut guard, &CoreEvaluator)
    })?;
    import::apply_bindings(env, &table, &directive.values.imports)?;
    Ok(())
}

/// `/export { a, b }` (§4.8): copies already-bound variables into the
/// module's export table for the importer to pick up.
fn eval_export(directive: &Directive, env: &Environment, exports: &mut ExportTable) -> Result<(), Diagnostic> {
    for name in &directive.values.exports {
        let variable = env.require_variable(name)?;
        exports.export(variable);
    }
    Ok(())
}

/// `/guard <name> before|after op:<kind> = when [...]` (§4.7).
fn eval_guard(directive: &Directive, env: &Environment) -> Result<(), Diagnostic> {
    let clause = directive.values.guard.clone().ok_or_else(|| missing("guard clause"))?;
    env.install_guard(clause);
    Ok(())
}

/// `/env { name: "...", allow: [...], deny: [...] }` (§4.4.6): opens a scoped
/// block over a child environment. The override is recorded on the child, not
/// `env` itself, so it is visible to every directive that follows in the same
/// node list and vanishes as soon as that list's `run_nodes` call returns —
/// RAII acquisition with no explicit release.
fn eval_env(directive: &Directive, env: &Environment) -> Result<Environment, Diagnostic> {
    let child = env.create_child();
    let Some(value_expr) = &directive.values.env_overrides else { return Ok(child) };
    let variable = expr::eval_expr(value_expr, &child)?;
    let config = extract_policy_config(&variable.value)?;
    child.record_policy_config(config);
    Ok(child)
}

fn extract_policy_config(value: &VariableValue) -> Result<PolicyConfig, Diagnostic> {
    let VariableValue::Object { entries, .. } = value else {
        return Err(Diagnostic::new(EvalError::ValidationFailed { reason: "/env overrides must be an object".into() }));
    };
    let name = entries.get("name").map(VariableValue::to_display_string).unwrap_or_default();
    let allow = entries.get("allow").map(extract_string_list).unwrap_or_default();
    let deny = entries.get("deny").map(extract_string_list).unwrap_or_default();
    Ok(PolicyConfig::new(name, allow, deny))
}

fn extract_string_list(value: &VariableValue) -> Vec<String> {
    match value {
        VariableValue::Array { items, .. } => items.iter().map(VariableValue::to_display_string).collect(),
        other => vec![other.to_display_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fake::{FakeFileSystem, FakeShell, NullCodeRunner, NullHttp, NullMcp, NullModuleResolver};
    use crate::collab::Collaborators;
    use mlld_ast::{
        DirectiveMeta, DirectiveValues, GuardClause, GuardPhase, Literal, Location, Position, QuoteKind, TemplatePart,
        TextLiteral, WhenArm, WhenExpression, WhenModifier,
    };
    use pretty_assertions::assert_eq;

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

    fn loc() -> Location {
        Location { start: Position { line: 1, col: 1 }, end: Position { line: 1, col: 1 }, source: "test.mld".into() }
    }

    fn directive(kind: DirectiveKind, values: DirectiveValues) -> Directive {
        Directive { kind, subtype: "test".into(), values, raw: String::new(), meta: DirectiveMeta::default(), location: loc() }
    }

    fn text_literal(s: &str) -> TextLiteral {
        TextLiteral { wrapper: QuoteKind::Double, parts: vec![TemplatePart::Text(s.to_string())], is_multi_line: false }
    }

    #[test]
    fn var_then_show_renders_the_bound_value() {
        let e = env();
        let var_directive = directive(DirectiveKind::Var, DirectiveValues { identifier: Some("greeting".into()), value: Some(Expr::Text(text_literal("hi"))), ..Default::default() });
        let show_directive = directive(DirectiveKind::Show, DirectiveValues { value: Some(Expr::VariableReference(mlld_ast::VariableReferenceWithTail { variable: mlld_ast::VariableReference { identifier: "greeting".into(), fields: vec![], pipes: vec![], value_type: mlld_ast::ValueTypeHint::Unknown }, with_clause: None })), ..Default::default() });
        let (output, _, diagnostics) = run_nodes(&[Node::Directive(var_directive), Node::Directive(show_directive)], &e);
        assert!(diagnostics.is_empty());
        assert_eq!(output, "hi");
    }

    #[test]
    fn exe_then_invocation_binds_params_and_runs_the_body() {
        let e = env();
        let exe_directive = directive(
            DirectiveKind::Exe,
            DirectiveValues { identifier: Some("echo".into()), params: vec!["x".into()], value: Some(Expr::VariableReference(mlld_ast::VariableReferenceWithTail { variable: mlld_ast::VariableReference { identifier: "x".into(), fields: vec![], pipes: vec![], value_type: mlld_ast::ValueTypeHint::Unknown }, with_clause: None })), ..Default::default() },
        );
        let (_output, _, diagnostics) = run_nodes(&[Node::Directive(exe_directive)], &e);
        assert!(diagnostics.is_empty());
        let invocation = Expr::ExecInvocation(mlld_ast::ExecInvocation { name: "echo".into(), args: vec![Expr::Literal(Literal::Text(text_literal("hello")))], with_clause: None });
        let result = expr::eval_expr(&invocation, &e).unwrap();
        assert_eq!(result.to_display_string(), "hello");
    }

    #[test]
    fn export_directive_copies_bound_variable_into_table() {
        let e = env();
        let var_directive = directive(DirectiveKind::Var, DirectiveValues { identifier: Some("x".into()), value: Some(Expr::Literal(Literal::Number(3.0))), ..Default::default() });
        let export_directive = directive(DirectiveKind::Export, DirectiveValues { exports: vec!["x".into()], ..Default::default() });
        let (_output, exports, diagnostics) = run_nodes(&[Node::Directive(var_directive), Node::Directive(export_directive)], &e);
        assert!(diagnostics.is_empty());
        assert!(exports.get("x").is_some());
    }

    #[test]
    fn guard_directive_denies_a_later_run() {
        let e = env();
        let guard_clause = GuardClause {
            name: "no-exec".into(),
            phase: GuardPhase::Before,
            operation: "exec".into(),
            when: WhenExpression { arms: vec![WhenArm { condition: None, action: Box::new(Expr::Literal(Literal::Bool(false))), is_default: true }], modifier: WhenModifier::First },
        };
        let guard_directive = directive(DirectiveKind::Guard, DirectiveValues { guard: Some(guard_clause), ..Default::default() });
        let run_directive = directive(DirectiveKind::Run, DirectiveValues { value: Some(Expr::Command(mlld_ast::CommandExpr { command: text_literal("echo hi"), with_clause: None })), ..Default::default() });
        let (_output, _, diagnostics) = run_nodes(&[Node::Directive(guard_directive), Node::Directive(run_directive)], &e);
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(diagnostics[0].kind, EvalError::GuardDenied { .. }));
    }

    #[test]
    fn guard_deny_action_carries_the_authors_reason_text() {
        let e = env();
        let guard_clause = GuardClause {
            name: "no-exec".into(),
            phase: GuardPhase::Before,
            operation: "exec".into(),
            when: WhenExpression { arms: vec![WhenArm { condition: None, action: Box::new(Expr::Deny(text_literal("blocked"))), is_default: true }], modifier: WhenModifier::First },
        };
        let guard_directive = directive(DirectiveKind::Guard, DirectiveValues { guard: Some(guard_clause), ..Default::default() });
        let run_directive = directive(DirectiveKind::Run, DirectiveValues { value: Some(Expr::Command(mlld_ast::CommandExpr { command: text_literal("echo hi"), with_clause: None })), ..Default::default() });
        let (_output, _, diagnostics) = run_nodes(&[Node::Directive(guard_directive), Node::Directive(run_directive)], &e);
        assert_eq!(diagnostics.len(), 1);
        match &diagnostics[0].kind {
            EvalError::GuardDenied { guard, reason } => {
                assert_eq!(guard, "no-exec");
                assert_eq!(reason, "blocked");
            }
            other => panic!("expected GuardDenied, got {other:?}"),
        }
    }

    #[test]
    fn run_directive_suppresses_output_when_meta_marks_a_data_value() {
        let e = env();
        let mut run_directive = directive(DirectiveKind::Run, DirectiveValues { value: Some(Expr::Command(mlld_ast::CommandExpr { command: text_literal("echo hi"), with_clause: None })), ..Default::default() });
        run_directive.meta.is_data_value = true;
        let (output, _, diagnostics) = run_nodes(&[Node::Directive(run_directive)], &e);
        assert!(diagnostics.is_empty());
        assert!(output.is_empty());
    }

    #[test]
    fn env_directive_scope_reverts_once_run_nodes_returns() {
        let e = env();
        let env_directive = directive(
            DirectiveKind::Env,
            DirectiveValues {
                env_overrides: Some(Expr::Object(mlld_ast::ObjectExpr {
                    entries: indexmap::IndexMap::from([(
                        "name".to_string(),
                        mlld_ast::ObjectEntry { value: Expr::Text(text_literal("scoped")), tool: None },
                    )]),
                })),
                ..Default::default()
            },
        );
        let (_output, _, diagnostics) = run_nodes(&[Node::Directive(env_directive)], &e);
        assert!(diagnostics.is_empty());
        assert!(e.policy("scoped").is_none());
    }

    #[test]
    fn comment_and_code_fence_nodes_render_without_executing() {
        let e = env();
        let nodes = vec![Node::Comment("note".into()), Node::CodeFence { language: Some("js".into()), code: "1+1".into() }];
        let (output, _, diagnostics) = run_nodes(&nodes, &e);
        assert!(diagnostics.is_empty());
        assert_eq!(output, "```js\n1+1\n```\n");
    }
}
