//! The interpolation engine (§4.3): turns a [`mlld_ast::TextLiteral`] plus an
//! [`Environment`] into a finished string, resolving every `@name.field|pipe`
//! reference along the way.
//!
//! Four contexts change only the final text projection (step 5); variable
//! resolution, field access, and pipes are identical across all of them.

use mlld_ast::{FieldAccess, PipeStage, TextLiteral, TemplatePart, VariableReference};

use crate::environment::Environment;
use crate::error::{Diagnostic, EvalError};
use crate::security::SecurityDescriptor;
use crate::structured_value::StructuredValue;
use crate::variable::VariableValue;

/// Where an interpolated string is headed. Only the final projection step
/// (§4.3 step 5) depends on this; resolution itself is context-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationContext {
    Default,
    ShellCommand,
    FilePath,
    Template,
}

/// Evaluates a pipe stage's named executable against a piped input.
/// Implemented by whatever owns directive evaluation (`crate::directives`),
/// since running a pipe stage is "call an executable", which the
/// interpolation engine itself has no business knowing how to do.
pub trait PipeInvoker {
    /// # Errors
    /// Whatever the invoked executable's own evaluation raises.
    fn invoke_named(&self, name: &str, args: &[Expr], input: &StructuredValue, env: &Environment) -> Result<StructuredValue, Diagnostic>;

    /// # Errors
    /// Whatever the invoked inline command's own evaluation raises.
    fn invoke_inline(&self, command: &Expr, input: &StructuredValue, env: &Environment) -> Result<StructuredValue, Diagnostic>;
}

use mlld_ast::Expr;

/// A `PipeInvoker` that rejects every pipe stage; useful for contexts (path
/// segments, simple substitutions) that are documented not to support
/// piping.
pub struct NoPipes;

impl PipeInvoker for NoPipes {
    fn invoke_named(&self, name: &str, _args: &[Expr], _input: &StructuredValue, _env: &Environment) -> Result<StructuredValue, Diagnostic> {
        Err(Diagnostic::new(EvalError::ValidationFailed { reason: format!("pipes are not supported here: `{name}`") }))
    }

    fn invoke_inline(&self, _command: &Expr, _input: &StructuredValue, _env: &Environment) -> Result<StructuredValue, Diagnostic> {
        Err(Diagnostic::new(EvalError::ValidationFailed { reason: "pipes are not supported here".into() }))
    }
}

/// Renders a template body end to end (§4.3): walks `literal.parts` in
/// order, substituting each interpolation point with its resolved text
/// projection.
///
/// # Errors
/// `UNDEFINED_VARIABLE` / `FIELD_NOT_FOUND` from resolution; whatever a pipe
/// stage raises.
pub fn interpolate(literal: &TextLiteral, env: &Environment, context: InterpolationContext, pipes: &dyn PipeInvoker) -> Result<String, Diagnostic> {
    let mut out = String::new();
    for part in &literal.parts {
        match part {
            TemplatePart::Text(t) => out.push_str(t),
            TemplatePart::Interpolation(var_ref) => {
                let (sv, _mx) = resolve_variable_reference(var_ref, env, pipes)?;
                out.push_str(&project(&sv, context));
            }
        }
    }
    Ok(out)
}

/// The 5-step `VariableReference` resolution algorithm (§4.3):
/// 1. look up the identifier in `env`
/// 2. walk field accesses left to right
/// 3. submit through any attached pipe stages in order
/// 4. merge security descriptors picked up along the way
/// 5. (left to the caller: project to text per-context)
///
/// # Errors
/// `UNDEFINED_VARIABLE` if step 1 fails; `FIELD_NOT_FOUND` if step 2 can't
/// walk a field; whatever a pipe stage raises in step 3.
pub fn resolve_variable_reference(var_ref: &VariableReference, env: &Environment, pipes: &dyn PipeInvoker) -> Result<(StructuredValue, SecurityDescriptor), Diagnostic> {
    let variable = env.require_variable(&var_ref.identifier)?;
    tracing::trace!(target: crate::tracer::TARGET_IDS, identifier = %var_ref.identifier, "resolved variable");
    let mut mx = variable.mx.clone();
    let mut value = variable.value.clone();

    for field in &var_ref.fields {
        value = value.field_access(field).ok_or_else(|| {
            Diagnostic::new(EvalError::FieldNotFound { field: describe_field(field), on: var_ref.identifier.clone() })
        })?;
        tracing::trace!(target: crate::tracer::TARGET_IDS, identifier = %var_ref.identifier, field = %describe_field(field), "resolved field");
        if let VariableValue::Structured(sv) = &value {
            mx = SecurityDescriptor::merge(&mx, &sv.mx);
        }
    }

    let mut current = value_to_structured(&value, &mx);
    for stage in &var_ref.pipes {
        current = apply_pipe_stage(stage, &current, env, pipes)?;
        mx = SecurityDescriptor::merge(&mx, &current.mx);
    }

    Ok((current, mx))
}

fn apply_pipe_stage(stage: &PipeStage, input: &StructuredValue, env: &Environment, pipes: &dyn PipeInvoker) -> Result<StructuredValue, Diagnostic> {
    match stage {
        PipeStage::Named { name, args } => pipes.invoke_named(name, args, input, env),
        PipeStage::Inline { command } => pipes.invoke_inline(command, input, env),
        PipeStage::Parallel(members) => {
            let mut merged_text = String::new();
            let mut merged_mx = input.mx.clone();
            for (i, member) in members.iter().enumerate() {
                let out = apply_pipe_stage(member, input, env, pipes)?;
                if i > 0 {
                    merged_text.push('\n');
                }
                merged_text.push_str(out.as_text());
                merged_mx = SecurityDescriptor::merge(&merged_mx, &out.mx);
            }
            Ok(StructuredValue::text(merged_text, merged_mx))
        }
    }
}

fn value_to_structured(value: &VariableValue, mx: &SecurityDescriptor) -> StructuredValue {
    match value {
        VariableValue::Structured(sv) => sv.clone(),
        other => StructuredValue::text(other.to_display_string(), mx.clone()),
    }
}

fn describe_field(field: &FieldAccess) -> String {
    match field {
        FieldAccess::Name(n) => n.clone(),
        FieldAccess::Index(i) => i.to_string(),
        FieldAccess::Length => "length".to_string(),
    }
}

/// Step 5: context-specific text projection.
fn project(sv: &StructuredValue, context: InterpolationContext) -> String {
    match context {
        InterpolationContext::Default | InterpolationContext::Template => sv.as_text().to_string(),
        InterpolationContext::FilePath => sv.as_text().trim().to_string(),
        InterpolationContext::ShellCommand => shell_quote(sv.as_text()),
    }
}

/// Single-quote shell escaping: wraps in `'...'`, replacing embedded `'`
/// with the standard `'\''` break-out sequence.
fn shell_quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fake::{FakeFileSystem, FakeShell, NullCodeRunner, NullHttp, NullMcp, NullModuleResolver};
    use crate::collab::Collaborators;
    use crate::variable::{Variable, VariableOptions, VariableSource};
    use mlld_ast::{DirectiveKind, ValueTypeHint};

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

    fn var_ref(identifier: &str, fields: Vec<FieldAccess>) -> VariableReference {
        VariableReference { identifier: identifier.to_string(), fields, pipes: vec![], value_type: ValueTypeHint::Unknown }
    }

    #[test]
    fn resolves_simple_identifier() {
        let e = env();
        e.set_variable(Variable::simple_text("name", "Ada", VariableSource::simple(DirectiveKind::Var, "literal"), VariableOptions::default()));
        let (sv, _) = resolve_variable_reference(&var_ref("name", vec![]), &e, &NoPipes).unwrap();
        assert_eq!(sv.as_text(), "Ada");
    }

    #[test]
    fn undefined_identifier_raises_undefined_variable() {
        let e = env();
        let err = resolve_variable_reference(&var_ref("missing", vec![]), &e, &NoPipes).unwrap_err();
        assert!(matches!(err.kind, EvalError::UndefinedVariable { .. }));
    }

    #[test]
    fn field_access_walks_into_structured_value_and_merges_descriptors() {
        let e = env();
        let sv = StructuredValue::auto_detect(r#"{"topic":"rust"}"#, SecurityDescriptor::with_taint(["src:file"]));
        e.set_variable(Variable::structured("doc", sv, VariableSource::simple(DirectiveKind::Var, "literal"), VariableOptions::default()));
        let (result, mx) = resolve_variable_reference(&var_ref("doc", vec![FieldAccess::Name("topic".into())]), &e, &NoPipes).unwrap();
        assert_eq!(result.as_text(), "rust");
        assert!(mx.taint.contains("src:file"));
    }

    #[test]
    fn missing_field_raises_field_not_found() {
        let e = env();
        let sv = StructuredValue::auto_detect(r#"{"topic":"rust"}"#, SecurityDescriptor::empty());
        e.set_variable(Variable::structured("doc", sv, VariableSource::simple(DirectiveKind::Var, "literal"), VariableOptions::default()));
        let err = resolve_variable_reference(&var_ref("doc", vec![FieldAccess::Name("missing".into())]), &e, &NoPipes).unwrap_err();
        assert!(matches!(err.kind, EvalError::FieldNotFound { .. }));
    }

    #[test]
    fn shell_context_quotes_values_containing_special_characters() {
        let e = env();
        e.set_variable(Variable::simple_text("msg", "hello world", VariableSource::simple(DirectiveKind::Var, "literal"), VariableOptions::default()));
        let literal = TextLiteral {
            wrapper: mlld_ast::QuoteKind::Double,
            parts: vec![TemplatePart::Interpolation(var_ref("msg", vec![]))],
            is_multi_line: false,
        };
        let rendered = interpolate(&literal, &e, InterpolationContext::ShellCommand, &NoPipes).unwrap();
        assert_eq!(rendered, "'hello world'");
    }

    #[test]
    fn default_context_leaves_plain_text_untouched() {
        let e = env();
        e.set_variable(Variable::simple_text("name", "Ada", VariableSource::simple(DirectiveKind::Var, "literal"), VariableOptions::default()));
        let literal = TextLiteral {
            wrapper: mlld_ast::QuoteKind::Double,
            parts: vec![TemplatePart::Text("Hi ".into()), TemplatePart::Interpolation(var_ref("name", vec![]))],
            is_multi_line: false,
        };
        let rendered = interpolate(&literal, &e, InterpolationContext::Default, &NoPipes).unwrap();
        assert_eq!(rendered, "Hi Ada");
    }
}
