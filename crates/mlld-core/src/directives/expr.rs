//! Expression evaluation: the recursive core every directive evaluator
//! bottoms out in. `/var @x = <expr>`, `/exe` bodies, pipe stage arguments,
//! `/when` conditions, and `/for` collections are all `Expr` (§6.1); this is
//! the one function that knows how to turn any of them into a [`Variable`].

use indexmap::IndexMap;
use mlld_ast::{
    ArrayExpr, BinaryExpression, BinaryOp, CodeExpr, CommandExpr, Expr, ExecInvocation, ExeBlock,
    ForExpression, LoadContentExpr, Literal, LoopExpression, ObjectExpr, PathExpr, PathSegment, SectionExpr,
    TernaryExpression, TextLiteral, UnaryExpression, UnaryOp, VariableReferenceWithTail, WhenExpression, WhenModifier,
    WithClause, GuardPhase,
};

use crate::content_loader;
use crate::environment::Environment;
use crate::error::{Diagnostic, EvalError};
use crate::guard;
use crate::interpolation::{self, InterpolationContext, PipeInvoker};
use crate::pipeline::{self, Stage, StageOutcome};
use crate::security::SecurityDescriptor;
use crate::structured_value::StructuredValue;
use crate::variable::{
    Executable, ExecutableKind, Primitive, Template, TemplateKind, ToolEntry, ToolsCollection, Variable,
    VariableOptions, VariableSource, VariableValue,
};

use super::CoreEvaluator;

/// Hard ceiling on `/for`/`Loop` iterations absent an explicit
/// `max_iterations`, so a malformed or adversarial loop condition can't hang
/// the evaluator (§5: suspension points don't help against a pure-compute
/// infinite loop with no external call to cancel at).
pub const DEFAULT_LOOP_ITERATION_CAP: u32 = 10_000;

/// # Errors
/// Whatever the specific expression kind's evaluation raises.
pub fn eval_expr(expr: &Expr, env: &Environment) -> Result<Variable, Diagnostic> {
    match expr {
        Expr::Literal(lit) => eval_literal(lit, env),
        Expr::Text(text) => eval_text(text, env, false),
        Expr::VariableReference(var_ref) => eval_variable_reference(var_ref, env),
        Expr::Array(arr) => eval_array(arr, env),
        Expr::Object(obj) => eval_object(obj, env, false),
        Expr::Path(path) => eval_path(path, env),
        Expr::Section(section) => eval_section(section, env),
        Expr::LoadContent(load) => eval_load_content(load, env),
        Expr::Command(cmd) => eval_command(cmd, env, "exec"),
        Expr::Code(code) => eval_code(code, env),
        Expr::ExecInvocation(invocation) => eval_exec_invocation(invocation, env),
        Expr::ExeBlock(block) => eval_exe_block(block, env),
        Expr::When(when) => eval_when(when, env),
        Expr::For(for_expr) => eval_for(for_expr, env),
        Expr::Loop(loop_expr) => eval_loop(loop_expr, env),
        Expr::Binary(bin) => eval_binary(bin, env),
        Expr::Ternary(tern) => eval_ternary(tern, env),
        Expr::Unary(un) => eval_unary(un, env),
        Expr::FileReference(path) => {
            let p = resolve_path(path, env)?;
            let (value, mx) = content_loader::load_file(env, &p)?;
            Ok(Variable::file_content(p.clone(), value_text(&value), p, source("file-reference"), VariableOptions { mx, ..Default::default() }))
        }
        Expr::Allow => Ok(Variable::primitive("", Primitive::Bool(true), source("allow"), VariableOptions::default())),
        Expr::Deny(reason) => {
            let rendered = eval_text(reason, env, false)?;
            Ok(Variable::primitive("", Primitive::Bool(false), source("deny"), VariableOptions { mx: rendered.mx, ..Default::default() }))
        }
    }
}

fn value_text(value: &VariableValue) -> String {
    value.to_display_string()
}

/// Records a `<... as "...">` rename template's result in a loaded value's
/// `StructuredValue` metadata (§4.4.1 component table). A single file's
/// rename goes under `name`; a glob's goes under `names`, one renamed entry
/// per matched path, newline-joined in match order.
fn apply_rename_metadata(sv: &mut StructuredValue, template: &mlld_ast::TextLiteral, value: &VariableValue) {
    match value {
        VariableValue::FileContent { path, .. } | VariableValue::SectionContent { path, .. } => {
            sv.metadata.insert("name".to_string(), content_loader::apply_rename_template(template, path));
        }
        VariableValue::Array { items, .. } => {
            let names: Vec<String> = items
                .iter()
                .map(|item| match item {
                    VariableValue::FileContent { path, .. } => content_loader::apply_rename_template(template, path),
                    _ => String::new(),
                })
                .collect();
            sv.metadata.insert("names".to_string(), names.join("\n"));
        }
        _ => {}
    }
}

fn source(form: &str) -> VariableSource {
    VariableSource::simple(mlld_ast::DirectiveKind::Var, form)
}

fn eval_literal(lit: &Literal, env: &Environment) -> Result<Variable, Diagnostic> {
    match lit {
        Literal::Number(n) => Ok(Variable::primitive("", Primitive::Number(*n), source("number"), VariableOptions::default())),
        Literal::Bool(b) => Ok(Variable::primitive("", Primitive::Bool(*b), source("bool"), VariableOptions::default())),
        Literal::Null => Ok(Variable::primitive("", Primitive::Null, source("null"), VariableOptions::default())),
        Literal::Text(text) => eval_text(text, env, false),
    }
}

/// Renders a text literal. `defer` suspends interpolation for triple-colon
/// templates (§9 "triple-colon lazy-AST-with-cache") — the caller is
/// `/var`'s dispatch, which is the only place laziness is observable.
pub fn eval_text(text: &TextLiteral, env: &Environment, defer: bool) -> Result<Variable, Diagnostic> {
    if defer && text.wrapper == mlld_ast::QuoteKind::TripleColon {
        let template = Template { kind: TemplateKind::TripleColon, body: text.clone(), rendered: None };
        return Ok(Variable::template("", template, source("triple-colon"), VariableOptions::default()));
    }
    let rendered = interpolation::interpolate(text, env, InterpolationContext::Default, &CoreEvaluator)?;
    if text.has_interpolation() {
        Ok(Variable::interpolated_text("", rendered, Vec::new(), source("interpolated"), VariableOptions::default()))
    } else {
        Ok(Variable::simple_text("", rendered, source("simple"), VariableOptions::default()))
    }
}

fn eval_variable_reference(var_ref: &VariableReferenceWithTail, env: &Environment) -> Result<Variable, Diagnostic> {
    let (mut sv, mut mx) = interpolation::resolve_variable_reference(&var_ref.variable, env, &CoreEvaluator)?;
    if let Some(with) = &var_ref.with_clause {
        sv = run_pipeline_stages(&with.pipeline, sv, env)?;
        mx = SecurityDescriptor::merge(&mx, &sv.mx);
    }
    Ok(Variable::structured(var_ref.variable.identifier.clone(), sv, source("variable-reference"), VariableOptions { mx, ..Default::default() }))
}

fn eval_array(arr: &ArrayExpr, env: &Environment) -> Result<Variable, Diagnostic> {
    let mut items = Vec::with_capacity(arr.items.len());
    let mut mx = SecurityDescriptor::empty();
    let mut is_complex = false;
    for item in &arr.items {
        let v = eval_expr(item, env)?;
        is_complex |= !matches!(item, Expr::Literal(_));
        mx = SecurityDescriptor::merge(&mx, &v.mx);
        items.push(v.value);
    }
    Ok(Variable::array("", items, is_complex, source("array"), VariableOptions { mx, ..Default::default() }))
}

fn eval_object(obj: &ObjectExpr, env: &Environment, force_tools: bool) -> Result<Variable, Diagnostic> {
    let mut is_tools = force_tools;
    let mut entries = IndexMap::new();
    let mut tool_entries = IndexMap::new();
    let mut mx = SecurityDescriptor::empty();

    for (key, entry) in &obj.entries {
        if let Some(tool_meta) = &entry.tool {
            is_tools = true;
            let mut bind = IndexMap::new();
            for (k, v_expr) in &tool_meta.bind {
                let v = eval_expr(v_expr, env)?;
                mx = SecurityDescriptor::merge(&mx, &v.mx);
                bind.insert(k.clone(), v.value);
            }
            tool_entries.insert(
                key.clone(),
                ToolEntry { executable_name: tool_meta.mlld_ref.clone(), labels: tool_meta.labels.clone(), description: tool_meta.description.clone(), bind, expose: tool_meta.expose.clone() },
            );
            continue;
        }
        let v = eval_expr(&entry.value, env)?;
        mx = SecurityDescriptor::merge(&mx, &v.mx);
        entries.insert(key.clone(), v.value);
    }

    if is_tools {
        let collection = ToolsCollection { tools: tool_entries };
        crate::tools::validate(&collection, env)?;
        return Ok(Variable::tools_collection("", collection, source("tools-collection"), VariableOptions { mx, ..Default::default() }));
    }
    Ok(Variable::object("", entries, false, source("object"), VariableOptions { mx, ..Default::default() }))
}

/// Public seam for `/var`'s object dispatch to force tools-collection
/// construction even for an object with no entry-level `tool` metadata
/// (an author may write `/var @tools = { ... }` with directive-level
/// `meta.is_tools_collection` set instead of per-entry markers).
pub fn eval_object_as(obj: &ObjectExpr, env: &Environment, as_tools: bool) -> Result<Variable, Diagnostic> {
    eval_object(obj, env, as_tools)
}

fn resolve_path(path: &PathExpr, env: &Environment) -> Result<String, Diagnostic> {
    let mut out = String::new();
    for segment in &path.segments {
        match segment {
            PathSegment::Text(t) => out.push_str(t),
            PathSegment::Glob(g) => out.push_str(g),
            PathSegment::Interpolation(var_ref) => {
                let (sv, _mx) = interpolation::resolve_variable_reference(var_ref, env, &CoreEvaluator)?;
                out.push_str(sv.as_text());
            }
        }
    }
    Ok(out)
}

fn eval_path(path: &PathExpr, env: &Environment) -> Result<Variable, Diagnostic> {
    let resolved = resolve_path(path, env)?;
    Ok(Variable::simple_text("", resolved, source("path"), VariableOptions::default()))
}

fn eval_section(section: &SectionExpr, env: &Environment) -> Result<Variable, Diagnostic> {
    let path = resolve_path(&section.path, env)?;
    let (value, mx) = content_loader::load_section(env, &path, &section.section)?;
    Ok(Variable::section_content("", value_text(&value), path, section.section.clone(), source("section"), VariableOptions { mx, ..Default::default() }))
}

fn eval_load_content(load: &LoadContentExpr, env: &Environment) -> Result<Variable, Diagnostic> {
    let path = resolve_path(&load.source, env)?;
    let (value, mx) = if load.options.is_glob { content_loader::load_glob(env, &path)? } else { content_loader::load_file(env, &path)? };
    // A glob can match files of mixed extensions, so its combined value falls
    // back to JSON-or-text auto-detection; a single file's own extension
    // drives format-aware parsing (yaml/toml/csv/xml, §4.4.1).
    let mut sv = if load.options.is_glob {
        StructuredValue::auto_detect(value_text(&value), mx)
    } else {
        StructuredValue::from_path(&path, value_text(&value), mx)
    };
    if let Some(template) = &load.options.rename_template {
        apply_rename_metadata(&mut sv, template, &value);
    }
    let sv = if load.pipes.is_empty() { sv } else { run_pipeline_stages(&load.pipes, sv, env)? };
    let sv_mx = sv.mx.clone();
    Ok(Variable::structured("", sv, source("load-content"), VariableOptions { mx: sv_mx, ..Default::default() }))
}

fn run_pipeline_stages(stages: &[mlld_ast::PipeStage], input: StructuredValue, env: &Environment) -> Result<StructuredValue, Diagnostic> {
    if stages.is_empty() {
        return Ok(input);
    }
    let built: Vec<Stage<'_>> = stages
        .iter()
        .map(|stage| build_stage(stage, env))
        .collect();
    pipeline::run_pipeline(&built, input, "expr-pipeline")
}

fn build_stage<'a>(stage: &'a mlld_ast::PipeStage, env: &'a Environment) -> Stage<'a> {
    match stage {
        mlld_ast::PipeStage::Parallel(members) => {
            let fns = members.iter().map(|m| build_single(m, env)).collect();
            Stage::Parallel(fns)
        }
        other => Stage::Single(build_single(other, env)),
    }
}

fn build_single<'a>(stage: &'a mlld_ast::PipeStage, env: &'a Environment) -> Box<dyn Fn(&StructuredValue, &pipeline::PipelineState) -> Result<StageOutcome, Diagnostic> + 'a> {
    Box::new(move |input: &StructuredValue, _state: &pipeline::PipelineState| {
        let out = match stage {
            mlld_ast::PipeStage::Named { name, args } => CoreEvaluator.invoke_named(name, args, input, env)?,
            mlld_ast::PipeStage::Inline { command } => CoreEvaluator.invoke_inline(command, input, env)?,
            mlld_ast::PipeStage::Parallel(_) => unreachable!("parallel groups are built via build_stage"),
        };
        Ok(StageOutcome::Advance(out))
    })
}

fn eval_command(cmd: &CommandExpr, env: &Environment, operation: &str) -> Result<Variable, Diagnostic> {
    let rendered = interpolation::interpolate(&cmd.command, env, InterpolationContext::ShellCommand, &CoreEvaluator)?;
    run_shell_with_guards(&rendered, cmd.with_clause.as_deref(), env, operation)
}

/// The `/run` command form's 6-step semantics (§4.4.3): interpolate →
/// before-guard → execute → after-guard → wrap result → pipeline.
fn run_shell_with_guards(rendered: &str, with_clause: Option<&WithClause>, env: &Environment, operation: &str) -> Result<Variable, Diagnostic> {
    let probe = StructuredValue::text(rendered.to_string(), SecurityDescriptor::empty());
    guard::consult(env, GuardPhase::Before, operation, &SecurityDescriptor::empty(), &probe, &CoreEvaluator)?;

    let stdin = stdin_text(with_clause, env)?;
    let (output, mx) = env.execute_command(rendered, stdin.as_deref())?;
    let mut sv = StructuredValue::auto_detect(output.stdout, mx);

    guard::consult(env, GuardPhase::After, operation, &sv.mx.clone(), &sv, &CoreEvaluator)?;

    if let Some(with) = with_clause {
        sv = run_pipeline_stages(&with.pipeline, sv, env)?;
    }
    let final_mx = sv.mx.clone();
    Ok(Variable::command_result("", sv.as_text().to_string(), rendered.to_string(), source("run"), VariableOptions { mx: final_mx, ..Default::default() }))
}

fn stdin_text(with_clause: Option<&WithClause>, env: &Environment) -> Result<Option<String>, Diagnostic> {
    let Some(with) = with_clause else { return Ok(None) };
    let Some(expr) = &with.stdin else { return Ok(None) };
    let v = eval_expr(expr, env)?;
    Ok(Some(v.to_display_string()))
}

fn eval_code(code: &CodeExpr, env: &Environment) -> Result<Variable, Diagnostic> {
    let lang = match code.language {
        mlld_ast::CodeLanguage::Js => "js",
        mlld_ast::CodeLanguage::Node => "node",
        mlld_ast::CodeLanguage::Python => "python",
        mlld_ast::CodeLanguage::Sh => "sh",
    };
    let operation = format!("code:{lang}");
    let probe = StructuredValue::text(code.code.clone(), SecurityDescriptor::empty());
    guard::consult(env, GuardPhase::Before, &operation, &SecurityDescriptor::empty(), &probe, &CoreEvaluator)?;

    let params = HashMapString::new();
    let output = env.collaborators().code_runner.run(lang, &code.code, &params)?;
    let mx = SecurityDescriptor::empty().derive(format!("code:{lang}"), Some("src:exec"));
    let mut sv = StructuredValue::auto_detect(output.stdout, mx);

    guard::consult(env, GuardPhase::After, &operation, &sv.mx.clone(), &sv, &CoreEvaluator)?;

    if let Some(with) = &code.with_clause {
        sv = run_pipeline_stages(&with.pipeline, sv, env)?;
    }
    let final_mx = sv.mx.clone();
    Ok(Variable::computed_value("", sv.as_text().to_string(), code.language, source("code"), VariableOptions { mx: final_mx, ..Default::default() }))
}

type HashMapString = std::collections::HashMap<String, String>;

fn eval_exec_invocation(invocation: &ExecInvocation, env: &Environment) -> Result<Variable, Diagnostic> {
    let callee = env.require_variable(&invocation.name)?;
    let executable = callee.expect_executable()?.clone();
    let call_env = env.create_child();

    for (i, param) in executable.params.iter().enumerate() {
        let value = invocation
            .args
            .get(i)
            .map(|arg| eval_expr(arg, env))
            .transpose()?
            .unwrap_or_else(|| Variable::primitive("", Primitive::Null, source("missing-arg"), VariableOptions::default()));
        call_env.set_variable(Variable { name: param.clone(), ..value });
    }

    let mut result = eval_expr(&executable.body, &call_env)?;
    if let Some(with) = &invocation.with_clause {
        if !with.pipeline.is_empty() {
            let sv = StructuredValue::auto_detect(result.to_display_string(), result.mx.clone());
            let piped = run_pipeline_stages(&with.pipeline, sv, env)?;
            let mx = piped.mx.clone();
            result = Variable::structured(invocation.name.clone(), piped, source("exec-invocation"), VariableOptions { mx, ..Default::default() });
        }
    }
    Ok(result)
}

fn eval_exe_block(block: &ExeBlock, _env: &Environment) -> Result<Variable, Diagnostic> {
    let executable = Executable { kind: ExecutableKind::Composite, params: block.params.clone(), body: (*block.body).clone(), captured_scope: None };
    Ok(Variable::executable("", executable, source("exe-block"), VariableOptions::default()))
}

pub(crate) fn is_truthy(v: &Variable) -> bool {
    match &v.value {
        VariableValue::Primitive(Primitive::Bool(b)) => *b,
        VariableValue::Primitive(Primitive::Null) => false,
        VariableValue::Primitive(Primitive::Number(n)) => *n != 0.0,
        VariableValue::SimpleText(s) | VariableValue::InterpolatedText { text: s, .. } => !s.is_empty(),
        _ => true,
    }
}

/// Shared by both `/when` directive forms — the AST reduces simple and
/// block `/when` to the same `WhenExpression` shape (§4.4.4).
pub fn eval_when(when: &WhenExpression, env: &Environment) -> Result<Variable, Diagnostic> {
    match when.modifier {
        WhenModifier::First => {
            for arm in &when.arms {
                if arm.is_default || arm.condition.as_ref().map(|c| eval_expr(c, env)).transpose()?.as_ref().is_some_and(is_truthy) {
                    return eval_expr(&arm.action, env);
                }
            }
            Ok(Variable::primitive("", Primitive::Null, source("when-no-match"), VariableOptions::default()))
        }
        WhenModifier::All => {
            let mut last = Variable::primitive("", Primitive::Null, source("when-none"), VariableOptions::default());
            for arm in &when.arms {
                let matched = arm.is_default || arm.condition.as_ref().map(|c| eval_expr(c, env)).transpose()?.as_ref().is_some_and(is_truthy);
                if matched {
                    last = eval_expr(&arm.action, env)?;
                }
            }
            Ok(last)
        }
        WhenModifier::Any => {
            for arm in &when.arms {
                let matched = arm.is_default || arm.condition.as_ref().map(|c| eval_expr(c, env)).transpose()?.as_ref().is_some_and(is_truthy);
                if matched {
                    let result = eval_expr(&arm.action, env)?;
                    if is_truthy(&result) {
                        return Ok(result);
                    }
                }
            }
            Ok(Variable::primitive("", Primitive::Null, source("when-no-match"), VariableOptions::default()))
        }
    }
}

fn iterate_values(collection: &Variable) -> Vec<VariableValue> {
    match &collection.value {
        VariableValue::Array { items, .. } => items.clone(),
        VariableValue::Object { entries, .. } => entries.values().cloned().collect(),
        VariableValue::Structured(sv) => match sv.as_data() {
            crate::structured_value::DataValue::Array(items) => items.iter().map(|d| VariableValue::Structured(StructuredValue::new(d.to_display_string(), d.clone(), sv.value_type, sv.mx.clone()))).collect(),
            crate::structured_value::DataValue::Object(map) => map.values().map(|d| VariableValue::Structured(StructuredValue::new(d.to_display_string(), d.clone(), sv.value_type, sv.mx.clone()))).collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn eval_for(for_expr: &ForExpression, env: &Environment) -> Result<Variable, Diagnostic> {
    let collection = eval_expr(&for_expr.collection, env)?;
    let items = iterate_values(&collection);
    let mut results = Vec::with_capacity(items.len());
    let mut mx = collection.mx.clone();
    for item in items {
        let child = env.create_child();
        let item_var = Variable::from_value(for_expr.var_name.clone(), item, source("for-binding"), VariableOptions::default());
        child.set_variable(item_var);
        let v = eval_expr(&for_expr.body, &child)?;
        mx = SecurityDescriptor::merge(&mx, &v.mx);
        results.push(v.value);
    }
    Ok(Variable::array("", results, true, source("for"), VariableOptions { mx, ..Default::default() }))
}

fn eval_loop(loop_expr: &LoopExpression, env: &Environment) -> Result<Variable, Diagnostic> {
    let cap = loop_expr.max_iterations.unwrap_or(DEFAULT_LOOP_ITERATION_CAP);
    let mut results = Vec::new();
    let mut mx = SecurityDescriptor::empty();
    for _ in 0..cap {
        let cond = eval_expr(&loop_expr.condition, env)?;
        if !is_truthy(&cond) {
            break;
        }
        let v = eval_expr(&loop_expr.body, env)?;
        mx = SecurityDescriptor::merge(&mx, &v.mx);
        results.push(v.value);
    }
    Ok(Variable::array("", results, true, source("loop"), VariableOptions { mx, ..Default::default() }))
}

fn eval_binary(bin: &BinaryExpression, env: &Environment) -> Result<Variable, Diagnostic> {
    let left = eval_expr(&bin.left, env)?;
    if matches!(bin.op, BinaryOp::And) && !is_truthy(&left) {
        return Ok(left);
    }
    if matches!(bin.op, BinaryOp::Or) && is_truthy(&left) {
        return Ok(left);
    }
    let right = eval_expr(&bin.right, env)?;
    let mx = SecurityDescriptor::merge(&left.mx, &right.mx);

    let result = match bin.op {
        BinaryOp::Add => match (&left.value, &right.value) {
            (VariableValue::Primitive(Primitive::Number(a)), VariableValue::Primitive(Primitive::Number(b))) => VariableValue::Primitive(Primitive::Number(a + b)),
            _ => VariableValue::SimpleText(format!("{}{}", left.to_display_string(), right.to_display_string())),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let a = as_number(&left)?;
            let b = as_number(&right)?;
            VariableValue::Primitive(Primitive::Number(match bin.op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => unreachable!(),
            }))
        }
        BinaryOp::Eq => VariableValue::Primitive(Primitive::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => VariableValue::Primitive(Primitive::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let a = as_number(&left)?;
            let b = as_number(&right)?;
            VariableValue::Primitive(Primitive::Bool(match bin.op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                BinaryOp::Ge => a >= b,
                _ => unreachable!(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited above"),
    };
    Ok(Variable::from_value("", result, source("binary"), VariableOptions { mx, ..Default::default() }))
}

fn values_equal(a: &Variable, b: &Variable) -> bool {
    a.to_display_string() == b.to_display_string()
}

fn as_number(v: &Variable) -> Result<f64, Diagnostic> {
    match &v.value {
        VariableValue::Primitive(Primitive::Number(n)) => Ok(*n),
        other => Err(Diagnostic::new(EvalError::InvalidValueKind { expected: "Number".into(), got: other.kind_name().into() })),
    }
}

fn eval_ternary(tern: &TernaryExpression, env: &Environment) -> Result<Variable, Diagnostic> {
    let cond = eval_expr(&tern.cond, env)?;
    if is_truthy(&cond) { eval_expr(&tern.then_branch, env) } else { eval_expr(&tern.else_branch, env) }
}

fn eval_unary(un: &UnaryExpression, env: &Environment) -> Result<Variable, Diagnostic> {
    let operand = eval_expr(&un.operand, env)?;
    let mx = operand.mx.clone();
    let value = match un.op {
        UnaryOp::Not => VariableValue::Primitive(Primitive::Bool(!is_truthy(&operand))),
        UnaryOp::Neg => VariableValue::Primitive(Primitive::Number(-as_number(&operand)?)),
    };
    Ok(Variable::from_value("", value, source("unary"), VariableOptions { mx, ..Default::default() }))
}
