//! The guard engine (§4.7): author-declared `/guard` clauses consulted
//! before and after collaborator operations.
//!
//! A guard is installed once (`/guard reader before op:read = when [...]`)
//! and consulted on every matching operation afterward. Consultation is a
//! three-step match/evaluate/deny-or-allow: find every installed guard whose
//! phase and operation match, evaluate its `when` arms top to bottom against
//! a synthetic match context exposing `@mx`/`@input`/`@op`, and deny the
//! operation the moment any matched arm's action is `false`.

use mlld_ast::{Expr, GuardClause, GuardPhase, WhenArm};

use crate::environment::Environment;
use crate::error::{Diagnostic, EvalError};
use crate::security::SecurityDescriptor;
use crate::structured_value::StructuredValue;
use crate::variable::{Variable, VariableOptions, VariableSource, VariableValue};

/// `name → installed clause` registry held by an [`Environment`].
#[derive(Debug, Clone, Default)]
pub struct GuardRegistry {
    clauses: Vec<GuardClause>,
}

impl GuardRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, clause: GuardClause) {
        self.clauses.retain(|c| c.name != clause.name);
        self.clauses.push(clause);
    }

    #[must_use]
    pub fn matching(&self, phase: GuardPhase, operation: &str) -> Vec<GuardClause> {
        self.clauses.iter().filter(|c| c.phase == phase && c.operation == operation).cloned().collect()
    }
}

/// What a guard arm's action expression decided (§4.7): `allow`, or `deny`
/// with the author's own reason string carried through to
/// `GUARD_DENIED{name, reason}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Allow,
    Deny(String),
}

/// Evaluates a guard's `when` condition/action expressions. Implemented by
/// `crate::directives`, since expression evaluation is a directive-evaluator
/// concern the guard engine itself shouldn't need to know about.
pub trait ConditionEvaluator {
    /// # Errors
    /// Whatever evaluating `expr` raises.
    fn eval_truthy(&self, expr: &Expr, env: &Environment) -> Result<bool, Diagnostic>;

    /// Evaluates a guard arm's action: `allow`/`deny "<reason>"` carry their
    /// verdict directly; any other expression falls back to truthy/falsy with
    /// no reason text, for guards written against a plain boolean action.
    ///
    /// # Errors
    /// Whatever evaluating `expr` raises.
    fn eval_guard_action(&self, expr: &Expr, env: &Environment) -> Result<GuardVerdict, Diagnostic>;
}

/// Consults every installed guard matching `(phase, operation)`, innermost
/// scope first. The first matched arm across all matching guards that
/// evaluates to an explicit `false` action denies the operation; anything
/// else (no guard installed, no arm matched, a matched arm whose action
/// isn't `false`) allows it.
///
/// # Errors
/// `GUARD_DENIED` if a matched guard's arm denies; whatever the condition
/// evaluator raises while evaluating conditions/actions.
pub fn consult(env: &Environment, phase: GuardPhase, operation: &str, mx: &SecurityDescriptor, input: &StructuredValue, evaluator: &dyn ConditionEvaluator) -> Result<(), Diagnostic> {
    let guards = env.guards_for(phase, operation);
    if guards.is_empty() {
        return Ok(());
    }
    tracing::trace!(?phase, operation, count = guards.len(), "consulting guards");
    for guard in guards {
        if let Some(verdict) = evaluate_guard(&guard, env, mx, input, operation, evaluator)? {
            if let GuardVerdict::Deny(reason) = verdict {
                let reason = if reason.is_empty() { format!("denied by `{}` on {operation}", guard.name) } else { reason };
                tracing::debug!(guard = %guard.name, operation, reason = %reason, "guard denied operation");
                return Err(Diagnostic::new(EvalError::GuardDenied { guard: guard.name.clone(), reason }));
            }
        }
    }
    Ok(())
}

/// Builds the match context (`@mx`, `@input`, `@op`) and walks `guard.when`'s
/// arms, first match wins. Returns `None` if no arm matched (guard abstains).
fn evaluate_guard(guard: &GuardClause, env: &Environment, mx: &SecurityDescriptor, input: &StructuredValue, operation: &str, evaluator: &dyn ConditionEvaluator) -> Result<Option<GuardVerdict>, Diagnostic> {
    let ctx = env.create_child();
    let src = VariableSource::simple(mlld_ast::DirectiveKind::Guard, "match-context");

    let labels: Vec<VariableValue> = mx.labels.iter().map(VariableValue::SimpleText).collect();
    let taint: Vec<VariableValue> = mx.taint.iter().map(VariableValue::SimpleText).collect();
    let mut mx_obj = indexmap::IndexMap::new();
    mx_obj.insert("labels".to_string(), VariableValue::Array { items: labels, is_complex: false, lazy_items: vec![] });
    mx_obj.insert("taint".to_string(), VariableValue::Array { items: taint, is_complex: false, lazy_items: vec![] });
    ctx.set_variable(Variable::object("mx", mx_obj, false, src.clone(), VariableOptions::default()));
    ctx.set_variable(Variable::structured("input", input.clone(), src.clone(), VariableOptions::default()));
    ctx.set_variable(Variable::simple_text("op", operation, src, VariableOptions::default()));

    for arm in &guard.when.arms {
        if arm_matches(arm, &ctx, evaluator)? {
            let verdict = evaluator.eval_guard_action(&arm.action, &ctx)?;
            return Ok(Some(verdict));
        }
    }
    Ok(None)
}

fn arm_matches(arm: &WhenArm, env: &Environment, evaluator: &dyn ConditionEvaluator) -> Result<bool, Diagnostic> {
    if arm.is_default {
        return Ok(true);
    }
    match &arm.condition {
        Some(cond) => evaluator.eval_truthy(cond, env),
        None => Ok(true),
    }
}
