//! Pipeline stage executor and state machine (§4.5).
//!
//! A resumable-execution pattern: rather than pausing at a yield boundary
//! and handing control back to a host loop, a pipeline stage here returns a
//! [`StageOutcome`] that tells the executor whether to advance, retry,
//! reset, or stop. The executor owns the loop; stages never recurse into it
//! themselves.

use crate::error::{Diagnostic, EvalError};
use crate::structured_value::StructuredValue;

/// Default per-stage retry budget (Open Question, §9: resolved as 3 attempts
/// per stage before `PIPELINE_RETRY_EXHAUSTED`).
pub const DEFAULT_STAGE_RETRY_BUDGET: u32 = 3;

/// Default budget across the whole pipeline run, independent of per-stage
/// budgets (Open Question, §9: resolved as 3x the per-stage default so a
/// pipeline that resets backward repeatedly still terminates).
pub const DEFAULT_GLOBAL_RETRY_BUDGET: u32 = 9;

/// One completed attempt at a stage, kept for `@p.history`/`@p.tries`
/// read access from inside a later stage or guard.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub stage: usize,
    pub attempt: u32,
    pub output: StructuredValue,
    pub succeeded: bool,
}

/// `PipelineState` (§4.5): the fields every stage function and `@p`
/// reference can see while a pipeline is running.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub stage: usize,
    pub attempt: u32,
    pub global_attempt: u32,
    pub history: Vec<StageRecord>,
    pub previous_outputs: Vec<StructuredValue>,
    pub current_hint: Option<String>,
    pub hint_history: Vec<String>,
    pub context_id: String,
    pub stream_id: Option<String>,
    pub stage_retry_budget: u32,
    pub global_retry_budget: u32,
}

impl PipelineState {
    #[must_use]
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            stage: 0,
            attempt: 0,
            global_attempt: 0,
            history: Vec::new(),
            previous_outputs: Vec::new(),
            current_hint: None,
            hint_history: Vec::new(),
            context_id: context_id.into(),
            stream_id: None,
            stage_retry_budget: DEFAULT_STAGE_RETRY_BUDGET,
            global_retry_budget: DEFAULT_GLOBAL_RETRY_BUDGET,
        }
    }

    /// `@p.try`/`@p.output`-style lookback used by `retry` hints and guards.
    #[must_use]
    pub fn output_at(&self, stage: usize) -> Option<&StructuredValue> {
        self.previous_outputs.get(stage)
    }
}

/// What a stage function decides after running once (§4.5 stage contract).
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// Stage succeeded; its output feeds the next stage (or becomes the
    /// pipeline's result if this was the last stage). This is the
    /// "normal-return" case.
    Advance(StructuredValue),
    /// Stage asks to re-run itself, optionally with a hint visible to the
    /// retried attempt via `@p.hint`.
    Retry { hint: Option<String> },
    /// Stage asks the executor to jump back to an earlier stage, discarding
    /// all history recorded after it.
    Reset { to: usize, hint: Option<String> },
    /// Stage declares the whole pipeline finished, short-circuiting any
    /// remaining stages.
    Done(StructuredValue),
}

/// A single pipeline stage: named function plus the arguments it was
/// invoked with. Stages run against the evaluating `Environment` by
/// closing over it; the executor only needs the function boundary.
pub type StageFn<'a> = dyn Fn(&StructuredValue, &PipelineState) -> Result<StageOutcome, Diagnostic> + 'a;

/// One position in the pipeline: either a single stage or a bracketed
/// group that runs its members concurrently and merges their outputs
/// (§4.5 "parallel bracketed stages").
pub enum Stage<'a> {
    Single(Box<StageFn<'a>>),
    Parallel(Vec<Box<StageFn<'a>>>),
}

/// Runs `stages` in order against `input`, driving the retry/reset state
/// machine. Parallel groups run each member against the same input and
/// merge outputs by concatenating their text with newlines and unioning
/// their security descriptors — deterministic left-to-right, since real
/// concurrency would reorder writes nondeterministically and §4.5's
/// ordering guarantee forbids that (Open Question, §9, resolved in favor
/// of deterministic sequential evaluation of parallel groups).
///
/// # Errors
/// `PIPELINE_RETRY_EXHAUSTED` if a stage's retry budget (or the pipeline's
/// global budget) is exceeded; `PIPELINE_RESET_INVALID` if a stage resets to
/// an out-of-range index; any error surfaced by a stage function that chose
/// not to retry.
pub fn run_pipeline(stages: &[Stage<'_>], input: StructuredValue, context_id: impl Into<String>) -> Result<StructuredValue, Diagnostic> {
    let mut state = PipelineState::new(context_id);
    let mut current = input;
    state.previous_outputs.push(current.clone());

    while state.stage < stages.len() {
        let outcome = run_one(&stages[state.stage], &current, &state)?;
        match outcome {
            StageOutcome::Advance(output) => {
                tracing::trace!(stage = state.stage, attempt = state.attempt, "pipeline stage advanced");
                state.history.push(StageRecord { stage: state.stage, attempt: state.attempt, output: output.clone(), succeeded: true });
                state.previous_outputs.push(output.clone());
                current = output;
                state.stage += 1;
                state.attempt = 0;
                state.current_hint = None;
            }
            StageOutcome::Retry { hint } => {
                state.attempt += 1;
                state.global_attempt += 1;
                if let Some(h) = hint.clone() {
                    state.hint_history.push(h.clone());
                }
                state.current_hint = hint;
                tracing::debug!(target: crate::tracer::TARGET_FIX, stage = state.stage, attempt = state.attempt, global_attempt = state.global_attempt, "pipeline stage retrying");
                if state.attempt > state.stage_retry_budget || state.global_attempt > state.global_retry_budget {
                    return Err(Diagnostic::new(EvalError::PipelineRetryExhausted { stage: state.stage }));
                }
            }
            StageOutcome::Reset { to, hint } => {
                if to > state.stage {
                    return Err(Diagnostic::new(EvalError::PipelineResetInvalid { to }));
                }
                state.global_attempt += 1;
                if state.global_attempt > state.global_retry_budget {
                    return Err(Diagnostic::new(EvalError::PipelineRetryExhausted { stage: state.stage }));
                }
                tracing::debug!(target: crate::tracer::TARGET_FIX, from = state.stage, to, "pipeline resetting to earlier stage");
                state.history.retain(|r| r.stage < to);
                state.previous_outputs.truncate(to + 1);
                current = state.previous_outputs[to].clone();
                state.stage = to;
                state.attempt = 0;
                state.current_hint = hint;
            }
            StageOutcome::Done(output) => return Ok(output),
        }
    }
    Ok(current)
}

/// Every stage's output carries `src:pipeline` taint regardless of what the
/// stage closure itself tagged, so pipeline provenance survives even a stage
/// implementation that forgot to tag it (§4.5: "every stage output is also
/// tagged `src:pipeline`").
fn tag_pipeline(outcome: StageOutcome, stage: usize) -> StageOutcome {
    match outcome {
        StageOutcome::Advance(out) => StageOutcome::Advance(retag(out, stage)),
        StageOutcome::Done(out) => StageOutcome::Done(retag(out, stage)),
        other => other,
    }
}

fn retag(out: StructuredValue, stage: usize) -> StructuredValue {
    let mx = out.mx.derive(format!("stage:{stage}"), Some("src:pipeline"));
    StructuredValue { mx, ..out }
}

fn run_one(stage: &Stage<'_>, input: &StructuredValue, state: &PipelineState) -> Result<StageOutcome, Diagnostic> {
    let outcome = match stage {
        Stage::Single(f) => f(input, state)?,
        Stage::Parallel(members) => {
            let mut merged_text = String::new();
            let mut merged_mx = crate::security::SecurityDescriptor::empty();
            for (i, f) in members.iter().enumerate() {
                match f(input, state)? {
                    StageOutcome::Advance(out) | StageOutcome::Done(out) => {
                        if i > 0 {
                            merged_text.push('\n');
                        }
                        merged_text.push_str(out.as_text());
                        merged_mx = crate::security::SecurityDescriptor::merge(&merged_mx, &out.mx);
                    }
                    other => return Ok(tag_pipeline(other, state.stage)),
                }
            }
            StageOutcome::Advance(StructuredValue::text(merged_text, merged_mx))
        }
    };
    Ok(tag_pipeline(outcome, state.stage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SecurityDescriptor;

    fn sv(text: &str) -> StructuredValue {
        StructuredValue::text(text, SecurityDescriptor::empty())
    }

    #[test]
    fn pipeline_advances_through_stages_in_order() {
        let stages = vec![
            Stage::Single(Box::new(|input, _state| Ok(StageOutcome::Advance(sv(&format!("{}-a", input.as_text())))))),
            Stage::Single(Box::new(|input, _state| Ok(StageOutcome::Advance(sv(&format!("{}-b", input.as_text())))))),
        ];
        let result = run_pipeline(&stages, sv("x"), "ctx").unwrap();
        assert_eq!(result.as_text(), "x-a-b");
    }

    #[test]
    fn retry_is_idempotent_given_identical_input() {
        let stages = vec![Stage::Single(Box::new(|input, state| {
            if state.attempt < 2 {
                Ok(StageOutcome::Retry { hint: None })
            } else {
                Ok(StageOutcome::Advance(sv(input.as_text())))
            }
        }))];
        let result = run_pipeline(&stages, sv("same"), "ctx").unwrap();
        assert_eq!(result.as_text(), "same");
    }

    #[test]
    fn retry_exhaustion_raises_pipeline_retry_exhausted() {
        let stages = vec![Stage::Single(Box::new(|_input, _state| Ok(StageOutcome::Retry { hint: None })))];
        let err = run_pipeline(&stages, sv("x"), "ctx").unwrap_err();
        assert!(matches!(err.kind, EvalError::PipelineRetryExhausted { .. }));
    }

    #[test]
    fn reset_to_future_stage_is_invalid() {
        let stages = vec![
            Stage::Single(Box::new(|_input, _state| Ok(StageOutcome::Reset { to: 5, hint: None }))),
            Stage::Single(Box::new(|input, _state| Ok(StageOutcome::Advance(input.clone())))),
        ];
        let err = run_pipeline(&stages, sv("x"), "ctx").unwrap_err();
        assert!(matches!(err.kind, EvalError::PipelineResetInvalid { .. }));
    }

    #[test]
    fn parallel_group_merges_outputs_deterministically() {
        let stages = vec![Stage::Parallel(vec![
            Box::new(|input: &StructuredValue, _state: &PipelineState| Ok(StageOutcome::Advance(sv(&format!("{}-1", input.as_text()))))),
            Box::new(|input: &StructuredValue, _state: &PipelineState| Ok(StageOutcome::Advance(sv(&format!("{}-2", input.as_text()))))),
        ])];
        let result = run_pipeline(&stages, sv("x"), "ctx").unwrap();
        assert_eq!(result.as_text(), "x-1\nx-2");
    }

    #[test]
    fn done_short_circuits_remaining_stages() {
        let stages = vec![
            Stage::Single(Box::new(|_input, _state| Ok(StageOutcome::Done(sv("early"))))),
            Stage::Single(Box::new(|_input, _state| Ok(StageOutcome::Advance(sv("never"))))),
        ];
        let result = run_pipeline(&stages, sv("x"), "ctx").unwrap();
        assert_eq!(result.as_text(), "early");
    }
}
