//! Error taxonomy (§7).
//!
//! Evaluators do not catch errors they did not raise; they attach
//! [`ErrorContext`] and rethrow. [`EvalError`] is the kind; [`Diagnostic`] is
//! the kind plus the directive/location context the driver reports.

use mlld_ast::Location;
use thiserror::Error;

use crate::cancellation::Aborted;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("field not found: {field} on {on}")]
    FieldNotFound { field: String, on: String },

    #[error("invalid value kind: expected {expected}, got {got}")]
    InvalidValueKind { expected: String, got: String },

    #[error("invalid tools collection: {reason}")]
    ToolsCollectionInvalid { reason: String },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("file error: {path}: {cause}")]
    FileError { path: String, cause: String },

    #[error("import not found: {specifier}")]
    ImportNotFound { specifier: String },

    #[error("import cycle: {0:?}")]
    ImportCycle(Vec<String>),

    #[error("http error: {0}")]
    HttpError(String),

    #[error("mcp error: {0}")]
    McpError(String),

    #[error("command failed: {cmd} (exit {exit_code}): {stderr}")]
    ExecutionFailed { cmd: String, exit_code: i32, stderr: String },

    #[error("guard '{guard}' denied: {reason}")]
    GuardDenied { guard: String, reason: String },

    #[error("pipeline retry exhausted at stage {stage}")]
    PipelineRetryExhausted { stage: usize },

    #[error("pipeline reset to invalid stage {to}")]
    PipelineResetInvalid { to: usize },

    #[error("evaluation aborted")]
    Aborted,
}

impl From<Aborted> for EvalError {
    fn from(_: Aborted) -> Self {
        Self::Aborted
    }
}

/// `{directiveKind, subtype, location, currentFilePath}` attached as an error
/// crosses a directive boundary (§7).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub directive_kind: String,
    pub subtype: String,
    pub location: Option<Location>,
    pub current_file_path: Option<String>,
}

/// An `EvalError` plus the context it picked up while bubbling up. The
/// driver's report is built from this, not the bare `EvalError`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct Diagnostic {
    pub kind: EvalError,
    pub context: Vec<ErrorContext>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: EvalError) -> Self {
        Self { kind, context: Vec::new() }
    }

    /// Attaches context at a directive boundary. Called once per directive
    /// frame the error passes through, innermost first.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context.push(ctx);
        self
    }

    /// Whether this error kind may be recovered by a pipeline retry/reset
    /// (§7: "the pipeline layer is the only place where execution errors may
    /// be recovered").
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, EvalError::ExecutionFailed { .. } | EvalError::FileError { .. } | EvalError::HttpError(_) | EvalError::McpError(_))
    }
}

impl From<EvalError> for Diagnostic {
    fn from(kind: EvalError) -> Self {
        Self::new(kind)
    }
}

pub type EvalResult<T> = Result<T, Diagnostic>;
