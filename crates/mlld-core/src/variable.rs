//! The `Variable` algebra and its factories (§3.1, §4.1).
//!
//! A `Variable` is a tagged variant; every variant carries `source`
//! (syntactic provenance), `mx` (security metadata), and `internal`
//! (implementation bookkeeping). Factories are the only way to build one —
//! they merge caller-supplied security metadata with whatever descriptor the
//! payload itself carries, so a `Variable` can never be constructed with a
//! `mx` that's missing ancestry the value actually has.

use indexmap::IndexMap;
use mlld_ast::{CodeLanguage, DirectiveKind, QuoteKind};

use crate::error::{Diagnostic, EvalError};
use crate::security::SecurityDescriptor;
use crate::structured_value::StructuredValue;

/// How a `Variable` was syntactically introduced. Drives re-rendering
/// (interpolation needs to know whether a template is lazy) and is otherwise
/// inert at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSource {
    pub directive_kind: DirectiveKind,
    pub syntactic_form: String,
    pub wrapper: Option<QuoteKind>,
    pub has_interpolation: bool,
    pub is_multi_line: bool,
}

impl VariableSource {
    #[must_use]
    pub fn simple(directive_kind: DirectiveKind, syntactic_form: impl Into<String>) -> Self {
        Self {
            directive_kind,
            syntactic_form: syntactic_form.into(),
            wrapper: None,
            has_interpolation: false,
            is_multi_line: false,
        }
    }
}

/// Provenance struct kept in sync with the value's `SecurityDescriptor`
/// (§3.1 `mx`). Variables never store a `SecurityDescriptor` directly so
/// that `mx_snapshot()` is always derived the same way regardless of variant.
pub type Mx = SecurityDescriptor;

/// Implementation bookkeeping that doesn't affect evaluation semantics but is
/// read by the pipeline, tools-collection validation, and debug tooling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InternalMeta {
    pub is_retryable: bool,
    pub source_function: Option<String>,
    pub is_pipeline_result: bool,
    pub is_structured_value: bool,
    pub structured_value_type: Option<crate::structured_value::StructuredValueType>,
    pub tool_collection: Option<String>,
    pub is_tools_collection: bool,
    pub defined_at: Option<mlld_ast::Location>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Number(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub start: usize,
    pub end: usize,
    pub identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Backtick,
    DoubleColon,
    TripleColon,
}

/// A template body. `TripleColon` defers interpolation: `rendered` stays
/// `None` until a consumer demands a string, and the render is cached keyed
/// by a snapshot of the referenced variable names so repeated reads are
/// cheap but invalidate the moment a dependency is reassigned (§9).
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub kind: TemplateKind,
    pub body: mlld_ast::TextLiteral,
    pub rendered: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutableKind {
    Command,
    Code { language: CodeLanguage },
    Template,
    Composite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Executable {
    pub kind: ExecutableKind,
    pub params: Vec<String>,
    pub body: mlld_ast::Expr,
    /// `None` for executables defined at module scope; `Some` captures the
    /// defining scope for closures over child environments.
    pub captured_scope: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolEntry {
    pub executable_name: String,
    pub labels: Vec<String>,
    pub description: Option<String>,
    pub bind: IndexMap<String, VariableValue>,
    pub expose: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolsCollection {
    pub tools: IndexMap<String, ToolEntry>,
}

/// The variant-specific payload (§3.1). Kept separate from `Variable` so
/// factories can pattern-match on "what kind of thing is this" without also
/// carrying `name`/`source`/`mx`/`internal` through every match arm.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Primitive(Primitive),
    SimpleText(String),
    InterpolatedText { text: String, points: Vec<Interpolation> },
    Template(Template),
    Array { items: Vec<VariableValue>, is_complex: bool, lazy_items: Vec<mlld_ast::Expr> },
    Object { entries: IndexMap<String, VariableValue>, is_complex: bool },
    Executable(Executable),
    Structured(StructuredValue),
    FileContent { text: String, path: String },
    SectionContent { text: String, path: String, section: String },
    CommandResult { text: String, command: String },
    ComputedValue { text: String, language: CodeLanguage },
    ToolsCollection(ToolsCollection),
}

impl VariableValue {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Primitive(_) => "Primitive",
            Self::SimpleText(_) => "SimpleText",
            Self::InterpolatedText { .. } => "InterpolatedText",
            Self::Template(_) => "Template",
            Self::Array { .. } => "Array",
            Self::Object { .. } => "Object",
            Self::Executable(_) => "Executable",
            Self::Structured(_) => "StructuredValue",
            Self::FileContent { .. } => "FileContent",
            Self::SectionContent { .. } => "SectionContent",
            Self::CommandResult { .. } => "CommandResult",
            Self::ComputedValue { .. } => "ComputedValue",
            Self::ToolsCollection(_) => "ToolsCollection",
        }
    }

    /// Extracts any `SecurityDescriptor` embedded in the payload itself, so
    /// factories can merge it into the caller-supplied descriptor (§4.1:
    /// "merge caller-supplied descriptor with any descriptor extracted from
    /// `value` (recursively for arrays/objects/StructuredValues)").
    #[must_use]
    pub fn embedded_descriptor(&self) -> SecurityDescriptor {
        match self {
            Self::Structured(sv) => sv.mx.clone(),
            Self::Array { items, .. } => SecurityDescriptor::merge_all(items.iter().map(VariableValue::embedded_descriptor).collect::<Vec<_>>().iter()),
            Self::Object { entries, .. } => {
                SecurityDescriptor::merge_all(entries.values().map(VariableValue::embedded_descriptor).collect::<Vec<_>>().iter())
            }
            _ => SecurityDescriptor::empty(),
        }
    }

    /// Text projection used by the interpolation engine's default
    /// conversion (§4.3 step 5) when the value isn't a `StructuredValue`.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Primitive(Primitive::Number(n)) => {
                if n.fract() == 0.0 && n.abs() < 1e15 { format!("{}", *n as i64) } else { n.to_string() }
            }
            Self::Primitive(Primitive::Bool(b)) => b.to_string(),
            Self::Primitive(Primitive::Null) => "null".to_string(),
            Self::SimpleText(s) | Self::InterpolatedText { text: s, .. } => s.clone(),
            Self::Template(t) => t.rendered.clone().unwrap_or_default(),
            Self::Structured(sv) => sv.as_text().to_string(),
            Self::FileContent { text, .. }
            | Self::SectionContent { text, .. }
            | Self::CommandResult { text, .. }
            | Self::ComputedValue { text, .. } => text.clone(),
            Self::Array { items, .. } => {
                let json = serde_json::Value::Array(items.iter().map(|v| crate::structured_value::DataValue::from_json(&v.to_json()).to_json()).collect());
                serde_json::to_string(&json).unwrap_or_default()
            }
            Self::Object { entries, .. } => {
                let mut obj = serde_json::Map::new();
                for (k, v) in entries {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::to_string(&serde_json::Value::Object(obj)).unwrap_or_default()
            }
            Self::ToolsCollection(_) => "<tools collection>".to_string(),
            Self::Executable(_) => "<executable>".to_string(),
        }
    }

    /// Best-effort JSON projection for array/object display; scalar
    /// variants route through their own `DataValue` conversion.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Primitive(Primitive::Number(n)) => serde_json::Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Primitive(Primitive::Bool(b)) => serde_json::Value::Bool(*b),
            Self::Primitive(Primitive::Null) => serde_json::Value::Null,
            Self::SimpleText(s) | Self::InterpolatedText { text: s, .. } => serde_json::Value::String(s.clone()),
            Self::Structured(sv) => sv.as_data().to_json(),
            Self::Array { items, .. } => serde_json::Value::Array(items.iter().map(VariableValue::to_json).collect()),
            Self::Object { entries, .. } => {
                let mut obj = serde_json::Map::new();
                for (k, v) in entries {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
            other => serde_json::Value::String(other.to_display_string()),
        }
    }

    /// Field-path step used by the interpolation engine (§4.3 step 2) and by
    /// `/var` RHS field projections. Arrays/objects index structurally;
    /// `StructuredValue` delegates to its own field/index.
    #[must_use]
    pub fn field_access(&self, access: &mlld_ast::FieldAccess) -> Option<VariableValue> {
        use mlld_ast::FieldAccess as FA;
        match (self, access) {
            (Self::Object { entries, .. }, FA::Name(name)) => entries.get(name).cloned(),
            (Self::Array { items, .. }, FA::Index(i)) => {
                let idx = if *i < 0 { items.len().checked_sub(i.unsigned_abs() as usize)? } else { *i as usize };
                items.get(idx).cloned()
            }
            (Self::Array { items, .. }, FA::Length) => Some(Self::Primitive(Primitive::Number(items.len() as f64))),
            (Self::Structured(sv), FA::Name(name)) => sv.field(name).map(Self::Structured),
            (Self::Structured(sv), FA::Index(i)) => {
                let idx = usize::try_from(*i).ok()?;
                sv.index(idx).map(Self::Structured)
            }
            (Self::Structured(sv), FA::Length) => sv.as_data().length().map(|n| Self::Primitive(Primitive::Number(n as f64))),
            _ => None,
        }
    }
}

/// A named binding in an `Environment` (§3.1). Immutable from the reader's
/// perspective: `/var` "updates" replace the binding, they never mutate one
/// in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: VariableValue,
    pub source: VariableSource,
    pub mx: Mx,
    pub internal: InternalMeta,
}

/// Caller-supplied overrides for factory-built metadata (§4.1 `options`).
#[derive(Debug, Clone, Default)]
pub struct VariableOptions {
    pub mx: SecurityDescriptor,
    pub internal: InternalMeta,
}

impl Variable {
    /// The shared constructor every typed factory below routes through.
    /// Applies security metadata by merging the caller-supplied descriptor
    /// with whatever the payload itself carries, recursively.
    fn build(name: impl Into<String>, value: VariableValue, source: VariableSource, options: VariableOptions) -> Self {
        let embedded = value.embedded_descriptor();
        let mx = SecurityDescriptor::merge(&options.mx, &embedded);
        let mut internal = options.internal;
        internal.is_structured_value = matches!(value, VariableValue::Structured(_));
        if let VariableValue::Structured(sv) = &value {
            internal.structured_value_type = Some(sv.value_type);
        }
        internal.is_tools_collection = matches!(value, VariableValue::ToolsCollection(_));
        Self { name: name.into(), value, source, mx, internal }
    }

    /// A generic constructor for callers (the expression evaluator) that
    /// already have a fully-formed [`VariableValue`] and don't need a
    /// variant-specific factory.
    pub fn from_value(name: impl Into<String>, value: VariableValue, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, value, source, options)
    }

    pub fn primitive(name: impl Into<String>, value: Primitive, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::Primitive(value), source, options)
    }

    pub fn simple_text(name: impl Into<String>, text: impl Into<String>, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::SimpleText(text.into()), source, options)
    }

    pub fn interpolated_text(name: impl Into<String>, text: impl Into<String>, points: Vec<Interpolation>, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::InterpolatedText { text: text.into(), points }, source, options)
    }

    pub fn template(name: impl Into<String>, template: Template, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::Template(template), source, options)
    }

    pub fn array(name: impl Into<String>, items: Vec<VariableValue>, is_complex: bool, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::Array { items, is_complex, lazy_items: Vec::new() }, source, options)
    }

    pub fn lazy_array(name: impl Into<String>, lazy_items: Vec<mlld_ast::Expr>, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::Array { items: Vec::new(), is_complex: true, lazy_items }, source, options)
    }

    pub fn object(name: impl Into<String>, entries: IndexMap<String, VariableValue>, is_complex: bool, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::Object { entries, is_complex }, source, options)
    }

    pub fn executable(name: impl Into<String>, executable: Executable, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::Executable(executable), source, options)
    }

    pub fn structured(name: impl Into<String>, sv: StructuredValue, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::Structured(sv), source, options)
    }

    pub fn file_content(name: impl Into<String>, text: impl Into<String>, path: impl Into<String>, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::FileContent { text: text.into(), path: path.into() }, source, options)
    }

    pub fn section_content(name: impl Into<String>, text: impl Into<String>, path: impl Into<String>, section: impl Into<String>, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::SectionContent { text: text.into(), path: path.into(), section: section.into() }, source, options)
    }

    pub fn command_result(name: impl Into<String>, text: impl Into<String>, command: impl Into<String>, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::CommandResult { text: text.into(), command: command.into() }, source, options)
    }

    pub fn computed_value(name: impl Into<String>, text: impl Into<String>, language: CodeLanguage, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::ComputedValue { text: text.into(), language }, source, options)
    }

    /// Fails with `TOOLS_COLLECTION_INVALID` if any entry's `bind`/`expose`
    /// shape is invalid; validation itself lives in `crate::tools` since it
    /// needs the defining environment to resolve `mlld` references (§4.6).
    pub fn tools_collection(name: impl Into<String>, collection: ToolsCollection, source: VariableSource, options: VariableOptions) -> Self {
        Self::build(name, VariableValue::ToolsCollection(collection), source, options)
    }

    /// `INVALID_VALUE_KIND` guard used by callers that need a specific
    /// variant and must fail loudly rather than silently coerce.
    pub fn expect_primitive(&self) -> Result<&Primitive, Diagnostic> {
        match &self.value {
            VariableValue::Primitive(p) => Ok(p),
            other => Err(Diagnostic::new(EvalError::InvalidValueKind {
                expected: "Primitive".into(),
                got: other.kind_name().into(),
            })),
        }
    }

    pub fn expect_executable(&self) -> Result<&Executable, Diagnostic> {
        match &self.value {
            VariableValue::Executable(e) => Ok(e),
            other => Err(Diagnostic::new(EvalError::InvalidValueKind {
                expected: "Executable".into(),
                got: other.kind_name().into(),
            })),
        }
    }

    /// Text projection used by the interpolation engine's default
    /// conversion (§4.3 step 5) when the value isn't a `StructuredValue`.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        self.value.to_display_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> VariableSource {
        VariableSource::simple(DirectiveKind::Var, "literal")
    }

    #[test]
    fn primitive_round_trips_number_without_becoming_a_string() {
        let v = Variable::primitive("x", Primitive::Number(1.0), src(), VariableOptions::default());
        assert_eq!(v.expect_primitive().unwrap(), &Primitive::Number(1.0));
    }

    #[test]
    fn primitive_round_trips_bool_false() {
        let v = Variable::primitive("f", Primitive::Bool(false), src(), VariableOptions::default());
        assert_eq!(v.expect_primitive().unwrap(), &Primitive::Bool(false));
        assert_eq!(v.to_display_string(), "false");
    }

    #[test]
    fn structured_value_merges_embedded_descriptor_with_caller_descriptor() {
        let sv = StructuredValue::text("x", SecurityDescriptor::with_taint(["src:file"]));
        let opts = VariableOptions { mx: SecurityDescriptor::with_taint(["src:mcp"]), ..Default::default() };
        let v = Variable::structured("x", sv, src(), opts);
        assert!(v.mx.taint.contains("src:file"));
        assert!(v.mx.taint.contains("src:mcp"));
    }

    #[test]
    fn expect_executable_on_wrong_variant_fails_with_invalid_value_kind() {
        let v = Variable::simple_text("x", "hi", src(), VariableOptions::default());
        let err = v.expect_executable().unwrap_err();
        assert!(matches!(err.kind, EvalError::InvalidValueKind { .. }));
    }

    #[test]
    fn internal_flags_reflect_structured_value_type() {
        let sv = StructuredValue::auto_detect("{}", SecurityDescriptor::empty());
        let v = Variable::structured("x", sv, src(), VariableOptions::default());
        assert!(v.internal.is_structured_value);
        assert_eq!(v.internal.structured_value_type, Some(crate::structured_value::StructuredValueType::Json));
    }
}
