//! AST node types consumed by the mlld evaluator.
//!
//! This crate owns no parser. It defines the shape of the tree a PEG grammar
//! (or any other front end) is expected to hand the evaluator: an ordered list
//! of top-level [`Node`]s, each directive carrying its own value subtree.
//! Evaluators in `mlld-core` match over these types directly; nothing here
//! should depend on evaluation semantics.

use serde::{Deserialize, Serialize};

/// A 1-based line/column position within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

/// The span of source text a node was parsed from, plus the originating file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub start: Position,
    pub end: Position,
    pub source: String,
}

/// A parsed document: an ordered list of top-level nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub nodes: Vec<Node>,
}

/// Top-level node kinds that appear directly in a document body or inside a
/// template/text run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Text(String),
    CodeFence { language: Option<String>, code: String },
    Comment(String),
    Directive(Directive),
    VariableReference(VariableReference),
    Literal(Literal),
}

/// A primitive literal. The parser preserves numeric type; `Number` is never
/// produced for a value that round-trips through a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(f64),
    Bool(bool),
    Null,
    Text(TextLiteral),
}

/// How a textual literal was wrapped at the syntax level. This determines
/// which `Variable` variant a `/var` assignment builds (see `mlld-core::variable`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteKind {
    Single,
    Double,
    Backtick,
    DoubleColon,
    TripleColon,
    Bracket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLiteral {
    pub wrapper: QuoteKind,
    /// Text segments interleaved with interpolation points, in source order.
    pub parts: Vec<TemplatePart>,
    pub is_multi_line: bool,
}

impl TextLiteral {
    #[must_use]
    pub fn has_interpolation(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, TemplatePart::Interpolation(_)))
    }
}

/// One piece of a template body: literal text or an interpolation point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplatePart {
    Text(String),
    Interpolation(VariableReference),
}

/// `@name.field1[0].field2 | @pipe1(args) | @pipe2` as parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableReference {
    pub identifier: String,
    pub fields: Vec<FieldAccess>,
    pub pipes: Vec<PipeStage>,
    pub value_type: ValueTypeHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ValueTypeHint {
    #[default]
    Unknown,
    Text,
    Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldAccess {
    Name(String),
    Index(i64),
    Length,
}

/// One stage of a pipeline attached to a value, e.g. `| @upper | @trim(2)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipeStage {
    Named { name: String, args: Vec<Expr> },
    Inline { command: Box<Expr> },
    Parallel(Vec<PipeStage>),
}

/// A directive statement, e.g. `/var @x = 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub subtype: String,
    pub values: DirectiveValues,
    pub raw: String,
    pub meta: DirectiveMeta,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveKind {
    Var,
    Exe,
    Run,
    Show,
    When,
    For,
    Import,
    Export,
    Guard,
    Env,
}

/// Free-form directive flags that change evaluation but aren't values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectiveMeta {
    pub is_data_value: bool,
    pub is_tools_collection: bool,
    pub modifier: Option<WhenModifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhenModifier {
    First,
    All,
    Any,
}

/// The payload of a directive. Shape depends on `kind`; unused fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectiveValues {
    pub identifier: Option<String>,
    pub value: Option<Expr>,
    pub params: Vec<String>,
    pub with_clause: Option<WithClause>,
    pub imports: Vec<ImportBinding>,
    pub module: Option<Expr>,
    pub exports: Vec<String>,
    pub guard: Option<GuardClause>,
    pub env_overrides: Option<Expr>,
}

/// A general mlld expression. Value-position RHS of `/var`, arguments,
/// array/object members, and pipeline stage inputs are all `Expr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Text(TextLiteral),
    VariableReference(VariableReferenceWithTail),
    Array(ArrayExpr),
    Object(ObjectExpr),
    Path(PathExpr),
    Section(SectionExpr),
    LoadContent(LoadContentExpr),
    Command(CommandExpr),
    Code(CodeExpr),
    ExecInvocation(ExecInvocation),
    ExeBlock(ExeBlock),
    When(WhenExpression),
    For(ForExpression),
    Loop(LoopExpression),
    Binary(BinaryExpression),
    Ternary(TernaryExpression),
    Unary(UnaryExpression),
    FileReference(PathExpr),
    /// `allow`, a guard arm action that lets the operation proceed.
    Allow,
    /// `deny "<reason>"`, a guard arm action carrying the author's own
    /// explanation through to `GUARD_DENIED{name, reason}`.
    Deny(TextLiteral),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableReferenceWithTail {
    pub variable: VariableReference,
    pub with_clause: Option<Box<WithClause>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayExpr {
    pub items: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectExpr {
    /// Preserves declaration order; `indexmap` keeps lookups cheap too.
    pub entries: indexmap::IndexMap<String, ObjectEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub value: Expr,
    /// Present when this entry describes an MCP tool binding (§4.6).
    pub tool: Option<ToolEntryMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEntryMeta {
    pub mlld_ref: String,
    pub labels: Vec<String>,
    pub description: Option<String>,
    pub bind: indexmap::IndexMap<String, Expr>,
    pub expose: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathExpr {
    pub segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PathSegment {
    Text(String),
    Interpolation(VariableReference),
    Glob(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionExpr {
    pub path: PathExpr,
    pub section: String,
    pub as_section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadContentExpr {
    pub source: PathExpr,
    pub options: LoadContentOptions,
    pub pipes: Vec<PipeStage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadContentOptions {
    pub is_glob: bool,
    pub rename_template: Option<TextLiteral>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandExpr {
    pub command: TextLiteral,
    pub with_clause: Option<Box<WithClause>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExpr {
    pub language: CodeLanguage,
    pub code: String,
    pub with_clause: Option<Box<WithClause>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeLanguage {
    Js,
    Node,
    Python,
    Sh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecInvocation {
    pub name: String,
    pub args: Vec<Expr>,
    pub with_clause: Option<Box<WithClause>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExeBlock {
    pub params: Vec<String>,
    pub body: Box<Expr>,
}

/// `with { stdin: ..., pipeline: [...] }` attached to a command/code/exec node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WithClause {
    pub stdin: Option<Box<Expr>>,
    pub pipeline: Vec<PipeStage>,
    pub trust: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenExpression {
    pub arms: Vec<WhenArm>,
    pub modifier: WhenModifier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenArm {
    pub condition: Option<Box<Expr>>,
    pub action: Box<Expr>,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForExpression {
    pub var_name: String,
    pub collection: Box<Expr>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopExpression {
    pub condition: Box<Expr>,
    pub body: Box<Expr>,
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpression {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TernaryExpression {
    pub cond: Box<Expr>,
    pub then_branch: Box<Expr>,
    pub else_branch: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpression {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
}

/// One `/import` binding: `a`, `a as b`, or `* as ns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBinding {
    pub name: String,
    pub alias: Option<String>,
    pub is_wildcard: bool,
}

/// A compiled `/guard` clause: `<name> before|after op:<kind> = when [...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardClause {
    pub name: String,
    pub phase: GuardPhase,
    pub operation: String,
    pub when: WhenExpression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardPhase {
    Before,
    After,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_round_trips_through_serde_json() {
        let doc = Document {
            nodes: vec![
                Node::Text("Hello, ".to_string()),
                Node::VariableReference(VariableReference {
                    identifier: "name".to_string(),
                    fields: vec![],
                    pipes: vec![],
                    value_type: ValueTypeHint::Text,
                }),
            ],
        };
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn field_access_distinguishes_index_and_name() {
        let fields = vec![FieldAccess::Name("topic".into()), FieldAccess::Index(0)];
        assert!(matches!(fields[0], FieldAccess::Name(ref s) if s == "topic"));
        assert!(matches!(fields[1], FieldAccess::Index(0)));
    }
}
