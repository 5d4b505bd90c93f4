//! The `.pym` compilation pipeline.
//!
//! ```text
//! source ──compile──▶ ParseResult ─┬─check──────────▶ CheckResult
//!                                  ├─generate───────▶ (stripped text, SourceMap)
//!                                  └─synthesize_stub▶ stub text
//! ```
//!
//! Every type here is an immutable value. A `ParseResult` can be shared by
//! reference across threads while the three downstream stages run.

pub mod check;
pub mod codegen;
pub mod extract;
pub mod source_map;
pub mod stubs;

use std::fmt;

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::syntax::ast::Module;
use crate::syntax::LineIndex;

pub use check::{check, check_with};
pub use codegen::generate;
pub use extract::{compile, MarkerSpelling};
pub use source_map::SourceMap;
pub use stubs::synthesize_stub;

// ── Locations ───────────────────────────────────────────────────────

/// A position in the original script. Both fields are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

// ── Declarations ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

/// One formal parameter of an external declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ParameterSpec {
    pub name: String,
    pub type_annotation: Option<String>,
    pub has_default: bool,
    /// Source text of the default expression.
    pub default_repr: Option<String>,
    pub kind: ParamKind,
}

/// A function whose implementation the caller supplies at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExternalSpec {
    pub name: String,
    pub is_async: bool,
    pub parameters: Vec<ParameterSpec>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub location: Location,
}

/// A value the caller supplies at run time, declared with `Input(...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InputSpec {
    /// The variable the declaration binds.
    pub name: String,
    /// The string literal passed to `Input`; equal to `name` when present.
    pub declared_name: Option<String>,
    pub type_annotation: Option<String>,
    pub has_default: bool,
    /// Source text of the `default=` argument.
    pub default_value: Option<String>,
    pub location: Location,
}

impl InputSpec {
    pub fn required(&self) -> bool {
        !self.has_default
    }
}

/// Output of [`compile`]: the syntax tree plus both declaration tables.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub module: Module,
    pub externals: IndexMap<String, ExternalSpec>,
    pub inputs: IndexMap<String, InputSpec>,
    pub source_lines: Vec<String>,
    pub source_identifier: Option<String>,
    pub line_index: LineIndex,
}

impl ParseResult {
    /// Text of original line `line` (1-based), without its terminator.
    pub fn line_text(&self, line: usize) -> Option<&str> {
        self.source_lines
            .get(line.checked_sub(1)?)
            .map(String::as_str)
    }
}

// ── Check report ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One diagnostic produced by the checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckMessage {
    pub code: String,
    pub severity: Severity,
    pub line: usize,
    pub column: usize,
    pub end_line: Option<usize>,
    pub end_column: Option<usize>,
    pub message: String,
    pub suggestion: Option<String>,
}

impl CheckMessage {
    pub fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }
}

impl fmt::Display for CheckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} {}",
            self.line, self.column, self.code, self.message
        )
    }
}

/// Summary statistics attached to every report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckInfo {
    pub externals_count: usize,
    pub inputs_count: usize,
    pub lines_of_code: usize,
    /// Sorted names of the constructs observed in the script.
    pub constructs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckResult {
    pub file: Option<String>,
    pub valid: bool,
    pub errors: Vec<CheckMessage>,
    pub warnings: Vec<CheckMessage>,
    pub info: CheckInfo,
}

impl CheckResult {
    /// Errors and warnings ordered by position.
    pub fn messages(&self) -> Vec<&CheckMessage> {
        let mut all: Vec<&CheckMessage> = self.errors.iter().chain(&self.warnings).collect();
        all.sort_by_key(|m| (m.line, m.column));
        all
    }
}

/// Tunables for [`check_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerConfig {
    /// Scripts longer than this draw a W003 warning.
    pub max_script_lines: usize,
    /// Modules importable in addition to `grail`, `typing` and `__future__`.
    pub allowed_modules: Vec<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            max_script_lines: 200,
            allowed_modules: Vec::new(),
        }
    }
}
