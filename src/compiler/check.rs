//! Compatibility checking against the sandboxed interpreter's feature set.
//!
//! One full-tree pass collects every finding; nothing here fails.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use super::extract::{input_call, is_declaration};
use super::{CheckInfo, CheckMessage, CheckResult, CheckerConfig, ParseResult, Severity};
use crate::syntax::ast::{Expr, ExprContext, ExprKind, Span, Stmt, StmtKind};
use crate::syntax::visitor::{walk_expr, walk_stmt, Visitor};
use crate::syntax::LineIndex;

/// Stable diagnostic codes.
pub mod codes {
    pub const CLASS_DEFINITION: &str = "E001";
    pub const GENERATOR: &str = "E002";
    pub const WITH_STATEMENT: &str = "E003";
    pub const MATCH_STATEMENT: &str = "E004";
    pub const FORBIDDEN_IMPORT: &str = "E005";
    pub const SCOPE_MUTATION: &str = "E006";
    pub const MISSING_ANNOTATION: &str = "E007";
    pub const LAMBDA: &str = "E008";

    pub const UNUSED_EXTERNAL: &str = "W001";
    pub const UNUSED_INPUT: &str = "W002";
    pub const SCRIPT_TOO_LONG: &str = "W003";
    pub const UNTYPED_INPUT: &str = "W004";
}

/// Modules a script may always import.
pub const BUILTIN_ALLOWED_MODULES: [&str; 3] = ["grail", "typing", "__future__"];

/// Check with the default configuration.
pub fn check(parse_result: &ParseResult) -> CheckResult {
    check_with(parse_result, &CheckerConfig::default())
}

pub fn check_with(parse_result: &ParseResult, config: &CheckerConfig) -> CheckResult {
    let mut checker = Checker {
        config,
        index: &parse_result.line_index,
        errors: Vec::new(),
        warnings: Vec::new(),
        constructs: BTreeSet::new(),
        references: HashSet::new(),
    };

    for stmt in &parse_result.module.body {
        if is_declaration(stmt, parse_result) {
            collect_default_references(stmt, &mut checker.references);
        } else {
            walk_stmt(&mut checker, stmt);
        }
    }
    checker.check_external_annotations(parse_result);
    checker.check_declaration_usage(parse_result);

    let line_count = parse_result.source_lines.len();
    if line_count > config.max_script_lines {
        checker.warnings.push(CheckMessage {
            code: codes::SCRIPT_TOO_LONG.into(),
            severity: Severity::Warning,
            line: 1,
            column: 1,
            end_line: None,
            end_column: None,
            message: format!(
                "script has {line_count} lines, more than the recommended {}",
                config.max_script_lines
            ),
            suggestion: Some("move reusable logic into external functions".into()),
        });
    }

    let Checker {
        mut errors,
        mut warnings,
        constructs,
        ..
    } = checker;
    errors.sort_by_key(|m| (m.line, m.column));
    warnings.sort_by_key(|m| (m.line, m.column));

    let result = CheckResult {
        file: parse_result.source_identifier.clone(),
        valid: errors.is_empty(),
        errors,
        warnings,
        info: CheckInfo {
            externals_count: parse_result.externals.len(),
            inputs_count: parse_result.inputs.len(),
            lines_of_code: lines_of_code(&parse_result.source_lines),
            constructs: constructs.into_iter().map(str::to_string).collect(),
        },
    };
    debug!(
        file = result.file.as_deref().unwrap_or("<string>"),
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "checked script"
    );
    result
}

/// Non-blank lines that are not comment-only.
fn lines_of_code(lines: &[String]) -> usize {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .count()
}

/// Names read by an input's `default=` value count as used. The value itself
/// is stripped with its declaration, so it is not checked.
fn collect_default_references(stmt: &Stmt, references: &mut HashSet<String>) {
    let value = match &stmt.kind {
        StmtKind::Assign { value, .. }
        | StmtKind::AnnAssign {
            value: Some(value), ..
        } => value,
        _ => return,
    };
    let Some((_, keywords)) = input_call(value) else {
        return;
    };
    let mut collector = ReferenceCollector { references };
    for keyword in keywords.iter().filter(|k| k.arg.as_deref() == Some("default")) {
        walk_expr(&mut collector, &keyword.value);
    }
}

fn record_reference(references: &mut HashSet<String>, expr: &Expr) {
    match &expr.kind {
        ExprKind::Name {
            id,
            ctx: ExprContext::Load,
        } => {
            references.insert(id.clone());
        }
        ExprKind::Attribute {
            attr,
            ctx: ExprContext::Load,
            ..
        } => {
            references.insert(attr.clone());
        }
        _ => {}
    }
}

struct ReferenceCollector<'a> {
    references: &'a mut HashSet<String>,
}

impl Visitor for ReferenceCollector<'_> {
    fn visit_expr(&mut self, expr: &Expr) -> bool {
        record_reference(self.references, expr);
        true
    }
}

struct Checker<'a> {
    config: &'a CheckerConfig,
    index: &'a LineIndex,
    errors: Vec<CheckMessage>,
    warnings: Vec<CheckMessage>,
    constructs: BTreeSet<&'static str>,
    /// Names loaded anywhere outside the declarations themselves.
    references: HashSet<String>,
}

impl Checker<'_> {
    fn message(
        &self,
        code: &str,
        severity: Severity,
        span: Span,
        message: String,
        suggestion: &str,
    ) -> CheckMessage {
        let (line, column) = self.index.line_col(span.start);
        let (end_line, end_column) = self.index.line_col(span.end);
        CheckMessage {
            code: code.to_string(),
            severity,
            line,
            column,
            end_line: Some(end_line),
            end_column: Some(end_column),
            message,
            suggestion: Some(suggestion.to_string()),
        }
    }

    fn error(&mut self, code: &str, span: Span, message: impl Into<String>, suggestion: &str) {
        let msg = self.message(code, Severity::Error, span, message.into(), suggestion);
        self.errors.push(msg);
    }

    fn warning(&mut self, code: &str, span: Span, message: impl Into<String>, suggestion: &str) {
        let msg = self.message(code, Severity::Warning, span, message.into(), suggestion);
        self.warnings.push(msg);
    }

    fn module_allowed(&self, module: &str) -> bool {
        let root = module.split('.').next().unwrap_or(module);
        BUILTIN_ALLOWED_MODULES.contains(&root)
            || self
                .config
                .allowed_modules
                .iter()
                .any(|m| m == module || m == root)
    }

    fn forbid_import(&mut self, module: &str, span: Span) {
        self.error(
            codes::FORBIDDEN_IMPORT,
            span,
            format!("import of '{module}' is not supported"),
            "only grail, typing and __future__ are importable; move this logic into an external function",
        );
    }

    fn check_external_annotations(&mut self, parse_result: &ParseResult) {
        for external in parse_result.externals.values() {
            let line = external.location.line;
            let span = self.line_span(line);
            for param in &external.parameters {
                if param.type_annotation.is_none() {
                    self.error(
                        codes::MISSING_ANNOTATION,
                        span,
                        format!(
                            "parameter '{}' of external '{}' is missing a type annotation",
                            param.name, external.name
                        ),
                        "annotate every parameter of an external function",
                    );
                }
            }
            if external.return_type.is_none() {
                self.error(
                    codes::MISSING_ANNOTATION,
                    span,
                    format!("external '{}' is missing a return type annotation", external.name),
                    "add '-> <type>' to the declaration",
                );
            }
        }
    }

    fn check_declaration_usage(&mut self, parse_result: &ParseResult) {
        for external in parse_result.externals.values() {
            if !self.references.contains(&external.name) {
                let span = self.line_span(external.location.line);
                self.warning(
                    codes::UNUSED_EXTERNAL,
                    span,
                    format!("external '{}' is declared but never used", external.name),
                    "remove the declaration or call the function",
                );
            }
        }
        for input in parse_result.inputs.values() {
            let span = self.line_span(input.location.line);
            if !self.references.contains(&input.name) {
                self.warning(
                    codes::UNUSED_INPUT,
                    span,
                    format!("input '{}' is declared but never used", input.name),
                    "remove the declaration or use the value",
                );
            }
            if input.type_annotation.is_none() {
                self.warning(
                    codes::UNTYPED_INPUT,
                    span,
                    format!("input '{}' has no type annotation", input.name),
                    "declare it as 'name: <type> = Input(\"name\")'",
                );
            }
        }
    }

    /// Span covering the text of a 1-based source line.
    fn line_span(&self, line: usize) -> Span {
        Span::new(self.index.line_start(line), self.index.line_end(line))
    }
}

impl Visitor for Checker<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::FunctionDef(func) => {
                self.constructs.insert("function_def");
                if func.is_async {
                    self.constructs.insert("async_await");
                }
            }
            StmtKind::ClassDef(class) => self.error(
                codes::CLASS_DEFINITION,
                stmt.span,
                format!("class definition '{}' is not supported", class.name),
                "use dicts for structured data",
            ),
            StmtKind::With { is_async, .. } => {
                if *is_async {
                    self.constructs.insert("async_await");
                }
                self.error(
                    codes::WITH_STATEMENT,
                    stmt.span,
                    "'with' statements are not supported",
                    "call the resource's methods directly or move it into an external function",
                );
            }
            StmtKind::Match { .. } => self.error(
                codes::MATCH_STATEMENT,
                stmt.span,
                "'match' statements are not supported",
                "use an if/elif chain",
            ),
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                let keyword = if matches!(stmt.kind, StmtKind::Global(_)) {
                    "global"
                } else {
                    "nonlocal"
                };
                self.error(
                    codes::SCOPE_MUTATION,
                    stmt.span,
                    format!("'{keyword} {}' is not supported", names.join(", ")),
                    "pass values in as arguments and return the results",
                );
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    if !self.module_allowed(&alias.name) {
                        self.forbid_import(&alias.name, stmt.span);
                    }
                }
            }
            StmtKind::ImportFrom { module, level, .. } => {
                let module_name = module.as_deref().unwrap_or("");
                if *level > 0 {
                    let dotted = format!("{}{module_name}", ".".repeat(*level));
                    self.forbid_import(&dotted, stmt.span);
                } else if !self.module_allowed(module_name) {
                    self.forbid_import(module_name, stmt.span);
                }
            }
            StmtKind::For { is_async, .. } => {
                self.constructs.insert("for_loop");
                if *is_async {
                    self.constructs.insert("async_await");
                }
            }
            StmtKind::While { .. } => {
                self.constructs.insert("while_loop");
            }
            StmtKind::If { .. } => {
                self.constructs.insert("if_else");
            }
            StmtKind::Try { .. } => {
                self.constructs.insert("try_except");
            }
            _ => {}
        }
        true
    }

    fn visit_expr(&mut self, expr: &Expr) -> bool {
        record_reference(&mut self.references, expr);
        match &expr.kind {
            ExprKind::Yield(_) | ExprKind::YieldFrom(_) => self.error(
                codes::GENERATOR,
                expr.span,
                "generators ('yield') are not supported",
                "collect the values into a list and return it",
            ),
            ExprKind::Lambda { .. } => self.error(
                codes::LAMBDA,
                expr.span,
                "lambda expressions are not supported",
                "define a named function with 'def'",
            ),
            ExprKind::Await(_) => {
                self.constructs.insert("async_await");
            }
            ExprKind::ListComp { generators, .. }
            | ExprKind::SetComp { generators, .. }
            | ExprKind::GeneratorExp { generators, .. }
            | ExprKind::DictComp { generators, .. } => {
                self.constructs.insert("comprehension");
                if generators.iter().any(|g| g.is_async) {
                    self.constructs.insert("async_await");
                }
            }
            ExprKind::FString { .. } => {
                self.constructs.insert("f_string");
            }
            ExprKind::NamedExpr { .. } => {
                self.constructs.insert("walrus");
            }
            ExprKind::IfExp { .. } => {
                self.constructs.insert("if_else");
            }
            _ => {}
        }
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn run(src: &str) -> CheckResult {
        check(&compile(src, Some("test.pym")).unwrap())
    }

    fn codes_of(messages: &[CheckMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.code.as_str()).collect()
    }

    #[test]
    fn budget_fetch_script_is_valid() {
        let src = "\
from grail import external, Input

budget: float = Input(\"budget\")

@external
async def fetch(id: int) -> str:
    ...

data = await fetch(1)
if len(data) > budget:
    data = data[:10]
data
";
        let result = run(src);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.file.as_deref(), Some("test.pym"));
        assert_eq!(result.info.externals_count, 1);
        assert_eq!(result.info.inputs_count, 1);
        assert_eq!(result.info.constructs, vec!["async_await", "if_else"]);
    }

    #[test]
    fn accumulates_independent_violations() {
        let src = "class Point:\n    pass\n\ndef gen():\n    yield 1\n";
        let result = run(src);
        assert!(!result.valid);
        assert_eq!(codes_of(&result.errors), vec!["E001", "E002"]);
        assert_eq!(result.errors[0].line, 1);
        assert_eq!(result.errors[1].line, 5);
        assert_eq!(result.errors[1].column, 5);
    }

    #[test]
    fn flags_every_unsupported_construct() {
        let src = "\
import os
from typing import Any
from .sibling import x
with open('f') as fh:
    pass
match x:
    case 1:
        pass
def f():
    global counter
    return lambda: 1
";
        let result = run(src);
        assert_eq!(
            codes_of(&result.errors),
            vec!["E005", "E005", "E003", "E004", "E006", "E008"]
        );
        assert!(result.errors[0].message.contains("'os'"));
        assert!(result.errors[1].message.contains("'.sibling'"));
    }

    #[test]
    fn configured_modules_are_allowed() {
        let parsed = compile("import json\nimport json.decoder\n", None).unwrap();
        assert_eq!(check(&parsed).errors.len(), 2);
        let config = CheckerConfig {
            allowed_modules: vec!["json".into()],
            ..CheckerConfig::default()
        };
        assert!(check_with(&parsed, &config).valid);
    }

    #[test]
    fn missing_external_annotations() {
        let src = "@external\ndef f(a, b: int):\n    ...\nf(1, 2)\n";
        let result = run(src);
        assert_eq!(codes_of(&result.errors), vec!["E007", "E007"]);
        assert!(result.errors.iter().all(|m| m.line == 2));
    }

    #[test]
    fn unused_declarations_warn() {
        let src = "\
x = Input(\"x\")
y: int = Input(\"y\")

@external
def helper(v: int) -> int:
    ...

@external
def used(v: int) -> int:
    ...

obj.helper
used(y)
";
        let result = run(src);
        assert!(result.valid);
        // `obj.helper` counts as a reference to `helper`.
        assert_eq!(codes_of(&result.warnings), vec!["W002", "W004"]);
        assert!(result.warnings[0].message.contains("'x'"));
    }

    #[test]
    fn declarations_do_not_reference_themselves() {
        let src = "@external\ndef fetch(x: int) -> int:\n    ...\n";
        let result = run(src);
        assert_eq!(codes_of(&result.warnings), vec!["W001"]);
        assert!(result.info.constructs.is_empty());
    }

    #[test]
    fn long_scripts_warn() {
        let src = "x = 1\n".repeat(5);
        let parsed = compile(&src, None).unwrap();
        let config = CheckerConfig {
            max_script_lines: 3,
            ..CheckerConfig::default()
        };
        let result = check_with(&parsed, &config);
        assert_eq!(codes_of(&result.warnings), vec!["W003"]);
        assert_eq!(result.info.lines_of_code, 5);
    }

    #[test]
    fn observed_constructs_are_sorted() {
        let src = "\
total = 0
for i in range(3):
    total += i
while total:
    total -= 1
try:
    squares = [n * n for n in range(3)]
except ValueError:
    pass
if (n := 2) > 1:
    msg = f\"{n}\"
";
        let result = run(src);
        assert_eq!(
            result.info.constructs,
            vec![
                "comprehension",
                "f_string",
                "for_loop",
                "if_else",
                "try_except",
                "walrus",
                "while_loop",
            ]
        );
    }

    #[test]
    fn input_defaults_reference_other_inputs() {
        let src = "\
limit: int = Input(\"limit\")
page: int = Input(\"page\", default=limit // 10)
page
";
        let result = run(src);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn input_defaults_are_not_checked() {
        let src = "key: str = Input(\"key\", default=(lambda: 'k')())\nkey\n";
        let result = run(src);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.info.constructs.is_empty());
    }

    #[test]
    fn store_context_is_not_a_reference() {
        let src = "y: int = Input(\"y\")\ny = 42\n";
        let result = run(src);
        assert_eq!(codes_of(&result.warnings), vec!["W002"]);
    }
}
