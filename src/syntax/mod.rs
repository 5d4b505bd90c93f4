//! Python-subset front end: lexer, parser, unparser and tree visitor.
//!
//! `.pym` scripts are ordinary Python source, so this layer mirrors the
//! host language's tokenizer and grammar closely enough that every script
//! the downstream interpreter can run also parses here.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod strings;
pub mod unparse;
pub mod visitor;

use std::fmt;
use std::thread;

use ast::{Expr, Module, Pattern, Span, Stmt};
use visitor::Visitor;

/// Deepest bracket nesting, and deepest parser recursion, accepted.
pub const MAX_NESTING: usize = 200;
/// Deepest syntax tree accepted, counting statement, expression and pattern
/// nodes along one path.
pub const MAX_TREE_DEPTH: usize = 500;
/// Stack of the parsing thread. Recursion there is bounded by
/// `MAX_NESTING`.
const PARSER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Parse source text into a module AST.
///
/// source → lex → parse → depth check → `Module`
///
/// Parsing runs on its own thread so that its stack does not depend on the
/// caller's. Trees deeper than `MAX_TREE_DEPTH` are rejected, which keeps
/// every later recursive pass within an ordinary thread stack.
pub fn parse_module(source: &str) -> Result<Module, SyntaxError> {
    thread::scope(|scope| {
        let parsing = thread::Builder::new()
            .name("grail-parse".into())
            .stack_size(PARSER_STACK_SIZE)
            .spawn_scoped(scope, || parse_in_place(source));
        match parsing {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload)),
            // No thread available: parse here and rely on the limits alone.
            Err(_) => parse_in_place(source),
        }
    })
}

fn parse_in_place(source: &str) -> Result<Module, SyntaxError> {
    let tokens = lexer::lex(source)?;
    let module = parser::parse(tokens)?;
    check_depth(&module)?;
    Ok(module)
}

fn check_depth(module: &Module) -> Result<(), SyntaxError> {
    let mut guard = DepthGuard::default();
    visitor::walk_body(&mut guard, &module.body);
    match guard.too_deep {
        Some(span) => Err(SyntaxError::new("code is too deeply nested", span)),
        None => Ok(()),
    }
}

/// Stops descending at `MAX_TREE_DEPTH`, so its own recursion is bounded.
#[derive(Default)]
struct DepthGuard {
    depth: usize,
    last_span: Span,
    too_deep: Option<Span>,
}

impl DepthGuard {
    fn enter(&mut self, span: Span) -> bool {
        if self.too_deep.is_some() {
            return false;
        }
        if self.depth >= MAX_TREE_DEPTH {
            self.too_deep = Some(span);
            return false;
        }
        self.depth += 1;
        true
    }
}

impl Visitor for DepthGuard {
    fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
        self.last_span = stmt.span;
        self.enter(stmt.span)
    }

    fn visit_expr(&mut self, expr: &Expr) -> bool {
        self.last_span = expr.span;
        self.enter(expr.span)
    }

    fn visit_pattern(&mut self, _pattern: &Pattern) -> bool {
        self.enter(self.last_span)
    }

    fn leave_stmt(&mut self, _stmt: &Stmt) {
        self.depth -= 1;
    }

    fn leave_expr(&mut self, _expr: &Expr) {
        self.depth -= 1;
    }

    fn leave_pattern(&mut self, _pattern: &Pattern) {
        self.depth -= 1;
    }
}

/// The first syntax error found in a source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// Format the error with a line/column prefix resolved against `source`.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = LineIndex::new(source).line_col(self.span.start);
        format!("line {line}:{col}: {}", self.message)
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SyntaxError {}

/// Byte offset → (line, column) lookup for one source text.
///
/// Lines and columns are 1-based; columns count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    text: String,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        let bytes = source.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes.get(i) {
                Some(b'\n') => line_starts.push(i + 1),
                Some(b'\r') => {
                    if bytes.get(i + 1) == Some(&b'\n') {
                        i += 1;
                    }
                    line_starts.push(i + 1);
                }
                _ => {}
            }
            i += 1;
        }
        Self {
            line_starts,
            text: source.to_string(),
        }
    }

    /// 1-based line containing `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// 1-based (line, column) of `offset`.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = self.line_of(offset);
        let start = self
            .line_starts
            .get(line.saturating_sub(1))
            .copied()
            .unwrap_or(0);
        let end = offset.min(self.text.len());
        let col = self
            .text
            .get(start..end)
            .map_or(end.saturating_sub(start), |s| s.chars().count());
        (line, col + 1)
    }

    /// Byte offset where 1-based `line` begins; the text length past the end.
    pub fn line_start(&self, line: usize) -> usize {
        line.checked_sub(1)
            .and_then(|i| self.line_starts.get(i))
            .copied()
            .unwrap_or(self.text.len())
    }

    /// Byte offset just past the content of `line`, before its terminator.
    pub fn line_end(&self, line: usize) -> usize {
        let start = self.line_start(line);
        let rest = self.text.get(start..).unwrap_or("");
        start + rest.find(['\n', '\r']).unwrap_or(rest.len())
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}
