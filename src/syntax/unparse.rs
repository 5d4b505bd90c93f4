//! AST → source text.
//!
//! Parentheses are inserted only where operator precedence requires them.
//! Literals are written with their original spelling. When a [`LineIndex`]
//! for the parsed source is supplied, every output line records the source
//! line it was rendered from.

use super::ast::*;
use super::LineIndex;

/// Binding strength of an expression position, weakest first.
mod prec {
    pub const NAMED: u8 = 1;
    pub const TUPLE: u8 = 2;
    pub const YIELD: u8 = 3;
    pub const TEST: u8 = 4;
    pub const OR: u8 = 5;
    pub const AND: u8 = 6;
    pub const NOT: u8 = 7;
    pub const CMP: u8 = 8;
    pub const BOR: u8 = 9;
    pub const BXOR: u8 = 10;
    pub const BAND: u8 = 11;
    pub const SHIFT: u8 = 12;
    pub const ARITH: u8 = 13;
    pub const TERM: u8 = 14;
    pub const FACTOR: u8 = 15;
    pub const POWER: u8 = 16;
    pub const AWAIT: u8 = 17;
    pub const ATOM: u8 = 18;
}

const INDENT: &str = "    ";

/// Output of [`unparse_module`].
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub text: String,
    /// Source line (1-based) for each output line; `None` where the line has
    /// no single source counterpart (`else:`, `finally:`).
    pub origins: Vec<Option<usize>>,
    /// Output line (1-based) holding the header of each top-level statement.
    pub statement_lines: Vec<usize>,
}

pub fn unparse_module(body: &[Stmt], index: Option<&LineIndex>) -> Rendered {
    let mut u = Unparser::new(index);
    let statement_lines = body.iter().map(|s| u.stmt(s)).collect();
    let mut text = u.out;
    if !text.is_empty() {
        text.push('\n');
    }
    Rendered {
        text,
        origins: u.origins,
        statement_lines,
    }
}

/// Render a single expression, e.g. an annotation or a default value.
pub fn unparse_expr(expr: &Expr) -> String {
    let mut u = Unparser::new(None);
    u.expr(expr, prec::TEST);
    u.out
}

struct Unparser<'a> {
    out: String,
    origins: Vec<Option<usize>>,
    index: Option<&'a LineIndex>,
    depth: usize,
}

impl<'a> Unparser<'a> {
    fn new(index: Option<&'a LineIndex>) -> Self {
        Self {
            out: String::new(),
            origins: Vec::new(),
            index,
            depth: 0,
        }
    }

    fn line_of(&self, span: Span) -> Option<usize> {
        self.index.map(|idx| idx.line_of(span.start))
    }

    /// Start a new output line; returns its 1-based number.
    fn begin_line(&mut self, origin: Option<usize>) -> usize {
        if !self.origins.is_empty() {
            self.out.push('\n');
        }
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.origins.push(origin);
        self.origins.len()
    }

    fn write(&mut self, text: &str) {
        self.out.push_str(text);
    }

    /// Write a literal that may contain raw newlines. Continuation lines map
    /// line-for-line to the source only when the literal spans exactly as
    /// many source lines as it has newlines.
    fn write_literal(&mut self, raw: &str, span: Span) {
        let newlines = raw.matches('\n').count();
        if newlines > 0 {
            let first = self.index.map(|idx| {
                (
                    idx.line_of(span.start),
                    idx.line_of(span.end.saturating_sub(1).max(span.start)),
                )
            });
            for k in 1..=newlines {
                let origin = match first {
                    Some((start, end)) if end - start == newlines => Some(start + k),
                    _ => None,
                };
                self.origins.push(origin);
            }
        }
        self.out.push_str(raw);
    }

    fn open_paren(&mut self, needed: bool) {
        if needed {
            self.out.push('(');
        }
    }

    fn close_paren(&mut self, needed: bool) {
        if needed {
            self.out.push(')');
        }
    }

    // ── Statements ─────────────────────────────────────────────────

    fn block(&mut self, body: &[Stmt]) {
        self.write(":");
        self.depth += 1;
        if body.is_empty() {
            self.begin_line(None);
            self.write("pass");
        }
        for stmt in body {
            self.stmt(stmt);
        }
        self.depth -= 1;
    }

    fn decorators(&mut self, decorators: &[Expr]) {
        for deco in decorators {
            self.begin_line(self.line_of(deco.span));
            self.write("@");
            self.expr(deco, prec::TEST);
        }
    }

    /// Render one statement; returns the output line of its header.
    fn stmt(&mut self, stmt: &Stmt) -> usize {
        let origin = self.line_of(stmt.span);
        match &stmt.kind {
            StmtKind::FunctionDef(func) => {
                self.decorators(&func.decorators);
                let head = self.begin_line(origin);
                self.write(if func.is_async { "async def " } else { "def " });
                self.write(&func.name);
                self.write("(");
                self.parameters(&func.params);
                self.write(")");
                if let Some(ret) = &func.returns {
                    self.write(" -> ");
                    self.expr(ret, prec::TEST);
                }
                self.block(&func.body);
                head
            }
            StmtKind::ClassDef(class) => {
                self.decorators(&class.decorators);
                let head = self.begin_line(origin);
                self.write("class ");
                self.write(&class.name);
                if !class.bases.is_empty() || !class.keywords.is_empty() {
                    self.write("(");
                    self.call_args(&class.bases, &class.keywords);
                    self.write(")");
                }
                self.block(&class.body);
                head
            }
            StmtKind::If { test, body, orelse } => {
                let head = self.begin_line(origin);
                self.write("if ");
                self.expr(test, prec::NAMED);
                self.block(body);
                let mut orelse = orelse;
                loop {
                    match orelse.as_slice() {
                        [] => break,
                        [Stmt {
                            kind:
                                StmtKind::If {
                                    test,
                                    body,
                                    orelse: next,
                                },
                            span,
                        }] => {
                            self.begin_line(self.line_of(*span));
                            self.write("elif ");
                            self.expr(test, prec::NAMED);
                            self.block(body);
                            orelse = next;
                        }
                        other => {
                            self.begin_line(None);
                            self.write("else");
                            self.block(other);
                            break;
                        }
                    }
                }
                head
            }
            StmtKind::While { test, body, orelse } => {
                let head = self.begin_line(origin);
                self.write("while ");
                self.expr(test, prec::NAMED);
                self.block(body);
                self.else_block(orelse);
                head
            }
            StmtKind::For {
                is_async,
                target,
                iter,
                body,
                orelse,
            } => {
                let head = self.begin_line(origin);
                self.write(if *is_async { "async for " } else { "for " });
                self.expr(target, prec::TUPLE);
                self.write(" in ");
                self.expr(iter, prec::TUPLE);
                self.block(body);
                self.else_block(orelse);
                head
            }
            StmtKind::With {
                is_async,
                items,
                body,
            } => {
                let head = self.begin_line(origin);
                self.write(if *is_async { "async with " } else { "with " });
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.expr(&item.context, prec::TEST);
                    if let Some(vars) = &item.optional_vars {
                        self.write(" as ");
                        self.expr(vars, prec::TEST);
                    }
                }
                self.block(body);
                head
            }
            StmtKind::Match { subject, cases } => {
                let head = self.begin_line(origin);
                self.write("match ");
                self.expr(subject, prec::TUPLE);
                self.write(":");
                self.depth += 1;
                for case in cases {
                    self.begin_line(self.line_of(case.span));
                    self.write("case ");
                    self.pattern(&case.pattern, false);
                    if let Some(guard) = &case.guard {
                        self.write(" if ");
                        self.expr(guard, prec::NAMED);
                    }
                    self.block(&case.body);
                }
                self.depth -= 1;
                head
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
            } => {
                let head = self.begin_line(origin);
                self.write("try");
                self.block(body);
                for handler in handlers {
                    self.begin_line(self.line_of(handler.span));
                    self.write(if *is_star { "except*" } else { "except" });
                    if let Some(type_) = &handler.type_ {
                        self.write(" ");
                        self.expr(type_, prec::TEST);
                        if let Some(name) = &handler.name {
                            self.write(" as ");
                            self.write(name);
                        }
                    }
                    self.block(&handler.body);
                }
                self.else_block(orelse);
                if !finalbody.is_empty() {
                    self.begin_line(None);
                    self.write("finally");
                    self.block(finalbody);
                }
                head
            }
            simple => {
                let head = self.begin_line(origin);
                self.simple_stmt(simple);
                head
            }
        }
    }

    fn else_block(&mut self, orelse: &[Stmt]) {
        if !orelse.is_empty() {
            self.begin_line(None);
            self.write("else");
            self.block(orelse);
        }
    }

    fn simple_stmt(&mut self, kind: &StmtKind) {
        match kind {
            StmtKind::Return(value) => {
                self.write("return");
                if let Some(value) = value {
                    self.write(" ");
                    self.expr(value, prec::TUPLE);
                }
            }
            StmtKind::Delete(targets) => {
                self.write("del ");
                self.expr_list(targets, prec::TEST);
            }
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.expr(target, prec::TUPLE);
                    self.write(" = ");
                }
                self.expr(value, prec::TUPLE);
            }
            StmtKind::AugAssign { target, op, value } => {
                self.expr(target, prec::TUPLE);
                self.write(" ");
                self.write(op.as_str());
                self.write("= ");
                self.expr(value, prec::TUPLE);
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.expr(target, prec::TUPLE);
                self.write(": ");
                self.expr(annotation, prec::TEST);
                if let Some(value) = value {
                    self.write(" = ");
                    self.expr(value, prec::TUPLE);
                }
            }
            StmtKind::Raise { exc, cause } => {
                self.write("raise");
                if let Some(exc) = exc {
                    self.write(" ");
                    self.expr(exc, prec::TEST);
                }
                if let Some(cause) = cause {
                    self.write(" from ");
                    self.expr(cause, prec::TEST);
                }
            }
            StmtKind::Assert { test, msg } => {
                self.write("assert ");
                self.expr(test, prec::TEST);
                if let Some(msg) = msg {
                    self.write(", ");
                    self.expr(msg, prec::TEST);
                }
            }
            StmtKind::Import(names) => {
                self.write("import ");
                self.aliases(names);
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => {
                self.write("from ");
                self.write(&".".repeat(*level));
                if let Some(module) = module {
                    self.write(module);
                }
                self.write(" import ");
                self.aliases(names);
            }
            StmtKind::Global(names) => {
                self.write("global ");
                self.write(&names.join(", "));
            }
            StmtKind::Nonlocal(names) => {
                self.write("nonlocal ");
                self.write(&names.join(", "));
            }
            StmtKind::Expr(expr) => self.expr(expr, prec::TUPLE),
            StmtKind::Pass => self.write("pass"),
            StmtKind::Break => self.write("break"),
            StmtKind::Continue => self.write("continue"),
            StmtKind::FunctionDef(_)
            | StmtKind::ClassDef(_)
            | StmtKind::If { .. }
            | StmtKind::While { .. }
            | StmtKind::For { .. }
            | StmtKind::With { .. }
            | StmtKind::Match { .. }
            | StmtKind::Try { .. } => {}
        }
    }

    fn aliases(&mut self, names: &[Alias]) {
        for (i, alias) in names.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.write(&alias.name);
            if let Some(asname) = &alias.asname {
                self.write(" as ");
                self.write(asname);
            }
        }
    }

    fn parameters(&mut self, params: &Parameters) {
        let mut first = true;
        let mut sep = |u: &mut Self| {
            if !first {
                u.write(", ");
            }
            first = false;
        };

        let positional: Vec<&Param> = params.posonly.iter().chain(&params.args).collect();
        let first_default = positional.len().saturating_sub(params.defaults.len());
        for (i, param) in positional.iter().enumerate() {
            sep(self);
            let default = i
                .checked_sub(first_default)
                .and_then(|d| params.defaults.get(d));
            self.param(param, default);
            if i + 1 == params.posonly.len() {
                self.write(", /");
            }
        }

        if params.vararg.is_some() || !params.kwonly.is_empty() {
            sep(self);
            self.write("*");
            if let Some(vararg) = &params.vararg {
                self.param(vararg, None);
            }
        }
        for (i, param) in params.kwonly.iter().enumerate() {
            sep(self);
            let default = params.kw_defaults.get(i).and_then(Option::as_ref);
            self.param(param, default);
        }
        if let Some(kwarg) = &params.kwarg {
            sep(self);
            self.write("**");
            self.param(kwarg, None);
        }
    }

    fn param(&mut self, param: &Param, default: Option<&Expr>) {
        self.write(&param.name);
        if let Some(annotation) = &param.annotation {
            self.write(": ");
            self.expr(annotation, prec::TEST);
        }
        if let Some(default) = default {
            self.write(if param.annotation.is_some() { " = " } else { "=" });
            self.expr(default, prec::TEST);
        }
    }

    // ── Patterns ───────────────────────────────────────────────────

    fn pattern(&mut self, pattern: &Pattern, in_or: bool) {
        match pattern {
            Pattern::Value(expr) => self.expr(expr, prec::TEST),
            Pattern::Singleton(c) => self.constant(c, Span::default()),
            Pattern::Sequence(items) => {
                self.write("[");
                for (i, p) in items.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.pattern(p, false);
                }
                self.write("]");
            }
            Pattern::Mapping {
                keys,
                patterns,
                rest,
            } => {
                self.write("{");
                for (i, (key, p)) in keys.iter().zip(patterns).enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.expr(key, prec::TEST);
                    self.write(": ");
                    self.pattern(p, false);
                }
                if let Some(rest) = rest {
                    if !keys.is_empty() {
                        self.write(", ");
                    }
                    self.write("**");
                    self.write(rest);
                }
                self.write("}");
            }
            Pattern::Class {
                cls,
                patterns,
                kwd_attrs,
                kwd_patterns,
            } => {
                self.expr(cls, prec::ATOM);
                self.write("(");
                let mut first = true;
                for p in patterns {
                    if !first {
                        self.write(", ");
                    }
                    first = false;
                    self.pattern(p, false);
                }
                for (attr, p) in kwd_attrs.iter().zip(kwd_patterns) {
                    if !first {
                        self.write(", ");
                    }
                    first = false;
                    self.write(attr);
                    self.write("=");
                    self.pattern(p, false);
                }
                self.write(")");
            }
            Pattern::Star(name) => {
                self.write("*");
                self.write(name.as_deref().unwrap_or("_"));
            }
            Pattern::As { pattern, name } => match (pattern, name) {
                (None, None) => self.write("_"),
                (None, Some(name)) => self.write(name),
                (Some(inner), name) => {
                    self.open_paren(in_or);
                    self.pattern(inner, false);
                    self.write(" as ");
                    self.write(name.as_deref().unwrap_or("_"));
                    self.close_paren(in_or);
                }
            },
            Pattern::Or(alternatives) => {
                for (i, p) in alternatives.iter().enumerate() {
                    if i > 0 {
                        self.write(" | ");
                    }
                    self.pattern(p, true);
                }
            }
        }
    }

    // ── Expressions ────────────────────────────────────────────────

    fn expr_list(&mut self, exprs: &[Expr], level: u8) {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.expr(e, level);
        }
    }

    fn constant(&mut self, c: &Constant, span: Span) {
        match c {
            Constant::None => self.write("None"),
            Constant::Bool(true) => self.write("True"),
            Constant::Bool(false) => self.write("False"),
            Constant::Ellipsis => self.write("..."),
            Constant::Str { raw, .. } | Constant::Bytes { raw } => self.write_literal(raw, span),
            Constant::Int(raw) | Constant::Float(raw) | Constant::Complex(raw) => self.write(raw),
        }
    }

    fn expr(&mut self, expr: &Expr, level: u8) {
        match &expr.kind {
            ExprKind::Name { id, .. } => self.write(id),
            ExprKind::Constant(c) => self.constant(c, expr.span),
            ExprKind::FString { raw, .. } => self.write_literal(raw, expr.span),
            ExprKind::BoolOp { op, values } => {
                let own = match op {
                    BoolOp::And => prec::AND,
                    BoolOp::Or => prec::OR,
                };
                let word = match op {
                    BoolOp::And => " and ",
                    BoolOp::Or => " or ",
                };
                let parens = level > own;
                self.open_paren(parens);
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.write(word);
                    }
                    self.expr(value, own + 1);
                }
                self.close_paren(parens);
            }
            ExprKind::NamedExpr { target, value } => {
                let parens = level > prec::NAMED;
                self.open_paren(parens);
                self.expr(target, prec::ATOM);
                self.write(" := ");
                self.expr(value, prec::TEST);
                self.close_paren(parens);
            }
            ExprKind::BinOp { left, op, right } => {
                let own = binop_precedence(*op);
                let (left_level, right_level) = if *op == Operator::Pow {
                    (own + 1, own)
                } else {
                    (own, own + 1)
                };
                let parens = level > own;
                self.open_paren(parens);
                self.expr(left, left_level);
                self.write(" ");
                self.write(op.as_str());
                self.write(" ");
                self.expr(right, right_level);
                self.close_paren(parens);
            }
            ExprKind::UnaryOp { op, operand } => {
                let (own, text) = match op {
                    UnaryOp::Not => (prec::NOT, "not "),
                    UnaryOp::Invert => (prec::FACTOR, "~"),
                    UnaryOp::UAdd => (prec::FACTOR, "+"),
                    UnaryOp::USub => (prec::FACTOR, "-"),
                };
                let parens = level > own;
                self.open_paren(parens);
                self.write(text);
                self.expr(operand, own);
                self.close_paren(parens);
            }
            ExprKind::Lambda { params, body } => {
                let parens = level > prec::TEST;
                self.open_paren(parens);
                self.write("lambda");
                if !params.is_empty() {
                    self.write(" ");
                    self.parameters(params);
                }
                self.write(": ");
                self.expr(body, prec::TEST);
                self.close_paren(parens);
            }
            ExprKind::IfExp { test, body, orelse } => {
                let parens = level > prec::TEST;
                self.open_paren(parens);
                self.expr(body, prec::OR);
                self.write(" if ");
                self.expr(test, prec::OR);
                self.write(" else ");
                self.expr(orelse, prec::TEST);
                self.close_paren(parens);
            }
            ExprKind::Dict { keys, values } => {
                self.write("{");
                for (i, (key, value)) in keys.iter().zip(values).enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    match key {
                        Some(key) => {
                            self.expr(key, prec::TEST);
                            self.write(": ");
                            self.expr(value, prec::TEST);
                        }
                        None => {
                            self.write("**");
                            self.expr(value, prec::BOR);
                        }
                    }
                }
                self.write("}");
            }
            ExprKind::Set(elts) => {
                self.write("{");
                self.expr_list(elts, prec::TEST);
                self.write("}");
            }
            ExprKind::ListComp { elt, generators } => {
                self.write("[");
                self.expr(elt, prec::TEST);
                self.generators(generators);
                self.write("]");
            }
            ExprKind::SetComp { elt, generators } => {
                self.write("{");
                self.expr(elt, prec::TEST);
                self.generators(generators);
                self.write("}");
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.write("{");
                self.expr(key, prec::TEST);
                self.write(": ");
                self.expr(value, prec::TEST);
                self.generators(generators);
                self.write("}");
            }
            ExprKind::GeneratorExp { elt, generators } => {
                self.write("(");
                self.expr(elt, prec::TEST);
                self.generators(generators);
                self.write(")");
            }
            ExprKind::Await(value) => {
                let parens = level > prec::AWAIT;
                self.open_paren(parens);
                self.write("await ");
                self.expr(value, prec::ATOM);
                self.close_paren(parens);
            }
            ExprKind::Yield(value) => {
                let parens = level > prec::YIELD;
                self.open_paren(parens);
                self.write("yield");
                if let Some(value) = value {
                    self.write(" ");
                    self.expr(value, prec::TEST);
                }
                self.close_paren(parens);
            }
            ExprKind::YieldFrom(value) => {
                let parens = level > prec::YIELD;
                self.open_paren(parens);
                self.write("yield from ");
                self.expr(value, prec::TEST);
                self.close_paren(parens);
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let parens = level > prec::CMP;
                self.open_paren(parens);
                self.expr(left, prec::CMP + 1);
                for (op, right) in ops.iter().zip(comparators) {
                    self.write(" ");
                    self.write(op.as_str());
                    self.write(" ");
                    self.expr(right, prec::CMP + 1);
                }
                self.close_paren(parens);
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func, prec::ATOM);
                self.write("(");
                self.call_args(args, keywords);
                self.write(")");
            }
            ExprKind::Attribute { value, attr, .. } => {
                let int_literal = matches!(value.kind, ExprKind::Constant(Constant::Int(_)));
                self.open_paren(int_literal);
                self.expr(value, prec::ATOM);
                self.close_paren(int_literal);
                self.write(".");
                self.write(attr);
            }
            ExprKind::Subscript { value, slice, .. } => {
                self.expr(value, prec::ATOM);
                self.write("[");
                match &slice.kind {
                    ExprKind::Tuple { elts, .. } if !elts.is_empty() => {
                        self.expr_list(elts, prec::TEST);
                        if elts.len() == 1 {
                            self.write(",");
                        }
                    }
                    _ => self.expr(slice, prec::TUPLE),
                }
                self.write("]");
            }
            ExprKind::Starred { value, .. } => {
                self.write("*");
                self.expr(value, prec::BOR);
            }
            ExprKind::List { elts, .. } => {
                self.write("[");
                self.expr_list(elts, prec::TEST);
                self.write("]");
            }
            ExprKind::Tuple { elts, .. } => {
                let parens = elts.is_empty() || level > prec::TUPLE;
                self.open_paren(parens);
                self.expr_list(elts, prec::TEST);
                if elts.len() == 1 {
                    self.write(",");
                }
                self.close_paren(parens);
            }
            ExprKind::Slice { lower, upper, step } => {
                if let Some(lower) = lower {
                    self.expr(lower, prec::TEST);
                }
                self.write(":");
                if let Some(upper) = upper {
                    self.expr(upper, prec::TEST);
                }
                if let Some(step) = step {
                    self.write(":");
                    self.expr(step, prec::TEST);
                }
            }
        }
    }

    fn call_args(&mut self, args: &[Expr], keywords: &[Keyword]) {
        let mut first = true;
        for arg in args {
            if !first {
                self.write(", ");
            }
            first = false;
            self.expr(arg, prec::TEST);
        }
        for kw in keywords {
            if !first {
                self.write(", ");
            }
            first = false;
            match &kw.arg {
                Some(name) => {
                    self.write(name);
                    self.write("=");
                }
                None => self.write("**"),
            }
            self.expr(&kw.value, prec::TEST);
        }
    }

    fn generators(&mut self, generators: &[Comprehension]) {
        for gen in generators {
            self.write(if gen.is_async { " async for " } else { " for " });
            self.expr(&gen.target, prec::TUPLE);
            self.write(" in ");
            self.expr(&gen.iter, prec::OR);
            for cond in &gen.ifs {
                self.write(" if ");
                self.expr(cond, prec::OR);
            }
        }
    }
}

fn binop_precedence(op: Operator) -> u8 {
    match op {
        Operator::BitOr => prec::BOR,
        Operator::BitXor => prec::BXOR,
        Operator::BitAnd => prec::BAND,
        Operator::LShift | Operator::RShift => prec::SHIFT,
        Operator::Add | Operator::Sub => prec::ARITH,
        Operator::Mult | Operator::MatMult | Operator::Div | Operator::Mod | Operator::FloorDiv => {
            prec::TERM
        }
        Operator::Pow => prec::POWER,
    }
}
