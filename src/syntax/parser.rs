use super::ast::*;
use super::lexer::{self, SpannedToken, StrKind, StrToken, Token};
use super::strings;
use super::{SyntaxError, MAX_NESTING, MAX_TREE_DEPTH};

type PResult<T> = Result<T, SyntaxError>;

pub fn parse(tokens: Vec<SpannedToken>) -> Result<Module, SyntaxError> {
    let mut parser = Parser::new(tokens);
    parser.parse_module()
}

/// Parse one expression whose text starts at absolute offset `offset` of a
/// larger source. Used for f-string replacement fields.
/// `depth` is the nesting level of the enclosing parser.
pub fn parse_expression_at(text: &str, offset: usize, depth: usize) -> Result<Expr, SyntaxError> {
    let wrapped = format!("({text})");
    let tokens = lexer::lex_at(&wrapped, offset.saturating_sub(1))?;
    let mut parser = Parser::new(tokens);
    parser.depth = depth;
    let expr = parser.parse_atom()?;
    parser.expect_newline()?;
    if !parser.at_eof() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    /// End offset of the last consumed non-layout token.
    last_end: usize,
    /// Current expression/block nesting.
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        let last_end = tokens.first().map_or(0, |t| t.span.start);
        Self {
            tokens,
            pos: 0,
            last_end,
            depth: 0,
        }
    }

    fn parse_module(&mut self) -> PResult<Module> {
        let mut body = Vec::new();
        while !self.at_eof() {
            if self.eat(&Token::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Module { body })
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        self.tokens
            .get(self.pos + ahead)
            .map_or(&Token::Eof, |t| &t.token)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map_or(Span::new(self.last_end, self.last_end), |t| t.span)
    }

    fn start(&self) -> usize {
        self.span().start
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> Span {
        let sp = self.span();
        if let Some(tok) = self.tokens.get(self.pos) {
            if !matches!(
                tok.token,
                Token::Newline | Token::Indent | Token::Dedent | Token::Eof
            ) {
                self.last_end = tok.span.end;
            }
        }
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        sp
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == expected
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> PResult<Span> {
        if self.check(expected) {
            Ok(self.advance())
        } else if matches!(self.peek(), Token::Eof) {
            Err(self.unexpected())
        } else {
            Err(SyntaxError::new(
                format!("expected {}", describe(expected)),
                self.span(),
            ))
        }
    }

    fn expect_name(&mut self) -> PResult<(String, Span)> {
        if let Token::Name(name) = self.peek().clone() {
            let sp = self.advance();
            Ok((name, sp))
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_newline(&mut self) -> PResult<()> {
        if self.eat(&Token::Newline) || self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn is_soft_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Name(n) if n == word)
    }

    fn finish(&self, start: usize) -> Span {
        Span::new(start, self.last_end.max(start))
    }

    fn save(&self) -> (usize, usize) {
        (self.pos, self.last_end)
    }

    fn restore(&mut self, state: (usize, usize)) {
        self.pos = state.0;
        self.last_end = state.1;
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::new("code is too deeply nested", self.span()));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Each link of a left-leaning chain (`a + b + c`, `a.b.c`) adds a
    /// level to the tree without recursing here.
    fn check_chain(&self, links: usize) -> PResult<()> {
        if self.depth + links > MAX_TREE_DEPTH {
            return Err(SyntaxError::new("expression is too deeply nested", self.span()));
        }
        Ok(())
    }

    fn unexpected(&self) -> SyntaxError {
        let message = match self.peek() {
            Token::Indent => "unexpected indent",
            Token::Dedent => "unexpected unindent",
            Token::Eof => "unexpected EOF while parsing",
            _ => "invalid syntax",
        };
        SyntaxError::new(message, self.span())
    }

    fn is_comprehension_start(&self) -> bool {
        matches!(self.peek(), Token::For)
            || (matches!(self.peek(), Token::Async) && matches!(self.peek_at(1), Token::For))
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek(),
            Token::Name(_)
                | Token::Int(_)
                | Token::Float(_)
                | Token::Imaginary(_)
                | Token::Str(_)
                | Token::None
                | Token::True
                | Token::False
                | Token::Ellipsis
                | Token::LParen
                | Token::LBracket
                | Token::LBrace
                | Token::Minus
                | Token::Plus
                | Token::Tilde
                | Token::Not
                | Token::Lambda
                | Token::Await
                | Token::Star
        )
    }

    // ── Statements ─────────────────────────────────────────────────

    fn parse_statement(&mut self) -> PResult<Vec<Stmt>> {
        match self.peek() {
            Token::Def
            | Token::At
            | Token::Class
            | Token::If
            | Token::While
            | Token::For
            | Token::Try
            | Token::With
            | Token::Async => Ok(vec![self.parse_compound()?]),
            Token::Indent => Err(self.unexpected()),
            Token::Name(n) if n == "match" => match self.try_parse_match()? {
                Some(stmt) => Ok(vec![stmt]),
                None => self.parse_simple_statements(),
            },
            _ => self.parse_simple_statements(),
        }
    }

    fn parse_simple_statements(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_simple_statement()?];
        while self.eat(&Token::Semi) {
            if matches!(self.peek(), Token::Newline | Token::Eof) {
                break;
            }
            stmts.push(self.parse_simple_statement()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    /// `':' (NEWLINE INDENT stmt+ DEDENT | simple_stmts)`
    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.nested(Self::parse_suite)
    }

    fn parse_suite(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&Token::Colon)?;
        if !self.eat(&Token::Newline) {
            return self.parse_simple_statements();
        }
        if !self.eat(&Token::Indent) {
            return Err(SyntaxError::new("expected an indented block", self.span()));
        }
        let mut body = Vec::new();
        while !matches!(self.peek(), Token::Dedent | Token::Eof) {
            body.extend(self.parse_statement()?);
        }
        self.eat(&Token::Dedent);
        Ok(body)
    }

    fn parse_compound(&mut self) -> PResult<Stmt> {
        match self.peek() {
            Token::At => self.parse_decorated(),
            Token::Def => self.parse_function_def(Vec::new(), None),
            Token::Class => self.parse_class_def(Vec::new()),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::For => self.parse_for(None),
            Token::Try => self.parse_try(),
            Token::With => self.parse_with(None),
            Token::Async => {
                let start = self.advance().start;
                match self.peek() {
                    Token::Def => self.parse_function_def(Vec::new(), Some(start)),
                    Token::For => self.parse_for(Some(start)),
                    Token::With => self.parse_with(Some(start)),
                    _ => Err(self.unexpected()),
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_decorated(&mut self) -> PResult<Stmt> {
        let mut decorators = Vec::new();
        while self.eat(&Token::At) {
            decorators.push(self.parse_named_expr()?);
            self.expect_newline()?;
        }
        match self.peek() {
            Token::Def => self.parse_function_def(decorators, None),
            Token::Class => self.parse_class_def(decorators),
            Token::Async if matches!(self.peek_at(1), Token::Def) => {
                let start = self.advance().start;
                self.parse_function_def(decorators, Some(start))
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_function_def(
        &mut self,
        decorators: Vec<Expr>,
        async_start: Option<usize>,
    ) -> PResult<Stmt> {
        let def_span = self.expect(&Token::Def)?;
        let start = async_start.unwrap_or(def_span.start);
        let (name, _) = self.expect_name()?;
        self.expect(&Token::LParen)?;
        let params = self.parse_parameters(&Token::RParen, true)?;
        self.expect(&Token::RParen)?;
        let returns = if self.eat(&Token::Arrow) {
            Some(self.parse_test()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(FunctionDef {
                name,
                is_async: async_start.is_some(),
                decorators,
                params,
                returns,
                body,
            }),
            span: self.finish(start),
        })
    }

    /// Parameter list up to (not including) `closing`. Shared by `def`
    /// (annotations allowed) and `lambda` (no annotations).
    fn parse_parameters(&mut self, closing: &Token, annotations: bool) -> PResult<Parameters> {
        let mut params = Parameters::default();
        let mut seen_slash = false;
        let mut seen_star = false;
        let mut bare_star: Option<Span> = None;

        while self.peek() != closing {
            match self.peek() {
                Token::Slash => {
                    let sp = self.span();
                    if seen_slash {
                        return Err(SyntaxError::new("/ may appear only once", sp));
                    }
                    if seen_star {
                        return Err(SyntaxError::new("/ must be ahead of *", sp));
                    }
                    if params.args.is_empty() {
                        return Err(SyntaxError::new("at least one argument must precede /", sp));
                    }
                    self.advance();
                    params.posonly = std::mem::take(&mut params.args);
                    seen_slash = true;
                }
                Token::Star => {
                    let sp = self.advance();
                    if seen_star {
                        return Err(SyntaxError::new("* argument may appear only once", sp));
                    }
                    seen_star = true;
                    if matches!(self.peek(), Token::Name(_)) {
                        params.vararg = Some(self.parse_param(annotations)?);
                    } else {
                        bare_star = Some(sp);
                    }
                }
                Token::DoubleStar => {
                    self.advance();
                    params.kwarg = Some(self.parse_param(annotations)?);
                    self.eat(&Token::Comma);
                    if self.peek() != closing {
                        return Err(SyntaxError::new(
                            "arguments cannot follow var-keyword argument",
                            self.span(),
                        ));
                    }
                    break;
                }
                _ => {
                    let param = self.parse_param(annotations)?;
                    let default = if self.eat(&Token::Eq) {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    if seen_star {
                        params.kwonly.push(param);
                        params.kw_defaults.push(default);
                    } else {
                        match default {
                            Some(d) => params.defaults.push(d),
                            None if !params.defaults.is_empty() => {
                                return Err(SyntaxError::new(
                                    "non-default argument follows default argument",
                                    param.span,
                                ));
                            }
                            None => {}
                        }
                        params.args.push(param);
                    }
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        if let Some(sp) = bare_star {
            if params.kwonly.is_empty() {
                return Err(SyntaxError::new("named arguments must follow bare *", sp));
            }
        }
        Ok(params)
    }

    fn parse_param(&mut self, annotations: bool) -> PResult<Param> {
        let (name, sp) = self.expect_name()?;
        let annotation = if annotations && self.eat(&Token::Colon) {
            Some(self.parse_test()?)
        } else {
            None
        };
        Ok(Param {
            name,
            annotation,
            span: self.finish(sp.start),
        })
    }

    fn parse_class_def(&mut self, decorators: Vec<Expr>) -> PResult<Stmt> {
        let start = self.expect(&Token::Class)?.start;
        let (name, _) = self.expect_name()?;
        let (bases, keywords) = if self.eat(&Token::LParen) {
            self.parse_call_args()?
        } else {
            (Vec::new(), Vec::new())
        };
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::ClassDef(ClassDef {
                name,
                decorators,
                bases,
                keywords,
                body,
            }),
            span: self.finish(start),
        })
    }

    /// `if` and `elif` share this; an `elif` becomes a nested `If` in
    /// `orelse`.
    fn parse_if(&mut self) -> PResult<Stmt> {
        let start = self.advance().start;
        let test = self.parse_named_expr()?;
        let body = self.parse_block()?;
        let orelse = match self.peek() {
            Token::Elif => vec![self.nested(Self::parse_if)?],
            Token::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            span: self.finish(start),
        })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let start = self.advance().start;
        let test = self.parse_named_expr()?;
        let body = self.parse_block()?;
        let orelse = if self.eat(&Token::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::While { test, body, orelse },
            span: self.finish(start),
        })
    }

    fn parse_for(&mut self, async_start: Option<usize>) -> PResult<Stmt> {
        let for_span = self.expect(&Token::For)?;
        let start = async_start.unwrap_or(for_span.start);
        let target = self.parse_target_list()?;
        self.expect(&Token::In)?;
        let iter = self.parse_star_expressions()?;
        let body = self.parse_block()?;
        let orelse = if self.eat(&Token::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::For {
                is_async: async_start.is_some(),
                target,
                iter,
                body,
                orelse,
            },
            span: self.finish(start),
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let start = self.advance().start;
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        let mut is_star = false;
        while self.check(&Token::Except) {
            let handler_start = self.advance().start;
            if self.eat(&Token::Star) {
                is_star = true;
            }
            let (type_, name) = if self.check(&Token::Colon) {
                (None, None)
            } else {
                let type_ = self.parse_test()?;
                if self.check(&Token::Comma) {
                    return Err(SyntaxError::new(
                        "multiple exception types must be parenthesized",
                        type_.span,
                    ));
                }
                let name = if self.eat(&Token::As) {
                    Some(self.expect_name()?.0)
                } else {
                    None
                };
                (Some(type_), name)
            };
            let handler_body = self.parse_block()?;
            handlers.push(ExceptHandler {
                type_,
                name,
                body: handler_body,
                span: self.finish(handler_start),
            });
        }

        let orelse = if !handlers.is_empty() && self.eat(&Token::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let has_finally = self.eat(&Token::Finally);
        let finalbody = if has_finally {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && !has_finally {
            return Err(SyntaxError::new(
                "expected 'except' or 'finally' block",
                self.span(),
            ));
        }

        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
            },
            span: self.finish(start),
        })
    }

    fn parse_with(&mut self, async_start: Option<usize>) -> PResult<Stmt> {
        let with_span = self.expect(&Token::With)?;
        let start = async_start.unwrap_or(with_span.start);

        let items = if self.check(&Token::LParen) {
            let saved = self.save();
            match self.parse_parenthesized_with_items() {
                Ok(items) if self.check(&Token::Colon) => items,
                _ => {
                    self.restore(saved);
                    self.parse_with_items()?
                }
            }
        } else {
            self.parse_with_items()?
        };

        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::With {
                is_async: async_start.is_some(),
                items,
                body,
            },
            span: self.finish(start),
        })
    }

    fn parse_parenthesized_with_items(&mut self) -> PResult<Vec<WithItem>> {
        self.expect(&Token::LParen)?;
        let mut items = Vec::new();
        while !self.check(&Token::RParen) {
            items.push(self.parse_with_item()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(items)
    }

    fn parse_with_items(&mut self) -> PResult<Vec<WithItem>> {
        let mut items = vec![self.parse_with_item()?];
        while self.eat(&Token::Comma) {
            items.push(self.parse_with_item()?);
        }
        Ok(items)
    }

    fn parse_with_item(&mut self) -> PResult<WithItem> {
        let context = self.parse_test()?;
        let optional_vars = if self.eat(&Token::As) {
            let target = self.parse_star_target_item()?;
            Some(set_context(target, ExprContext::Store)?)
        } else {
            None
        };
        Ok(WithItem {
            context,
            optional_vars,
        })
    }

    // ── match ──────────────────────────────────────────────────────

    /// `match` is a soft keyword: only commit when the header parses as
    /// `match <subject>: NEWLINE`.
    fn try_parse_match(&mut self) -> PResult<Option<Stmt>> {
        let saved = self.save();
        let start = self.advance().start;
        let subject = match self.parse_match_subject() {
            Ok(subject)
                if self.check(&Token::Colon) && matches!(self.peek_at(1), Token::Newline) =>
            {
                subject
            }
            _ => {
                self.restore(saved);
                return Ok(None);
            }
        };
        self.advance();
        self.advance();
        if !self.eat(&Token::Indent) {
            return Err(SyntaxError::new("expected an indented block", self.span()));
        }

        let mut cases = Vec::new();
        while self.is_soft_keyword("case") {
            cases.push(self.parse_case()?);
        }
        if cases.is_empty() {
            return Err(SyntaxError::new("expected 'case' block", self.span()));
        }
        if !self.eat(&Token::Dedent) && !self.at_eof() {
            return Err(self.unexpected());
        }
        Ok(Some(Stmt {
            kind: StmtKind::Match { subject, cases },
            span: self.finish(start),
        }))
    }

    fn parse_match_subject(&mut self) -> PResult<Expr> {
        let start = self.start();
        let first = self.parse_star_named_item()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::Colon) {
                break;
            }
            elts.push(self.parse_star_named_item()?);
        }
        Ok(Expr::new(
            ExprKind::Tuple {
                elts,
                ctx: ExprContext::Load,
            },
            self.finish(start),
        ))
    }

    fn parse_case(&mut self) -> PResult<MatchCase> {
        let start = self.advance().start;
        let pattern = self.parse_open_patterns()?;
        let guard = if self.eat(&Token::If) {
            Some(self.parse_named_expr()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(MatchCase {
            pattern,
            guard,
            body,
            span: self.finish(start),
        })
    }

    fn parse_open_patterns(&mut self) -> PResult<Pattern> {
        let first = self.parse_maybe_star_pattern()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut patterns = vec![first];
        while self.eat(&Token::Comma) {
            if matches!(self.peek(), Token::Colon | Token::If) {
                break;
            }
            patterns.push(self.parse_maybe_star_pattern()?);
        }
        Ok(Pattern::Sequence(patterns))
    }

    fn parse_maybe_star_pattern(&mut self) -> PResult<Pattern> {
        if self.eat(&Token::Star) {
            let (name, _) = self.expect_name()?;
            return Ok(Pattern::Star((name != "_").then_some(name)));
        }
        self.parse_as_pattern()
    }

    fn parse_as_pattern(&mut self) -> PResult<Pattern> {
        let pattern = self.parse_or_pattern()?;
        if self.eat(&Token::As) {
            let (name, _) = self.expect_name()?;
            return Ok(Pattern::As {
                pattern: Some(Box::new(pattern)),
                name: Some(name),
            });
        }
        Ok(pattern)
    }

    fn parse_or_pattern(&mut self) -> PResult<Pattern> {
        let first = self.parse_closed_pattern()?;
        if !self.check(&Token::Pipe) {
            return Ok(first);
        }
        let mut alternatives = vec![first];
        while self.eat(&Token::Pipe) {
            alternatives.push(self.parse_closed_pattern()?);
        }
        Ok(Pattern::Or(alternatives))
    }

    fn parse_closed_pattern(&mut self) -> PResult<Pattern> {
        match self.peek().clone() {
            Token::None => {
                self.advance();
                Ok(Pattern::Singleton(Constant::None))
            }
            Token::True => {
                self.advance();
                Ok(Pattern::Singleton(Constant::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Pattern::Singleton(Constant::Bool(false)))
            }
            Token::Minus | Token::Int(_) | Token::Float(_) | Token::Imaginary(_) => {
                Ok(Pattern::Value(self.parse_arith()?))
            }
            Token::Str(_) => Ok(Pattern::Value(self.parse_strings()?)),
            Token::Name(name) => {
                let expr = self.parse_dotted_value()?;
                if self.check(&Token::LParen) {
                    return self.parse_class_pattern(expr);
                }
                match expr.kind {
                    ExprKind::Name { .. } if name == "_" => Ok(Pattern::As {
                        pattern: None,
                        name: None,
                    }),
                    ExprKind::Name { .. } => Ok(Pattern::As {
                        pattern: None,
                        name: Some(name),
                    }),
                    _ => Ok(Pattern::Value(expr)),
                }
            }
            Token::LParen => {
                self.advance();
                if self.eat(&Token::RParen) {
                    return Ok(Pattern::Sequence(Vec::new()));
                }
                let first = self.parse_maybe_star_pattern()?;
                if !self.check(&Token::Comma) {
                    self.expect(&Token::RParen)?;
                    return Ok(first);
                }
                let mut patterns = vec![first];
                while self.eat(&Token::Comma) {
                    if self.check(&Token::RParen) {
                        break;
                    }
                    patterns.push(self.parse_maybe_star_pattern()?);
                }
                self.expect(&Token::RParen)?;
                Ok(Pattern::Sequence(patterns))
            }
            Token::LBracket => {
                self.advance();
                let mut patterns = Vec::new();
                while !self.check(&Token::RBracket) {
                    patterns.push(self.parse_maybe_star_pattern()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Pattern::Sequence(patterns))
            }
            Token::LBrace => self.parse_mapping_pattern(),
            _ => Err(self.unexpected()),
        }
    }

    /// `name` or `a.b.c` as a load expression.
    fn parse_dotted_value(&mut self) -> PResult<Expr> {
        let (id, sp) = self.expect_name()?;
        let mut expr = Expr::new(
            ExprKind::Name {
                id,
                ctx: ExprContext::Load,
            },
            sp,
        );
        while self.eat(&Token::Dot) {
            let (attr, _) = self.expect_name()?;
            expr = Expr::new(
                ExprKind::Attribute {
                    value: Box::new(expr),
                    attr,
                    ctx: ExprContext::Load,
                },
                self.finish(sp.start),
            );
        }
        Ok(expr)
    }

    fn parse_class_pattern(&mut self, cls: Expr) -> PResult<Pattern> {
        self.expect(&Token::LParen)?;
        let mut patterns = Vec::new();
        let mut kwd_attrs = Vec::new();
        let mut kwd_patterns = Vec::new();
        while !self.check(&Token::RParen) {
            if matches!(self.peek(), Token::Name(_)) && matches!(self.peek_at(1), Token::Eq) {
                let (attr, _) = self.expect_name()?;
                self.advance();
                kwd_attrs.push(attr);
                kwd_patterns.push(self.parse_as_pattern()?);
            } else {
                if !kwd_attrs.is_empty() {
                    return Err(SyntaxError::new(
                        "positional patterns follow keyword patterns",
                        self.span(),
                    ));
                }
                patterns.push(self.parse_as_pattern()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(Pattern::Class {
            cls,
            patterns,
            kwd_attrs,
            kwd_patterns,
        })
    }

    fn parse_mapping_pattern(&mut self) -> PResult<Pattern> {
        self.expect(&Token::LBrace)?;
        let mut keys = Vec::new();
        let mut patterns = Vec::new();
        let mut rest = None;
        while !self.check(&Token::RBrace) {
            if self.eat(&Token::DoubleStar) {
                rest = Some(self.expect_name()?.0);
                self.eat(&Token::Comma);
                break;
            }
            let key = match self.peek() {
                Token::Name(_) => self.parse_dotted_value()?,
                Token::Str(_) => self.parse_strings()?,
                Token::None | Token::True | Token::False => self.parse_atom()?,
                _ => self.parse_arith()?,
            };
            self.expect(&Token::Colon)?;
            keys.push(key);
            patterns.push(self.parse_as_pattern()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Pattern::Mapping {
            keys,
            patterns,
            rest,
        })
    }

    // ── Simple statements ──────────────────────────────────────────

    fn at_simple_end(&self) -> bool {
        matches!(self.peek(), Token::Newline | Token::Semi | Token::Eof)
    }

    fn parse_simple_statement(&mut self) -> PResult<Stmt> {
        let start = self.start();
        let kind = match self.peek() {
            Token::Pass => {
                self.advance();
                StmtKind::Pass
            }
            Token::Break => {
                self.advance();
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                StmtKind::Continue
            }
            Token::Return => {
                self.advance();
                let value = if self.at_simple_end() {
                    None
                } else {
                    Some(self.parse_star_expressions()?)
                };
                StmtKind::Return(value)
            }
            Token::Raise => {
                self.advance();
                let (exc, cause) = if self.at_simple_end() {
                    (None, None)
                } else {
                    let exc = self.parse_test()?;
                    let cause = if self.eat(&Token::From) {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    (Some(exc), cause)
                };
                StmtKind::Raise { exc, cause }
            }
            Token::Global => {
                self.advance();
                StmtKind::Global(self.parse_name_list()?)
            }
            Token::Nonlocal => {
                self.advance();
                StmtKind::Nonlocal(self.parse_name_list()?)
            }
            Token::Del => {
                self.advance();
                StmtKind::Delete(self.parse_del_targets()?)
            }
            Token::Assert => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat(&Token::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Token::Import => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    let name = self.parse_dotted_name()?;
                    let asname = if self.eat(&Token::As) {
                        Some(self.expect_name()?.0)
                    } else {
                        None
                    };
                    names.push(Alias { name, asname });
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                StmtKind::Import(names)
            }
            Token::From => self.parse_import_from()?,
            _ => return self.parse_expression_statement(),
        };
        Ok(Stmt {
            kind,
            span: self.finish(start),
        })
    }

    fn parse_name_list(&mut self) -> PResult<Vec<String>> {
        let mut names = vec![self.expect_name()?.0];
        while self.eat(&Token::Comma) {
            names.push(self.expect_name()?.0);
        }
        Ok(names)
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?.0;
        while self.eat(&Token::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?.0);
        }
        Ok(name)
    }

    fn parse_import_from(&mut self) -> PResult<StmtKind> {
        self.advance();
        let mut level = 0;
        loop {
            match self.peek() {
                Token::Dot => level += 1,
                Token::Ellipsis => level += 3,
                _ => break,
            }
            self.advance();
        }
        let module = if self.check(&Token::Import) {
            if level == 0 {
                return Err(self.unexpected());
            }
            None
        } else {
            Some(self.parse_dotted_name()?)
        };
        self.expect(&Token::Import)?;

        let names = if self.eat(&Token::Star) {
            vec![Alias {
                name: "*".to_string(),
                asname: None,
            }]
        } else if self.eat(&Token::LParen) {
            let names = self.parse_import_aliases(true)?;
            self.expect(&Token::RParen)?;
            names
        } else {
            self.parse_import_aliases(false)?
        };
        Ok(StmtKind::ImportFrom {
            module,
            names,
            level,
        })
    }

    fn parse_import_aliases(&mut self, parenthesized: bool) -> PResult<Vec<Alias>> {
        let mut names = Vec::new();
        loop {
            let (name, _) = self.expect_name()?;
            let asname = if self.eat(&Token::As) {
                Some(self.expect_name()?.0)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat(&Token::Comma) {
                break;
            }
            if parenthesized && self.check(&Token::RParen) {
                break;
            }
        }
        Ok(names)
    }

    fn parse_del_targets(&mut self) -> PResult<Vec<Expr>> {
        let mut targets = Vec::new();
        loop {
            let target = self.parse_bitor()?;
            targets.push(set_context(target, ExprContext::Del)?);
            if !self.eat(&Token::Comma) || self.at_simple_end() {
                break;
            }
        }
        Ok(targets)
    }

    /// Expression statement or any assignment form.
    fn parse_expression_statement(&mut self) -> PResult<Stmt> {
        let start = self.start();
        let first = self.parse_star_expressions_or_yield()?;
        let kind = match self.peek().clone() {
            Token::Colon => {
                self.advance();
                let target = annotated_target(first)?;
                let annotation = self.parse_test()?;
                let value = if self.eat(&Token::Eq) {
                    Some(self.parse_star_expressions_or_yield()?)
                } else {
                    None
                };
                StmtKind::AnnAssign {
                    target,
                    annotation,
                    value,
                }
            }
            Token::AugAssign(op) => {
                self.advance();
                let target = augmented_target(first)?;
                let value = self.parse_star_expressions_or_yield()?;
                StmtKind::AugAssign { target, op, value }
            }
            Token::Eq => {
                let mut exprs = vec![first];
                while self.eat(&Token::Eq) {
                    exprs.push(self.parse_star_expressions_or_yield()?);
                }
                let Some(value) = exprs.pop() else {
                    return Err(self.unexpected());
                };
                let targets = exprs
                    .into_iter()
                    .map(|t| set_context(t, ExprContext::Store))
                    .collect::<PResult<Vec<_>>>()?;
                StmtKind::Assign { targets, value }
            }
            _ => StmtKind::Expr(first),
        };
        Ok(Stmt {
            kind,
            span: self.finish(start),
        })
    }

    // ── Expressions ────────────────────────────────────────────────

    fn parse_star_expressions_or_yield(&mut self) -> PResult<Expr> {
        if self.check(&Token::Yield) {
            self.parse_yield()
        } else {
            self.parse_star_expressions()
        }
    }

    /// `a, *b, c` (tuple when a comma is present).
    fn parse_star_expressions(&mut self) -> PResult<Expr> {
        let start = self.start();
        let first = self.parse_star_expression()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if !self.starts_expression() {
                break;
            }
            elts.push(self.parse_star_expression()?);
        }
        Ok(Expr::new(
            ExprKind::Tuple {
                elts,
                ctx: ExprContext::Load,
            },
            self.finish(start),
        ))
    }

    fn parse_star_expression(&mut self) -> PResult<Expr> {
        if self.check(&Token::Star) {
            return self.parse_starred();
        }
        self.parse_test()
    }

    fn parse_starred(&mut self) -> PResult<Expr> {
        let start = self.advance().start;
        let value = self.parse_bitor()?;
        Ok(Expr::new(
            ExprKind::Starred {
                value: Box::new(value),
                ctx: ExprContext::Load,
            },
            self.finish(start),
        ))
    }

    fn parse_star_named_item(&mut self) -> PResult<Expr> {
        if self.check(&Token::Star) {
            return self.parse_starred();
        }
        self.parse_named_expr()
    }

    fn parse_star_target_item(&mut self) -> PResult<Expr> {
        if self.check(&Token::Star) {
            return self.parse_starred();
        }
        self.parse_bitor()
    }

    /// Loop targets: `x`, `a, b`, `(a, *rest)`.
    fn parse_target_list(&mut self) -> PResult<Expr> {
        let start = self.start();
        let first = self.parse_star_target_item()?;
        if !self.check(&Token::Comma) {
            return set_context(first, ExprContext::Store);
        }
        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if matches!(self.peek(), Token::In | Token::Eq) {
                break;
            }
            elts.push(self.parse_star_target_item()?);
        }
        let tuple = Expr::new(
            ExprKind::Tuple {
                elts,
                ctx: ExprContext::Load,
            },
            self.finish(start),
        );
        set_context(tuple, ExprContext::Store)
    }

    fn parse_named_expr(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), Token::Name(_)) && matches!(self.peek_at(1), Token::ColonEq) {
            let (id, sp) = self.expect_name()?;
            self.advance();
            let value = self.parse_test()?;
            let target = Expr::new(
                ExprKind::Name {
                    id,
                    ctx: ExprContext::Store,
                },
                sp,
            );
            return Ok(Expr::new(
                ExprKind::NamedExpr {
                    target: Box::new(target),
                    value: Box::new(value),
                },
                self.finish(sp.start),
            ));
        }
        self.parse_test()
    }

    /// `expression`: lambda, or disjunction with an optional conditional.
    fn parse_test(&mut self) -> PResult<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        if self.check(&Token::Lambda) {
            return self.parse_lambda();
        }
        let start = self.start();
        let body = self.parse_or()?;
        if self.eat(&Token::If) {
            let test = self.parse_or()?;
            self.expect(&Token::Else)?;
            let orelse = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                self.finish(start),
            ));
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let start = self.advance().start;
        let params = self.parse_parameters(&Token::Colon, false)?;
        self.expect(&Token::Colon)?;
        let body = self.parse_test()?;
        Ok(Expr::new(
            ExprKind::Lambda {
                params: Box::new(params),
                body: Box::new(body),
            },
            self.finish(start),
        ))
    }

    fn parse_yield(&mut self) -> PResult<Expr> {
        let start = self.advance().start;
        if self.eat(&Token::From) {
            let value = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::YieldFrom(Box::new(value)),
                self.finish(start),
            ));
        }
        let value = if self.starts_expression() {
            Some(Box::new(self.parse_star_expressions()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Yield(value), self.finish(start)))
    }

    fn parse_bool_level(
        &mut self,
        token: &Token,
        op: BoolOp,
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let start = self.start();
        let first = next(self)?;
        if !self.check(token) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(token) {
            values.push(next(self)?);
        }
        Ok(Expr::new(ExprKind::BoolOp { op, values }, self.finish(start)))
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        self.parse_bool_level(&Token::Or, BoolOp::Or, Self::parse_and)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        self.parse_bool_level(&Token::And, BoolOp::And, Self::parse_not)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.check(&Token::Not) {
            let start = self.advance().start;
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                self.finish(start),
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let start = self.start();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek() {
                Token::Lt => CmpOp::Lt,
                Token::Gt => CmpOp::Gt,
                Token::EqEq => CmpOp::Eq,
                Token::Ge => CmpOp::GtE,
                Token::Le => CmpOp::LtE,
                Token::NotEq => CmpOp::NotEq,
                Token::In => CmpOp::In,
                Token::Not if matches!(self.peek_at(1), Token::In) => {
                    self.advance();
                    CmpOp::NotIn
                }
                Token::Is if matches!(self.peek_at(1), Token::Not) => {
                    self.advance();
                    CmpOp::IsNot
                }
                Token::Is => CmpOp::Is,
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            self.finish(start),
        ))
    }

    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        op_for: fn(&Token) -> Option<Operator>,
    ) -> PResult<Expr> {
        let start = self.start();
        let mut left = next(self)?;
        let mut links = 0;
        while let Some(op) = op_for(self.peek()) {
            links += 1;
            self.check_chain(links)?;
            self.advance();
            let right = next(self)?;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                self.finish(start),
            );
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_bitxor, |t| {
            matches!(t, Token::Pipe).then_some(Operator::BitOr)
        })
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_bitand, |t| {
            matches!(t, Token::Caret).then_some(Operator::BitXor)
        })
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_shift, |t| {
            matches!(t, Token::Amper).then_some(Operator::BitAnd)
        })
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_arith, |t| match t {
            Token::LShift => Some(Operator::LShift),
            Token::RShift => Some(Operator::RShift),
            _ => None,
        })
    }

    fn parse_arith(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_term, |t| match t {
            Token::Plus => Some(Operator::Add),
            Token::Minus => Some(Operator::Sub),
            _ => None,
        })
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_factor, |t| match t {
            Token::Star => Some(Operator::Mult),
            Token::Slash => Some(Operator::Div),
            Token::DoubleSlash => Some(Operator::FloorDiv),
            Token::Percent => Some(Operator::Mod),
            Token::At => Some(Operator::MatMult),
            _ => None,
        })
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Token::Plus => UnaryOp::UAdd,
            Token::Minus => UnaryOp::USub,
            Token::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let start = self.advance().start;
        let operand = self.nested(Self::parse_factor)?;
        Ok(Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            self.finish(start),
        ))
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let start = self.start();
        let base = self.parse_await_primary()?;
        if self.eat(&Token::DoubleStar) {
            let exponent = self.nested(Self::parse_factor)?;
            return Ok(Expr::new(
                ExprKind::BinOp {
                    left: Box::new(base),
                    op: Operator::Pow,
                    right: Box::new(exponent),
                },
                self.finish(start),
            ));
        }
        Ok(base)
    }

    fn parse_await_primary(&mut self) -> PResult<Expr> {
        if self.check(&Token::Await) {
            let start = self.advance().start;
            let value = self.parse_primary()?;
            return Ok(Expr::new(
                ExprKind::Await(Box::new(value)),
                self.finish(start),
            ));
        }
        self.parse_primary()
    }

    /// Atom followed by any number of `.name`, `(args)` and `[slices]`.
    fn parse_primary(&mut self) -> PResult<Expr> {
        let start = self.start();
        let mut expr = self.parse_atom()?;
        let mut links = 0;
        loop {
            if matches!(self.peek(), Token::Dot | Token::LParen | Token::LBracket) {
                links += 1;
                self.check_chain(links)?;
            }
            let kind = match self.peek() {
                Token::Dot => {
                    self.advance();
                    let (attr, _) = self.expect_name()?;
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                        ctx: ExprContext::Load,
                    }
                }
                Token::LParen => {
                    self.advance();
                    let (args, keywords) = self.parse_call_args()?;
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let slice = self.parse_slices()?;
                    self.expect(&Token::RBracket)?;
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        slice: Box::new(slice),
                        ctx: ExprContext::Load,
                    }
                }
                _ => break,
            };
            expr = Expr::new(kind, self.finish(start));
        }
        Ok(expr)
    }

    /// Arguments after `(` up to and including `)`.
    fn parse_call_args(&mut self) -> PResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !self.check(&Token::RParen) {
            let start = self.start();
            match self.peek() {
                Token::Star => {
                    self.advance();
                    let value = self.parse_test()?;
                    args.push(Expr::new(
                        ExprKind::Starred {
                            value: Box::new(value),
                            ctx: ExprContext::Load,
                        },
                        self.finish(start),
                    ));
                }
                Token::DoubleStar => {
                    self.advance();
                    let value = self.parse_test()?;
                    keywords.push(Keyword {
                        arg: None,
                        value,
                        span: self.finish(start),
                    });
                }
                Token::Name(_) if matches!(self.peek_at(1), Token::Eq) => {
                    let (name, _) = self.expect_name()?;
                    self.advance();
                    let value = self.parse_test()?;
                    keywords.push(Keyword {
                        arg: Some(name),
                        value,
                        span: self.finish(start),
                    });
                }
                _ => {
                    let value = self.parse_named_expr()?;
                    if self.is_comprehension_start() {
                        let generators = self.parse_comprehensions()?;
                        let span = self.finish(start);
                        if !args.is_empty() || !keywords.is_empty() || !self.check(&Token::RParen) {
                            return Err(SyntaxError::new(
                                "Generator expression must be parenthesized",
                                span,
                            ));
                        }
                        args.push(Expr::new(
                            ExprKind::GeneratorExp {
                                elt: Box::new(value),
                                generators,
                            },
                            span,
                        ));
                        continue;
                    }
                    if !keywords.is_empty() {
                        let message = if keywords.iter().any(|k| k.arg.is_none()) {
                            "positional argument follows keyword argument unpacking"
                        } else {
                            "positional argument follows keyword argument"
                        };
                        return Err(SyntaxError::new(message, value.span));
                    }
                    args.push(value);
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok((args, keywords))
    }

    fn parse_slices(&mut self) -> PResult<Expr> {
        let start = self.start();
        let first = self.parse_slice_item()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RBracket) {
                break;
            }
            elts.push(self.parse_slice_item()?);
        }
        Ok(Expr::new(
            ExprKind::Tuple {
                elts,
                ctx: ExprContext::Load,
            },
            self.finish(start),
        ))
    }

    fn parse_slice_item(&mut self) -> PResult<Expr> {
        let start = self.start();
        if self.check(&Token::Star) {
            return self.parse_starred();
        }
        let lower = if self.check(&Token::Colon) {
            None
        } else {
            let expr = self.parse_named_expr()?;
            if !self.check(&Token::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect(&Token::Colon)?;
        let bound_ends = |p: &Self| matches!(p.peek(), Token::Colon | Token::Comma | Token::RBracket);
        let upper = if bound_ends(self) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat(&Token::Colon) && !bound_ends(self) {
            Some(Box::new(self.parse_test()?))
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice { lower, upper, step },
            self.finish(start),
        ))
    }

    fn parse_comprehensions(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.is_comprehension_start() {
            let is_async = self.eat(&Token::Async);
            self.expect(&Token::For)?;
            let target = self.parse_target_list()?;
            self.expect(&Token::In)?;
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.eat(&Token::If) {
                ifs.push(self.parse_or()?);
            }
            generators.push(Comprehension {
                target,
                iter,
                ifs,
                is_async,
            });
        }
        Ok(generators)
    }

    // ── Atoms ──────────────────────────────────────────────────────

    fn parse_atom(&mut self) -> PResult<Expr> {
        let start = self.start();
        let kind = match self.peek().clone() {
            Token::Name(id) => ExprKind::Name {
                id,
                ctx: ExprContext::Load,
            },
            Token::True => ExprKind::Constant(Constant::Bool(true)),
            Token::False => ExprKind::Constant(Constant::Bool(false)),
            Token::None => ExprKind::Constant(Constant::None),
            Token::Ellipsis => ExprKind::Constant(Constant::Ellipsis),
            Token::Int(raw) => ExprKind::Constant(Constant::Int(raw)),
            Token::Float(raw) => ExprKind::Constant(Constant::Float(raw)),
            Token::Imaginary(raw) => ExprKind::Constant(Constant::Complex(raw)),
            Token::Str(_) => return self.parse_strings(),
            Token::LParen => return self.parse_paren(),
            Token::LBracket => return self.parse_list(),
            Token::LBrace => return self.parse_brace(),
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(Expr::new(kind, self.finish(start)))
    }

    /// One or more adjacent string literals (implicit concatenation).
    fn parse_strings(&mut self) -> PResult<Expr> {
        let start = self.start();
        let mut pieces: Vec<StrToken> = Vec::new();
        while let Token::Str(piece) = self.peek() {
            pieces.push(piece.clone());
            self.advance();
        }
        let span = self.finish(start);
        let raw = pieces
            .iter()
            .map(|p| p.raw.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let bytes = pieces.iter().filter(|p| p.kind == StrKind::Bytes).count();
        if bytes > 0 && bytes < pieces.len() {
            return Err(SyntaxError::new("cannot mix bytes and nonbytes literals", span));
        }
        if bytes > 0 {
            return Ok(Expr::new(ExprKind::Constant(Constant::Bytes { raw }), span));
        }

        if pieces.iter().any(|p| p.kind == StrKind::FString) {
            let mut values = Vec::new();
            for piece in pieces.iter().filter(|p| p.kind == StrKind::FString) {
                for (text, offset) in strings::fstring_fields(&piece.value, piece.body_start)? {
                    values.push(parse_expression_at(&text, offset, self.depth)?);
                }
            }
            return Ok(Expr::new(ExprKind::FString { raw, values }, span));
        }

        let value: String = pieces.iter().map(|p| p.value.as_str()).collect();
        Ok(Expr::new(
            ExprKind::Constant(Constant::Str { value, raw }),
            span,
        ))
    }

    fn parse_paren(&mut self) -> PResult<Expr> {
        let start = self.advance().start;
        if self.eat(&Token::RParen) {
            return Ok(Expr::new(
                ExprKind::Tuple {
                    elts: Vec::new(),
                    ctx: ExprContext::Load,
                },
                self.finish(start),
            ));
        }
        if self.check(&Token::Yield) {
            let expr = self.parse_yield()?;
            self.expect(&Token::RParen)?;
            return Ok(expr);
        }

        let first = self.parse_star_named_item()?;
        if self.is_comprehension_start() {
            let generators = self.parse_comprehensions()?;
            self.expect(&Token::RParen)?;
            return Ok(Expr::new(
                ExprKind::GeneratorExp {
                    elt: Box::new(first),
                    generators,
                },
                self.finish(start),
            ));
        }
        if !self.check(&Token::Comma) {
            self.expect(&Token::RParen)?;
            return Ok(first);
        }

        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RParen) {
                break;
            }
            elts.push(self.parse_star_named_item()?);
        }
        self.expect(&Token::RParen)?;
        Ok(Expr::new(
            ExprKind::Tuple {
                elts,
                ctx: ExprContext::Load,
            },
            self.finish(start),
        ))
    }

    fn parse_list(&mut self) -> PResult<Expr> {
        let start = self.advance().start;
        let mut elts = Vec::new();
        if !self.check(&Token::RBracket) {
            let first = self.parse_star_named_item()?;
            if self.is_comprehension_start() {
                let generators = self.parse_comprehensions()?;
                self.expect(&Token::RBracket)?;
                return Ok(Expr::new(
                    ExprKind::ListComp {
                        elt: Box::new(first),
                        generators,
                    },
                    self.finish(start),
                ));
            }
            elts.push(first);
            while self.eat(&Token::Comma) {
                if self.check(&Token::RBracket) {
                    break;
                }
                elts.push(self.parse_star_named_item()?);
            }
        }
        self.expect(&Token::RBracket)?;
        Ok(Expr::new(
            ExprKind::List {
                elts,
                ctx: ExprContext::Load,
            },
            self.finish(start),
        ))
    }

    /// `{}` dict, set, or their comprehensions.
    fn parse_brace(&mut self) -> PResult<Expr> {
        let start = self.advance().start;
        if self.eat(&Token::RBrace) {
            return Ok(Expr::new(
                ExprKind::Dict {
                    keys: Vec::new(),
                    values: Vec::new(),
                },
                self.finish(start),
            ));
        }
        if self.eat(&Token::DoubleStar) {
            let value = self.parse_bitor()?;
            return self.finish_dict(start, None, value);
        }

        let first = self.parse_star_named_item()?;
        if self.eat(&Token::Colon) {
            let value = self.parse_test()?;
            if self.is_comprehension_start() {
                let generators = self.parse_comprehensions()?;
                self.expect(&Token::RBrace)?;
                return Ok(Expr::new(
                    ExprKind::DictComp {
                        key: Box::new(first),
                        value: Box::new(value),
                        generators,
                    },
                    self.finish(start),
                ));
            }
            return self.finish_dict(start, Some(first), value);
        }

        if self.is_comprehension_start() {
            let generators = self.parse_comprehensions()?;
            self.expect(&Token::RBrace)?;
            return Ok(Expr::new(
                ExprKind::SetComp {
                    elt: Box::new(first),
                    generators,
                },
                self.finish(start),
            ));
        }
        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RBrace) {
                break;
            }
            elts.push(self.parse_star_named_item()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr::new(ExprKind::Set(elts), self.finish(start)))
    }

    fn finish_dict(&mut self, start: usize, key: Option<Expr>, value: Expr) -> PResult<Expr> {
        let mut keys = vec![key];
        let mut values = vec![value];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RBrace) {
                break;
            }
            if self.eat(&Token::DoubleStar) {
                keys.push(None);
                values.push(self.parse_bitor()?);
            } else {
                let key = self.parse_test()?;
                self.expect(&Token::Colon)?;
                keys.push(Some(key));
                values.push(self.parse_test()?);
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr::new(ExprKind::Dict { keys, values }, self.finish(start)))
    }
}

// ── Target validation ──────────────────────────────────────────────

/// Re-tag an expression as an assignment (`Store`) or deletion (`Del`)
/// target, rejecting anything that cannot be one.
fn set_context(expr: Expr, ctx: ExprContext) -> PResult<Expr> {
    let span = expr.span;
    let kind = match expr.kind {
        ExprKind::Name { id, .. } => ExprKind::Name { id, ctx },
        ExprKind::Attribute { value, attr, .. } => ExprKind::Attribute { value, attr, ctx },
        ExprKind::Subscript { value, slice, .. } => ExprKind::Subscript { value, slice, ctx },
        ExprKind::Starred { value, .. } if ctx == ExprContext::Store => ExprKind::Starred {
            value: Box::new(set_context(*value, ctx)?),
            ctx,
        },
        ExprKind::Tuple { elts, .. } => ExprKind::Tuple {
            elts: elts
                .into_iter()
                .map(|e| set_context(e, ctx))
                .collect::<PResult<_>>()?,
            ctx,
        },
        ExprKind::List { elts, .. } => ExprKind::List {
            elts: elts
                .into_iter()
                .map(|e| set_context(e, ctx))
                .collect::<PResult<_>>()?,
            ctx,
        },
        other => {
            let verb = if ctx == ExprContext::Del { "delete" } else { "assign to" };
            return Err(SyntaxError::new(
                format!("cannot {verb} {}", describe_expr(&other)),
                span,
            ));
        }
    };
    Ok(Expr::new(kind, span))
}

fn annotated_target(expr: Expr) -> PResult<Expr> {
    match &expr.kind {
        ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {
            set_context(expr, ExprContext::Store)
        }
        ExprKind::Tuple { .. } => Err(SyntaxError::new(
            "only single target (not tuple) can be annotated",
            expr.span,
        )),
        ExprKind::List { .. } => Err(SyntaxError::new(
            "only single target (not list) can be annotated",
            expr.span,
        )),
        _ => Err(SyntaxError::new("illegal target for annotation", expr.span)),
    }
}

fn augmented_target(expr: Expr) -> PResult<Expr> {
    match &expr.kind {
        ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {
            set_context(expr, ExprContext::Store)
        }
        other => Err(SyntaxError::new(
            format!(
                "'{}' is an illegal expression for augmented assignment",
                describe_expr(other)
            ),
            expr.span,
        )),
    }
}

fn describe_expr(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Call { .. } => "function call",
        ExprKind::Constant(_) => "literal",
        ExprKind::Compare { .. } => "comparison",
        ExprKind::Lambda { .. } => "lambda",
        ExprKind::NamedExpr { .. } => "named expression",
        ExprKind::Yield(_) | ExprKind::YieldFrom(_) => "yield expression",
        ExprKind::Await(_) => "await expression",
        ExprKind::ListComp { .. } => "list comprehension",
        ExprKind::SetComp { .. } => "set comprehension",
        ExprKind::DictComp { .. } => "dict comprehension",
        ExprKind::GeneratorExp { .. } => "generator expression",
        ExprKind::IfExp { .. } => "conditional expression",
        ExprKind::FString { .. } => "f-string expression",
        ExprKind::Dict { .. } => "dict literal",
        ExprKind::Set(_) => "set display",
        ExprKind::Starred { .. } => "starred",
        ExprKind::Tuple { .. } => "tuple",
        ExprKind::List { .. } => "list",
        _ => "expression",
    }
}

fn describe(token: &Token) -> String {
    let text = match token {
        Token::Colon => ":",
        Token::Comma => ",",
        Token::LParen => "(",
        Token::RParen => ")",
        Token::LBracket => "[",
        Token::RBracket => "]",
        Token::LBrace => "{",
        Token::RBrace => "}",
        Token::Eq => "=",
        Token::In => "in",
        Token::Import => "import",
        Token::Else => "else",
        Token::Def => "def",
        Token::For => "for",
        Token::With => "with",
        Token::Class => "class",
        Token::Newline => return "newline".to_string(),
        other => return format!("{other:?}"),
    };
    format!("'{text}'")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::super::parse_module;
    use super::*;

    fn parse_ok(src: &str) -> Module {
        parse_module(src).unwrap_or_else(|e| panic!("{}", e.format_with_source(src)))
    }

    fn first_stmt(src: &str) -> StmtKind {
        parse_ok(src).body.into_iter().next().unwrap().kind
    }

    fn func(src: &str) -> FunctionDef {
        match first_stmt(src) {
            StmtKind::FunctionDef(f) => f,
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn function_with_every_parameter_group() {
        let f = func("def f(a, /, b=1, *args, c, d=2, **kw) -> int:\n    ...\n");
        assert_eq!(f.params.posonly.len(), 1);
        assert_eq!(f.params.args.len(), 1);
        assert_eq!(f.params.defaults.len(), 1);
        assert_eq!(f.params.vararg.as_ref().unwrap().name, "args");
        assert_eq!(f.params.kwonly.len(), 2);
        assert!(f.params.kw_defaults[0].is_none());
        assert!(f.params.kw_defaults[1].is_some());
        assert_eq!(f.params.kwarg.as_ref().unwrap().name, "kw");
        assert!(f.returns.is_some());
    }

    #[test]
    fn annotations_on_parameters() {
        let f = func("def f(x: int, *rest: str, **opts: float): pass\n");
        assert!(f.params.args[0].annotation.is_some());
        assert!(f.params.vararg.unwrap().annotation.is_some());
        assert!(f.params.kwarg.unwrap().annotation.is_some());
    }

    #[test]
    fn non_default_after_default_is_rejected() {
        let err = parse_module("def f(a=1, b): pass\n").unwrap_err();
        assert!(err.message.contains("non-default"));
    }

    #[test]
    fn bare_star_needs_keyword_only() {
        assert!(parse_module("def f(a, *): pass\n").is_err());
    }

    #[test]
    fn decorators_and_async() {
        let f = func("@external\nasync def fetch(id: int) -> str:\n    ...\n");
        assert!(f.is_async);
        assert_eq!(f.decorators.len(), 1);
        let m = parse_ok("@a.b(1)\n@c\ndef g(): pass\n");
        let StmtKind::FunctionDef(g) = &m.body[0].kind else {
            panic!()
        };
        assert_eq!(g.decorators.len(), 2);
        // The statement starts at `def`, not at the first decorator.
        assert_eq!(m.body[0].span.start, "@a.b(1)\n@c\n".len());
    }

    #[test]
    fn chained_assignment_targets_are_stores() {
        let StmtKind::Assign { targets, .. } = first_stmt("a = b, c = 1, 2\n") else {
            panic!()
        };
        assert_eq!(targets.len(), 2);
        assert!(matches!(
            targets[0].kind,
            ExprKind::Name {
                ctx: ExprContext::Store,
                ..
            }
        ));
        assert!(matches!(targets[1].kind, ExprKind::Tuple { ctx: ExprContext::Store, .. }));
    }

    #[test]
    fn invalid_targets_are_rejected() {
        assert!(parse_module("f() = 1\n").unwrap_err().message.contains("function call"));
        assert!(parse_module("1 += 2\n").is_err());
        assert!(parse_module("a, b: int = 1\n").is_err());
        assert!(parse_module("del 1\n").is_err());
    }

    #[test]
    fn annotated_assignment() {
        let StmtKind::AnnAssign { target, value, .. } = first_stmt("budget: float = Input(\"budget\")\n")
        else {
            panic!()
        };
        assert!(matches!(target.kind, ExprKind::Name { .. }));
        assert!(matches!(value.unwrap().kind, ExprKind::Call { .. }));
    }

    #[test]
    fn elif_chain_nests() {
        let StmtKind::If { orelse, .. } = first_stmt("if a:\n    x\nelif b:\n    y\nelse:\n    z\n") else {
            panic!()
        };
        let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else {
            panic!()
        };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn match_is_a_soft_keyword() {
        let src = "match cmd:\n    case [x, *rest] if x:\n        pass\n    case {'k': v, **kw}:\n        pass\n    case Point(x=0) | None:\n        pass\n    case _:\n        pass\n";
        let StmtKind::Match { cases, .. } = first_stmt(src) else {
            panic!()
        };
        assert_eq!(cases.len(), 4);
        assert!(matches!(first_stmt("match = 3\n"), StmtKind::Assign { .. }));
        assert!(matches!(first_stmt("match(x)\n"), StmtKind::Expr(_)));
    }

    #[test]
    fn parenthesized_with_items() {
        let StmtKind::With { items, .. } = first_stmt("with (open(a) as f, open(b) as g):\n    pass\n") else {
            panic!()
        };
        assert_eq!(items.len(), 2);
        let StmtKind::With { items, .. } = first_stmt("with (a) as b:\n    pass\n") else {
            panic!()
        };
        assert_eq!(items.len(), 1);
        assert!(items[0].optional_vars.is_some());
    }

    #[test]
    fn try_forms() {
        let StmtKind::Try { handlers, finalbody, is_star, .. } =
            first_stmt("try:\n    x\nexcept* ValueError as e:\n    y\nfinally:\n    z\n")
        else {
            panic!()
        };
        assert!(is_star);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert_eq!(finalbody.len(), 1);
        assert!(parse_module("try:\n    x\n").is_err());
    }

    #[test]
    fn fstring_fields_are_parsed() {
        let StmtKind::Expr(expr) = first_stmt("f\"{a.b!r} and {c + 1:>{w}}\"\n") else {
            panic!()
        };
        let ExprKind::FString { values, .. } = expr.kind else {
            panic!()
        };
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn fstring_field_spans_are_absolute() {
        let src = "x = f'{total}'\n";
        let StmtKind::Assign { value, .. } = first_stmt(src) else {
            panic!()
        };
        let ExprKind::FString { values, .. } = value.kind else {
            panic!()
        };
        assert_eq!(&src[values[0].span.start..values[0].span.end], "total");
    }

    #[test]
    fn comprehensions_and_generators() {
        parse_ok("a = [x * 2 for x in xs if x]\nb = {k: v for k, v in d.items()}\nc = sum(x for x in xs)\nd = {y async for y in z}\n");
        assert!(parse_module("f(x for x in y, 1)\n").is_err());
    }

    #[test]
    fn lambda_walrus_and_conditional() {
        parse_ok("f = lambda x, *a, k=1, **kw: x if k else None\nif (n := len(a)) > 10:\n    pass\n");
    }

    #[test]
    fn imports() {
        let StmtKind::ImportFrom { module, names, level } = first_stmt("from ..pkg import (a as b, c,)\n") else {
            panic!()
        };
        assert_eq!(module.as_deref(), Some("pkg"));
        assert_eq!(level, 2);
        assert_eq!(names[0].asname.as_deref(), Some("b"));
        assert!(matches!(first_stmt("import os.path as p, sys\n"), StmtKind::Import(n) if n.len() == 2));
    }

    #[test]
    fn slices_and_subscripts() {
        parse_ok("a[1:2, ::3]\nb[x]\nc[:]\nd[*e]\n");
    }

    #[test]
    fn call_argument_order() {
        assert!(parse_module("f(a=1, b)\n").is_err());
        parse_ok("f(a, *b, c=1, **d)\n");
    }

    #[test]
    fn semicolons_split_statements() {
        assert_eq!(parse_ok("a = 1; b = 2;\n").body.len(), 2);
    }

    #[test]
    fn syntax_errors() {
        assert!(parse_module("def f(:\n").is_err());
        assert!(parse_module("if x\n    pass\n").unwrap_err().message.contains("':'"));
        assert!(parse_module("x = 1\n    y = 2\n").unwrap_err().message.contains("indent"));
        assert!(parse_module("def f():\nreturn 1\n").unwrap_err().message.contains("indented block"));
        assert!(parse_module("x = = 1\n").is_err());
    }

    #[test]
    fn type_parameter_syntax_is_rejected() {
        for src in ["type Alias = int\n", "def f[T](x: T) -> T:\n    return x\n", "class Box[T]:\n    pass\n"] {
            assert!(parse_module(src).is_err(), "{src}");
        }
    }

    #[test]
    fn long_elif_chains_are_bounded() {
        let chain = |n: usize| {
            let mut src = String::from("if a:\n    pass\n");
            for _ in 0..n {
                src.push_str("elif a:\n    pass\n");
            }
            src
        };
        assert!(parse_module(&chain(50)).is_ok());
        let err = parse_module(&chain(1000)).unwrap_err();
        assert_eq!(err.message, "code is too deeply nested");
    }

    #[test]
    fn statement_spans_cover_the_statement() {
        let src = "x = (1 +\n     2)\ny = 3\n";
        let m = parse_ok(src);
        assert_eq!(&src[m.body[0].span.start..m.body[0].span.end], "x = (1 +\n     2)");
        assert_eq!(m.body[1].span.start, src.find('y').unwrap());
    }

    #[test]
    fn implicit_string_concatenation() {
        let StmtKind::Expr(expr) = first_stmt("'a' \"b\"\n") else {
            panic!()
        };
        let ExprKind::Constant(Constant::Str { value, raw }) = expr.kind else {
            panic!()
        };
        assert_eq!(value, "ab");
        assert_eq!(raw, "'a' \"b\"");
        assert!(parse_module("'a' b'b'\n").is_err());
    }
}
