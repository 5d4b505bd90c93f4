use super::ast::{Operator, Span};
use super::strings;
use super::{SyntaxError, MAX_NESTING};

/// Tab stops used when measuring indentation.
const TAB_SIZE: usize = 8;
/// Deepest block nesting accepted.
const MAX_INDENT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Name(String),
    Int(String),
    Float(String),
    Imaginary(String),
    Str(StrToken),

    // Keywords
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Semi,
    Dot,
    Ellipsis,  // ...
    Arrow,     // ->
    At,        // @
    Eq,        // =
    ColonEq,   // :=

    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Amper,
    Pipe,
    Caret,
    Tilde,
    LShift,
    RShift,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    /// `+=`, `-=`, ... carrying the underlying operator.
    AugAssign(Operator),

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrKind {
    Str,
    Bytes,
    FString,
}

/// One string literal piece as written in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct StrToken {
    pub kind: StrKind,
    /// Exact source spelling including prefix and quotes.
    pub raw: String,
    /// Decoded text for plain strings; the undecoded body for f-strings and
    /// bytes.
    pub value: String,
    /// Absolute byte offset of the body (just after the opening quotes).
    pub body_start: usize,
    pub is_raw: bool,
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

pub fn lex(source: &str) -> Result<Vec<SpannedToken>, SyntaxError> {
    Lexer::new(source, 0).tokenize()
}

/// Lex a fragment whose first byte sits at `base` in some larger text.
/// Spans in the result are absolute.
pub fn lex_at(source: &str, base: usize) -> Result<Vec<SpannedToken>, SyntaxError> {
    Lexer::new(source, base).tokenize()
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    base: usize,
    tokens: Vec<SpannedToken>,
    indents: Vec<usize>,
    /// Byte offsets of currently open brackets.
    brackets: Vec<(u8, usize)>,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, base: usize) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            base,
            tokens: Vec::new(),
            indents: vec![0],
            brackets: Vec::new(),
            at_line_start: true,
        }
    }

    fn tokenize(mut self) -> Result<Vec<SpannedToken>, SyntaxError> {
        loop {
            if self.at_line_start && self.brackets.is_empty() {
                if !self.handle_indentation()? {
                    break;
                }
            }
            self.skip_inline_whitespace();
            let Some(ch) = self.peek() else {
                break;
            };
            let start = self.pos;

            match ch {
                b'#' => self.skip_comment(),
                b'\n' | b'\r' => {
                    self.consume_newline();
                    if self.brackets.is_empty() {
                        self.push(Token::Newline, start, start + 1);
                        self.at_line_start = true;
                    }
                }
                b'\\' => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'\n' | b'\r') => self.consume_newline(),
                        None => {
                            return Err(self.error("unexpected EOF while parsing", start, self.pos));
                        }
                        _ => {
                            return Err(self.error(
                                "unexpected character after line continuation character",
                                start,
                                self.pos,
                            ));
                        }
                    }
                }
                b'0'..=b'9' => self.lex_number(start)?,
                b'.' if self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit) => {
                    self.lex_number(start)?;
                }
                b'"' | b'\'' => self.lex_string(start, start)?,
                _ if self.starts_identifier() => {
                    if let Some(quote_at) = self.string_prefix_end() {
                        self.lex_string(start, quote_at)?;
                    } else {
                        self.lex_ident(start);
                    }
                }
                _ => self.lex_operator(start)?,
            }
        }

        if let Some(&(open, at)) = self.brackets.last() {
            return Err(self.error(
                format!("'{}' was never closed", open as char),
                at,
                at + 1,
            ));
        }

        let end = self.bytes.len();
        if self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.token, Token::Newline | Token::Dedent))
        {
            self.push(Token::Newline, end, end);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Token::Dedent, end, end);
        }
        self.push(Token::Eof, end, end);
        Ok(self.tokens)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn current_char(&self) -> Option<char> {
        self.source.get(self.pos..).and_then(|s| s.chars().next())
    }

    fn push(&mut self, token: Token, start: usize, end: usize) {
        self.tokens.push(SpannedToken {
            token,
            span: Span::new(self.base + start, self.base + end),
        });
    }

    fn error(&self, message: impl Into<String>, start: usize, end: usize) -> SyntaxError {
        SyntaxError::new(message, Span::new(self.base + start, self.base + end))
    }

    fn consume_newline(&mut self) {
        if self.peek() == Some(b'\r') {
            self.pos += 1;
            if self.peek() == Some(b'\n') {
                self.pos += 1;
            }
        } else if self.peek() == Some(b'\n') {
            self.pos += 1;
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\x0c')) {
            self.pos += 1;
        }
    }

    fn skip_comment(&mut self) {
        while self.peek().is_some_and(|b| !matches!(b, b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    /// Measure the indentation of a new logical line and emit INDENT/DEDENT.
    /// Blank and comment-only lines are skipped entirely. Returns `false` at
    /// end of input.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxError> {
        loop {
            let line_start = self.pos;
            let mut width = 0;
            while let Some(b) = self.peek() {
                match b {
                    b' ' => width += 1,
                    b'\t' => width = (width / TAB_SIZE + 1) * TAB_SIZE,
                    b'\x0c' => width = 0,
                    _ => break,
                }
                self.pos += 1;
            }
            match self.peek() {
                None => return Ok(false),
                Some(b'#') => {
                    self.skip_comment();
                    self.consume_newline();
                }
                Some(b'\n' | b'\r') => self.consume_newline(),
                _ => {
                    self.at_line_start = false;
                    let current = self.indents.last().copied().unwrap_or(0);
                    if width > current {
                        if self.indents.len() > MAX_INDENT {
                            return Err(self.error(
                                "too many levels of indentation",
                                line_start,
                                self.pos,
                            ));
                        }
                        self.indents.push(width);
                        self.push(Token::Indent, line_start, self.pos);
                    } else if width < current {
                        while self.indents.last().is_some_and(|&w| w > width) {
                            self.indents.pop();
                            self.push(Token::Dedent, self.pos, self.pos);
                        }
                        if self.indents.last().copied() != Some(width) {
                            return Err(self.error(
                                "unindent does not match any outer indentation level",
                                line_start,
                                self.pos,
                            ));
                        }
                    }
                    return Ok(true);
                }
            }
        }
    }

    fn starts_identifier(&self) -> bool {
        self.current_char()
            .is_some_and(|c| c == '_' || c.is_alphabetic())
    }

    /// If the identifier at `pos` is a valid string prefix immediately
    /// followed by a quote, return the offset of that quote.
    fn string_prefix_end(&self) -> Option<usize> {
        let mut end = self.pos;
        while end - self.pos < 3 && self.bytes.get(end).is_some_and(u8::is_ascii_alphabetic) {
            end += 1;
        }
        if !matches!(self.bytes.get(end), Some(b'"' | b'\'')) {
            return None;
        }
        let prefix = self.source.get(self.pos..end)?.to_ascii_lowercase();
        match prefix.as_str() {
            "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf" => Some(end),
            _ => None,
        }
    }

    // ── Strings ────────────────────────────────────────────────────

    fn lex_string(&mut self, start: usize, quote_at: usize) -> Result<(), SyntaxError> {
        let prefix = self.source.get(start..quote_at).unwrap_or("").to_ascii_lowercase();
        let is_raw = prefix.contains('r');
        let kind = if prefix.contains('b') {
            StrKind::Bytes
        } else if prefix.contains('f') {
            StrKind::FString
        } else {
            StrKind::Str
        };

        let Some(&quote) = self.bytes.get(quote_at) else {
            return Err(self.error("unterminated string literal", start, quote_at));
        };
        let triple = self.bytes.get(quote_at + 1) == Some(&quote)
            && self.bytes.get(quote_at + 2) == Some(&quote);
        let quote_len = if triple { 3 } else { 1 };
        self.pos = quote_at + quote_len;
        let body_start = self.pos;

        let body_end = loop {
            match self.peek() {
                None => {
                    let msg = if triple {
                        "unterminated triple-quoted string literal"
                    } else {
                        "unterminated string literal"
                    };
                    return Err(self.error(msg, start, self.pos));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    if self.peek() == Some(b'\r') && self.peek_at(1) == Some(b'\n') {
                        self.pos += 2;
                    } else if self.pos < self.bytes.len() {
                        self.pos += self.current_char().map_or(1, char::len_utf8);
                    }
                }
                Some(b'\n' | b'\r') if !triple => {
                    return Err(self.error("unterminated string literal", start, self.pos));
                }
                Some(b) if b == quote => {
                    if !triple {
                        let end = self.pos;
                        self.pos += 1;
                        break end;
                    }
                    if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                        let end = self.pos;
                        self.pos += 3;
                        break end;
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    self.pos += self.current_char().map_or(1, char::len_utf8);
                }
            }
        };

        let body = self.source.get(body_start..body_end).unwrap_or("");
        let value = match kind {
            StrKind::Str if !is_raw => strings::decode_escapes(body),
            _ => body.to_string(),
        };
        let raw = self.source.get(start..self.pos).unwrap_or("").to_string();
        self.push(
            Token::Str(StrToken {
                kind,
                raw,
                value,
                body_start: self.base + body_start,
                is_raw,
            }),
            start,
            self.pos,
        );
        Ok(())
    }

    // ── Numbers ────────────────────────────────────────────────────

    fn eat_digits(&mut self, accept: fn(u8) -> bool) {
        while let Some(b) = self.peek() {
            if accept(b) || (b == b'_' && self.peek_at(1).is_some_and(accept)) {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<(), SyntaxError> {
        if self.peek() == Some(b'0') {
            let radix_digit: Option<fn(u8) -> bool> = match self.peek_at(1) {
                Some(b'x' | b'X') => Some(is_hex_digit),
                Some(b'o' | b'O') => Some(is_octal_digit),
                Some(b'b' | b'B') => Some(is_binary_digit),
                _ => None,
            };
            if let Some(accept) = radix_digit {
                self.pos += 2;
                if self.peek() == Some(b'_') {
                    self.pos += 1;
                }
                let digits_start = self.pos;
                self.eat_digits(accept);
                if self.pos == digits_start {
                    return Err(self.error("invalid number literal", start, self.pos));
                }
                let text = self.source.get(start..self.pos).unwrap_or("").to_string();
                self.push(Token::Int(text), start, self.pos);
                return Ok(());
            }
        }

        let mut is_float = false;
        self.eat_digits(is_decimal_digit);
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            self.eat_digits(is_decimal_digit);
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                self.eat_digits(is_decimal_digit);
            } else {
                self.pos = save;
            }
        }
        let token = if matches!(self.peek(), Some(b'j' | b'J')) {
            self.pos += 1;
            Token::Imaginary(self.source.get(start..self.pos).unwrap_or("").to_string())
        } else if is_float {
            Token::Float(self.source.get(start..self.pos).unwrap_or("").to_string())
        } else {
            Token::Int(self.source.get(start..self.pos).unwrap_or("").to_string())
        };
        if self.starts_identifier() && !self.at_keyword_after_number() {
            return Err(self.error("invalid decimal literal", start, self.pos + 1));
        }
        self.push(token, start, self.pos);
        Ok(())
    }

    /// `1if x else 2` is accepted: a number may run straight into one of
    /// these keywords.
    fn at_keyword_after_number(&self) -> bool {
        const KEYWORDS: [&str; 8] = ["and", "else", "for", "if", "in", "is", "not", "or"];
        let rest = self.source.get(self.pos..).unwrap_or("");
        KEYWORDS.iter().any(|kw| rest.starts_with(kw))
    }

    // ── Identifiers ────────────────────────────────────────────────

    fn lex_ident(&mut self, start: usize) {
        while let Some(c) = self.current_char() {
            if c == '_' || c.is_alphanumeric() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let word = self.source.get(start..self.pos).unwrap_or("");
        let token = match word {
            "False" => Token::False,
            "None" => Token::None,
            "True" => Token::True,
            "and" => Token::And,
            "as" => Token::As,
            "assert" => Token::Assert,
            "async" => Token::Async,
            "await" => Token::Await,
            "break" => Token::Break,
            "class" => Token::Class,
            "continue" => Token::Continue,
            "def" => Token::Def,
            "del" => Token::Del,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "except" => Token::Except,
            "finally" => Token::Finally,
            "for" => Token::For,
            "from" => Token::From,
            "global" => Token::Global,
            "if" => Token::If,
            "import" => Token::Import,
            "in" => Token::In,
            "is" => Token::Is,
            "lambda" => Token::Lambda,
            "nonlocal" => Token::Nonlocal,
            "not" => Token::Not,
            "or" => Token::Or,
            "pass" => Token::Pass,
            "raise" => Token::Raise,
            "return" => Token::Return,
            "try" => Token::Try,
            "while" => Token::While,
            "with" => Token::With,
            "yield" => Token::Yield,
            _ => Token::Name(word.to_string()),
        };
        self.push(token, start, self.pos);
    }

    // ── Operators & punctuation ────────────────────────────────────

    fn lex_operator(&mut self, start: usize) -> Result<(), SyntaxError> {
        let rest = self.source.get(start..).unwrap_or("");
        const THREE: [(&str, Token); 5] = [
            ("**=", Token::AugAssign(Operator::Pow)),
            ("//=", Token::AugAssign(Operator::FloorDiv)),
            (">>=", Token::AugAssign(Operator::RShift)),
            ("<<=", Token::AugAssign(Operator::LShift)),
            ("...", Token::Ellipsis),
        ];
        const TWO: [(&str, Token); 19] = [
            ("**", Token::DoubleStar),
            ("//", Token::DoubleSlash),
            (">>", Token::RShift),
            ("<<", Token::LShift),
            ("<=", Token::Le),
            (">=", Token::Ge),
            ("==", Token::EqEq),
            ("!=", Token::NotEq),
            ("->", Token::Arrow),
            (":=", Token::ColonEq),
            ("+=", Token::AugAssign(Operator::Add)),
            ("-=", Token::AugAssign(Operator::Sub)),
            ("*=", Token::AugAssign(Operator::Mult)),
            ("/=", Token::AugAssign(Operator::Div)),
            ("%=", Token::AugAssign(Operator::Mod)),
            ("&=", Token::AugAssign(Operator::BitAnd)),
            ("|=", Token::AugAssign(Operator::BitOr)),
            ("^=", Token::AugAssign(Operator::BitXor)),
            ("@=", Token::AugAssign(Operator::MatMult)),
        ];
        for (text, token) in THREE.iter().chain(TWO.iter()) {
            if rest.starts_with(text) {
                self.pos += text.len();
                self.push(token.clone(), start, self.pos);
                return Ok(());
            }
        }

        let Some(&ch) = self.bytes.get(start) else {
            return Err(self.error("unexpected EOF while parsing", start, start));
        };
        let token = match ch {
            b'(' | b'[' | b'{' => {
                if self.brackets.len() >= MAX_NESTING {
                    return Err(self.error("too many nested parentheses", start, start + 1));
                }
                self.brackets.push((ch, start));
                match ch {
                    b'(' => Token::LParen,
                    b'[' => Token::LBracket,
                    _ => Token::LBrace,
                }
            }
            b')' | b']' | b'}' => {
                let expected = match ch {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                match self.brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, _)) => {
                        return Err(self.error(
                            format!(
                                "closing parenthesis '{}' does not match opening parenthesis '{}'",
                                ch as char, open as char
                            ),
                            start,
                            start + 1,
                        ));
                    }
                    None => {
                        return Err(self.error(format!("unmatched '{}'", ch as char), start, start + 1));
                    }
                }
                match ch {
                    b')' => Token::RParen,
                    b']' => Token::RBracket,
                    _ => Token::RBrace,
                }
            }
            b':' => Token::Colon,
            b',' => Token::Comma,
            b';' => Token::Semi,
            b'.' => Token::Dot,
            b'@' => Token::At,
            b'=' => Token::Eq,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'&' => Token::Amper,
            b'|' => Token::Pipe,
            b'^' => Token::Caret,
            b'~' => Token::Tilde,
            b'<' => Token::Lt,
            b'>' => Token::Gt,
            _ => {
                let c = self.current_char().unwrap_or(ch as char);
                return Err(self.error(
                    format!("invalid character '{c}'"),
                    start,
                    start + c.len_utf8(),
                ));
            }
        };
        self.pos += 1;
        self.push(token, start, self.pos);
        Ok(())
    }
}

fn is_decimal_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

fn is_hex_digit(b: u8) -> bool {
    b.is_ascii_hexdigit()
}

fn is_octal_digit(b: u8) -> bool {
    (b'0'..=b'7').contains(&b)
}

fn is_binary_digit(b: u8) -> bool {
    b == b'0' || b == b'1'
}
