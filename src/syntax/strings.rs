//! String literal helpers: escape decoding, f-string field scanning and
//! docstring cleanup.

use super::ast::Span;
use super::SyntaxError;

/// Decode backslash escapes in a non-raw string body.
///
/// Unknown escapes are kept verbatim, like the host language does.
pub fn decode_escapes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = chars.clone().take(width).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(ch) if digits.len() == width => {
                        out.push(ch);
                        for _ in 0..width {
                            chars.next();
                        }
                    }
                    _ => {
                        out.push('\\');
                        out.push(next);
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

/// Find the replacement-field expressions in an f-string body.
///
/// Returns each expression's text with the absolute offset of its first
/// byte (`base` is the absolute offset of `body`). Nested fields inside a
/// format spec are included.
pub fn fstring_fields(body: &str, base: usize) -> Result<Vec<(String, usize)>, SyntaxError> {
    let bytes = body.as_bytes();
    let mut fields = Vec::new();
    let mut i = 0;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'{' if bytes.get(i + 1) == Some(&b'{') => i += 2,
            b'}' if bytes.get(i + 1) == Some(&b'}') => i += 2,
            b'{' => i = scan_field(body, i + 1, base, &mut fields)?,
            b'}' => {
                return Err(SyntaxError::new(
                    "f-string: single '}' is not allowed",
                    Span::new(base + i, base + i + 1),
                ));
            }
            _ => i += 1,
        }
    }
    Ok(fields)
}

/// Scan one replacement field whose expression begins at `start` (just past
/// the `{`). Returns the offset just past the closing `}`.
fn scan_field(
    body: &str,
    start: usize,
    base: usize,
    fields: &mut Vec<(String, usize)>,
) -> Result<usize, SyntaxError> {
    let bytes = body.as_bytes();
    let unterminated = || {
        SyntaxError::new(
            "f-string: expecting '}'",
            Span::new(base + start.saturating_sub(1), base + start),
        )
    };

    let mut i = start;
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut self_documenting = false;
    let expr_end = loop {
        let Some(&b) = bytes.get(i) else {
            return Err(unterminated());
        };
        if let Some(q) = quote {
            if b == b'\\' {
                i += 1;
            } else if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'}' if depth > 0 => depth -= 1,
            b'}' => break i,
            b'!' if depth == 0 && bytes.get(i + 1) != Some(&b'=') => break i,
            b':' if depth == 0 => break i,
            b'=' if depth == 0 => {
                let prev = if i > start { bytes.get(i - 1).copied() } else { None };
                if bytes.get(i + 1) == Some(&b'=') {
                    i += 1;
                } else if !matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) {
                    let rest = body.get(i + 1..).unwrap_or("").trim_start();
                    if rest.starts_with(['}', '!', ':']) {
                        self_documenting = true;
                        break i;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    };

    let text = body.get(start..expr_end).unwrap_or("");
    if text.trim().is_empty() {
        return Err(SyntaxError::new(
            "f-string: empty expression not allowed",
            Span::new(base + start, base + expr_end.max(start + 1)),
        ));
    }
    fields.push((text.to_string(), base + start));

    i = expr_end;
    if self_documenting {
        i += 1;
        while bytes.get(i).is_some_and(u8::is_ascii_whitespace) {
            i += 1;
        }
    }
    if bytes.get(i) == Some(&b'!') {
        while bytes.get(i).is_some_and(|&b| b != b':' && b != b'}') {
            i += 1;
        }
    }
    if bytes.get(i) == Some(&b':') {
        i += 1;
        loop {
            match bytes.get(i) {
                None => return Err(unterminated()),
                Some(b'{') => i = scan_field(body, i + 1, base, fields)?,
                Some(b'}') => break,
                Some(_) => i += 1,
            }
        }
    }
    if bytes.get(i) != Some(&b'}') {
        return Err(unterminated());
    }
    Ok(i + 1)
}

/// Normalize a docstring: expand tabs, drop the common indentation of all
/// lines after the first, and trim leading/trailing blank lines.
pub fn clean_docstring(doc: &str) -> String {
    let expanded: Vec<String> = doc.lines().map(expand_tabs).collect();
    let margin = expanded
        .iter()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut lines: Vec<&str> = Vec::with_capacity(expanded.len());
    for (i, line) in expanded.iter().enumerate() {
        if i == 0 {
            lines.push(line.trim_start());
        } else {
            lines.push(line.get(margin..).unwrap_or(""));
        }
    }
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn expand_tabs(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut col = 0;
    for c in line.chars() {
        if c == '\t' {
            let pad = 8 - col % 8;
            out.extend(std::iter::repeat(' ').take(pad));
            col += pad;
        } else {
            out.push(c);
            col += 1;
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn decodes_common_escapes() {
        assert_eq!(decode_escapes(r"a\nb\tc\\d\'e"), "a\nb\tc\\d'e");
        assert_eq!(decode_escapes(r"\x41é\101"), "AéA");
        assert_eq!(decode_escapes(r"\q"), "\\q");
    }

    #[test]
    fn line_continuation_inside_string() {
        assert_eq!(decode_escapes("ab\\\ncd"), "abcd");
    }

    #[test]
    fn fstring_fields_are_located() {
        let fields = fstring_fields("x={x!r:>{width}} {{lit}} {y + 1}", 100).unwrap();
        let texts: Vec<&str> = fields.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(texts, vec!["x", "width", "y + 1"]);
        assert_eq!(fields[0].1, 103);
    }

    #[test]
    fn fstring_self_documenting_and_comparisons() {
        let fields = fstring_fields("{a=} {a == b} {d['k']}", 0).unwrap();
        let texts: Vec<&str> = fields.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(texts, vec!["a", "a == b", "d['k']"]);
    }

    #[test]
    fn fstring_errors() {
        assert!(fstring_fields("{}", 0).is_err());
        assert!(fstring_fields("{x", 0).is_err());
        assert!(fstring_fields("a } b", 0).is_err());
    }

    #[test]
    fn docstring_cleanup() {
        let raw = "\n    Fetch a record.\n\n      Indented detail.\n    ";
        assert_eq!(clean_docstring(raw), "Fetch a record.\n\n  Indented detail.");
        assert_eq!(clean_docstring("  One line."), "One line.");
    }
}
