//! Type-stub synthesis for the interpreter's ahead-of-time type checker.
//!
//! Output is a pure function of the declaration tables: inputs and
//! externals are emitted sorted by name, and the `typing` import names
//! exactly the vocabulary words found in the emitted annotations.

use std::collections::BTreeSet;

use super::{ExternalSpec, InputSpec, ParamKind, ParameterSpec, ParseResult};

/// Names the checker resolves from `typing`. Sorted.
const TYPING_VOCABULARY: &[&str] = &[
    "Annotated",
    "Any",
    "AsyncGenerator",
    "AsyncIterable",
    "AsyncIterator",
    "Awaitable",
    "Callable",
    "ClassVar",
    "Collection",
    "Coroutine",
    "DefaultDict",
    "Dict",
    "Final",
    "FrozenSet",
    "Generator",
    "Iterable",
    "Iterator",
    "List",
    "Literal",
    "LiteralString",
    "Mapping",
    "MutableMapping",
    "MutableSequence",
    "NamedTuple",
    "Never",
    "NewType",
    "NoReturn",
    "NotRequired",
    "Optional",
    "Required",
    "Sequence",
    "Set",
    "Tuple",
    "Type",
    "TypeAlias",
    "TypeVar",
    "TypedDict",
    "Union",
];

/// Annotation used when a declaration has none.
const UNTYPED: &str = "Any";

pub fn synthesize_stub(parse_result: &ParseResult) -> String {
    let mut inputs: Vec<&InputSpec> = parse_result.inputs.values().collect();
    inputs.sort_by(|a, b| a.name.cmp(&b.name));
    let mut externals: Vec<&ExternalSpec> = parse_result.externals.values().collect();
    externals.sort_by(|a, b| a.name.cmp(&b.name));

    let mut annotations: Vec<&str> = Vec::new();
    let mut blocks: Vec<String> = Vec::new();

    if !inputs.is_empty() {
        let lines: Vec<String> = inputs
            .iter()
            .map(|input| {
                let ty = input.type_annotation.as_deref().unwrap_or(UNTYPED);
                annotations.push(ty);
                format!("{}: {ty}", input.name)
            })
            .collect();
        blocks.push(lines.join("\n"));
    }

    for external in &externals {
        for param in &external.parameters {
            annotations.push(param.type_annotation.as_deref().unwrap_or(UNTYPED));
        }
        annotations.push(external.return_type.as_deref().unwrap_or(UNTYPED));
        blocks.push(external_stub(external));
    }

    let used = typing_names(&annotations);
    if !used.is_empty() {
        let names: Vec<&str> = used.into_iter().collect();
        blocks.insert(0, format!("from typing import {}", names.join(", ")));
    }

    if blocks.is_empty() {
        return String::new();
    }
    let mut out = blocks.join("\n\n");
    out.push('\n');
    out
}

fn external_stub(external: &ExternalSpec) -> String {
    let mut out = String::new();
    if external.is_async {
        out.push_str("async ");
    }
    out.push_str("def ");
    out.push_str(&external.name);
    out.push('(');
    out.push_str(&render_parameters(&external.parameters));
    out.push_str(") -> ");
    out.push_str(external.return_type.as_deref().unwrap_or(UNTYPED));
    out.push(':');

    match external.docstring.as_deref().filter(|d| !d.is_empty()) {
        None => out.push_str(" ..."),
        Some(doc) => {
            out.push_str("\n    \"\"\"");
            let escaped = escape_docstring(doc);
            let mut lines = escaped.lines();
            if let Some(first) = lines.next() {
                out.push_str(first);
            }
            let mut multi_line = false;
            for line in lines {
                multi_line = true;
                out.push('\n');
                if !line.is_empty() {
                    out.push_str("    ");
                    out.push_str(line);
                }
            }
            if multi_line {
                out.push_str("\n    ");
            }
            out.push_str("\"\"\"\n    ...");
        }
    }
    out
}

/// Render a parameter list with `/` after the positional-only group and a
/// bare `*` before keyword-only parameters when there is no `*args`.
fn render_parameters(params: &[ParameterSpec]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(params.len() + 2);
    let mut previous: Option<ParamKind> = None;
    for param in params {
        if previous == Some(ParamKind::PositionalOnly) && param.kind != ParamKind::PositionalOnly {
            parts.push("/".into());
        }
        if param.kind == ParamKind::KeywordOnly
            && !matches!(
                previous,
                Some(ParamKind::KeywordOnly | ParamKind::VarPositional)
            )
        {
            parts.push("*".into());
        }

        let ty = param.type_annotation.as_deref().unwrap_or(UNTYPED);
        let prefix = match param.kind {
            ParamKind::VarPositional => "*",
            ParamKind::VarKeyword => "**",
            _ => "",
        };
        let default = if param.has_default { " = ..." } else { "" };
        parts.push(format!("{prefix}{}: {ty}{default}", param.name));
        previous = Some(param.kind);
    }
    if previous == Some(ParamKind::PositionalOnly) {
        parts.push("/".into());
    }
    parts.join(", ")
}

/// Escape text for a `"""`-delimited literal.
fn escape_docstring(doc: &str) -> String {
    let mut escaped = doc.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    if escaped.ends_with('"') {
        escaped.pop();
        escaped.push_str("\\\"");
    }
    escaped
}

/// Vocabulary words appearing as whole identifiers in any annotation.
fn typing_names(annotations: &[&str]) -> BTreeSet<&'static str> {
    let mut used = BTreeSet::new();
    for annotation in annotations {
        for word in annotation.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
            if let Ok(i) = TYPING_VOCABULARY.binary_search(&word) {
                if let Some(name) = TYPING_VOCABULARY.get(i) {
                    used.insert(*name);
                }
            }
        }
    }
    used
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn stub(src: &str) -> String {
        synthesize_stub(&compile(src, None).unwrap())
    }

    #[test]
    fn budget_fetch_stub() {
        let src = "budget: float = Input(\"budget\")\n\n@external\nasync def fetch(id: int) -> str:\n    ...\n";
        assert_eq!(
            stub(src),
            "budget: float\n\nasync def fetch(id: int) -> str: ...\n"
        );
    }

    #[test]
    fn vocabulary_is_sorted() {
        assert!(TYPING_VOCABULARY.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn output_is_independent_of_declaration_order() {
        let a = "x: int = Input(\"x\")\nb: str = Input(\"b\")\n@external\ndef zeta() -> int: ...\n@external\ndef alpha() -> int: ...\n";
        let b = "@external\ndef alpha() -> int: ...\nb: str = Input(\"b\")\n@external\ndef zeta() -> int: ...\nx: int = Input(\"x\")\n";
        let first = stub(a);
        assert_eq!(first, stub(b));
        assert_eq!(
            first,
            "b: str\nx: int\n\ndef alpha() -> int: ...\n\ndef zeta() -> int: ...\n"
        );
    }

    #[test]
    fn imports_exactly_the_typing_names_used() {
        let src = "\
cfg: Optional[Dict[str, Any]] = Input(\"cfg\")
raw = Input(\"raw\")

@external
def f(a: MyAnyThing, b: Listing) -> List[int]: ...
";
        let out = stub(src);
        assert!(
            out.starts_with("from typing import Any, Dict, List, Optional\n\n"),
            "{out}"
        );
        assert!(out.contains("raw: Any\n"));
    }

    #[test]
    fn no_import_without_vocabulary() {
        let out = stub("n: int = Input(\"n\")\n");
        assert_eq!(out, "n: int\n");
    }

    #[test]
    fn parameter_separators_and_defaults() {
        let src = "@external\ndef f(a, /, b=1, *args, c=2, **kw): ...\n@external\ndef g(*, k: int) -> None: ...\n@external\ndef h(p: int, /) -> None: ...\n";
        let out = stub(src);
        assert!(out.contains(
            "def f(a: Any, /, b: Any = ..., *args: Any, c: Any = ..., **kw: Any) -> Any: ..."
        ));
        assert!(out.contains("def g(*, k: int) -> None: ..."));
        assert!(out.contains("def h(p: int, /) -> None: ..."));
        assert!(out.starts_with("from typing import Any\n"));
    }

    #[test]
    fn docstrings_are_escaped_and_indented() {
        let src = "@external\ndef f() -> str:\n    \"\"\"Uses a \\\\ path and 'q' quotes.\n\n    Second line ends with a quote \\\"\n    \"\"\"\n    ...\n";
        let parsed = compile(src, None).unwrap();
        let doc = parsed.externals["f"].docstring.clone().unwrap();
        assert!(doc.ends_with('"'));
        let out = synthesize_stub(&parsed);
        assert!(out.starts_with("def f() -> str:\n    \"\"\"Uses a \\\\ path"), "{out}");
        assert!(out.contains("\n\n    Second line ends with a quote \\\"\n    \"\"\"\n    ...\n"), "{out}");
    }

    #[test]
    fn triple_quotes_in_docstrings_are_broken_up() {
        assert_eq!(escape_docstring("a \"\"\" b"), "a \\\"\\\"\\\" b");
        assert_eq!(escape_docstring("x\\y"), "x\\\\y");
    }

    #[test]
    fn empty_tables_give_empty_stub() {
        assert_eq!(stub("x = 1\n"), "");
    }
}
