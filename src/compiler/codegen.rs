//! Declaration stripping: render the script without its `grail` imports,
//! `@external` stubs and `Input(...)` bindings.
//!
//! Works on an owned copy of the top-level statements; the `ParseResult`
//! is never modified, so the same parse can be stripped repeatedly and in
//! parallel.

use tracing::debug;

use super::extract::{is_declaration, MARKER_MODULE};
use super::{ParseResult, SourceMap};
use crate::error::{GrailError, Result};
use crate::syntax::ast::{Alias, Stmt, StmtKind};
use crate::syntax::unparse::{unparse_module, Rendered};
use crate::syntax::{parse_module, LineIndex};

/// Produce the interpreter-ready text and its line map.
pub fn generate(parse_result: &ParseResult) -> Result<(String, SourceMap)> {
    let kept: Vec<Stmt> = parse_result
        .module
        .body
        .iter()
        .filter(|stmt| !is_declaration(stmt, parse_result))
        .filter_map(strip_marker_imports)
        .collect();

    let rendered = unparse_module(&kept, Some(&parse_result.line_index));
    validate(&kept, &rendered)?;

    debug!(
        file = parse_result.source_identifier.as_deref().unwrap_or("<string>"),
        statements = kept.len(),
        lines = rendered.origins.len(),
        "generated stripped code"
    );
    let source_map = SourceMap::from_origins(rendered.origins);
    Ok((rendered.text, source_map))
}

fn is_marker_module(name: &str) -> bool {
    name == MARKER_MODULE
        || name
            .strip_prefix(MARKER_MODULE)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Drop imports of the marker module. An `import` naming other modules
/// too keeps those.
fn strip_marker_imports(stmt: &Stmt) -> Option<Stmt> {
    match &stmt.kind {
        StmtKind::Import(aliases) => {
            let rest: Vec<Alias> = aliases
                .iter()
                .filter(|a| !is_marker_module(&a.name))
                .cloned()
                .collect();
            if rest.is_empty() {
                None
            } else {
                Some(Stmt {
                    kind: StmtKind::Import(rest),
                    span: stmt.span,
                })
            }
        }
        StmtKind::ImportFrom {
            module: Some(module),
            level: 0,
            ..
        } if is_marker_module(module) => None,
        _ => Some(stmt.clone()),
    }
}

/// Re-parse the regenerated text and confirm each kept statement starts on
/// the output line the unparser recorded for it.
fn validate(kept: &[Stmt], rendered: &Rendered) -> Result<()> {
    let text = &rendered.text;
    let index = LineIndex::new(text);
    let reparsed = parse_module(text).map_err(|e| {
        let line = index.line_of(e.span.start);
        GrailError::Generation {
            message: format!("regenerated code does not parse: {}", e.format_with_source(text)),
            statement: statement_at(kept, rendered, line),
            generated: text.clone(),
        }
    })?;

    if reparsed.body.len() != kept.len() {
        return Err(GrailError::Generation {
            message: format!(
                "regenerated code has {} top-level statements, expected {}",
                reparsed.body.len(),
                kept.len()
            ),
            statement: String::new(),
            generated: text.clone(),
        });
    }

    for (i, (stmt, expected)) in reparsed.body.iter().zip(&rendered.statement_lines).enumerate() {
        let actual = index.line_of(stmt.span.start);
        if actual != *expected {
            return Err(GrailError::Generation {
                message: format!(
                    "statement {} re-parsed at line {actual}, recorded at line {expected}",
                    i + 1
                ),
                statement: kept.get(i).map(render_statement).unwrap_or_default(),
                generated: text.clone(),
            });
        }
    }
    Ok(())
}

/// Source of the kept statement whose output covers `line`.
fn statement_at(kept: &[Stmt], rendered: &Rendered, line: usize) -> String {
    rendered
        .statement_lines
        .iter()
        .rposition(|&start| start <= line)
        .and_then(|i| kept.get(i))
        .map(render_statement)
        .unwrap_or_default()
}

fn render_statement(stmt: &Stmt) -> String {
    unparse_module(std::slice::from_ref(stmt), None)
        .text
        .trim_end()
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn strip(src: &str) -> (String, SourceMap) {
        generate(&compile(src, None).unwrap()).unwrap()
    }

    #[test]
    fn strips_declarations_and_maps_lines() {
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
        let (code, map) = strip(src);
        assert_eq!(
            code,
            "data = await fetch(1)\nif len(data) > budget:\n    data = data[:10]\ndata\n"
        );
        let originals: Vec<Option<usize>> = map.entries().map(|(_, o)| o).collect();
        assert_eq!(originals, vec![Some(9), Some(10), Some(11), Some(12)]);
        assert_eq!(map.to_stripped(9), Some(1));
        assert_eq!(map.to_stripped(3), None);
    }

    #[test]
    fn keeps_plain_assignments_to_input_names() {
        let src = "y: int = Input(\"y\")\ny = 42\nprint(y)\n";
        let (code, map) = strip(src);
        assert_eq!(code, "y = 42\nprint(y)\n");
        assert_eq!(map.to_original(1), Some(2));
    }

    #[test]
    fn strips_only_marker_imports() {
        let src = "import grail\nimport grail.tools\nfrom grail import Input\nimport os, grail\nfrom typing import Any\nfrom grailish import x\n";
        let (code, _) = strip(src);
        assert_eq!(
            code,
            "import os\nfrom typing import Any\nfrom grailish import x\n"
        );
    }

    #[test]
    fn nested_markers_are_left_alone() {
        let src = "def outer():\n    @external\n    def inner() -> int:\n        ...\n    return inner\n";
        let (code, map) = strip(src);
        assert_eq!(code, src);
        assert_eq!(map.len(), 5);
        assert_eq!(map.to_original(2), Some(2));
    }

    #[test]
    fn else_and_finally_lines_are_unknown() {
        let src = "if a:\n    b = 1\nelse:\n    b = 2\ntry:\n    c()\nfinally:\n    d()\n";
        let (_, map) = strip(src);
        let originals: Vec<Option<usize>> = map.entries().map(|(_, o)| o).collect();
        assert_eq!(
            originals,
            vec![Some(1), Some(2), None, Some(4), Some(5), Some(6), None, Some(8)]
        );
    }

    #[test]
    fn multi_line_statements_collapse_to_their_first_line() {
        let src = "x: int = Input(\"x\")\nvalues = [\n    1,\n    2,\n]\ntotal = sum(values) + x\n";
        let (code, map) = strip(src);
        assert_eq!(code, "values = [1, 2]\ntotal = sum(values) + x\n");
        assert_eq!(map.to_original(1), Some(2));
        assert_eq!(map.to_original(2), Some(6));
    }

    #[test]
    fn generation_leaves_the_parse_result_untouched() {
        let parsed = compile("x = Input(\"x\")\nprint(x)\n", None).unwrap();
        let before = parsed.module.body.len();
        let first = generate(&parsed).unwrap();
        let second = generate(&parsed).unwrap();
        assert_eq!(first, second);
        assert_eq!(parsed.module.body.len(), before);
    }

    #[test]
    fn empty_result_is_empty_text() {
        let (code, map) = strip("from grail import Input\nx: int = Input(\"x\")\n");
        assert_eq!(code, "");
        assert!(map.is_empty());
    }

    #[test]
    fn unparseable_output_is_a_generation_failure() {
        let kept = parse_module("x = 1\n").unwrap().body;
        let rendered = Rendered {
            text: "x = (\n".into(),
            origins: vec![Some(1)],
            statement_lines: vec![1],
        };
        match validate(&kept, &rendered) {
            Err(GrailError::Generation {
                statement,
                generated,
                ..
            }) => {
                assert_eq!(statement, "x = 1");
                assert_eq!(generated, "x = (\n");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn misplaced_statement_is_a_generation_failure() {
        let kept = parse_module("x = 1\ny = 2\n").unwrap().body;
        let rendered = Rendered {
            text: "x = 1\ny = 2\n".into(),
            origins: vec![Some(1), Some(2)],
            statement_lines: vec![1, 3],
        };
        assert!(matches!(
            validate(&kept, &rendered),
            Err(GrailError::Generation { .. })
        ));

        let short = Rendered {
            text: "x = 1\n".into(),
            origins: vec![Some(1)],
            statement_lines: vec![1],
        };
        assert!(matches!(
            validate(&kept, &short),
            Err(GrailError::Generation { .. })
        ));
    }
}
