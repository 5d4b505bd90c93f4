//! Declaration extraction: parse a script and collect its `@external`
//! functions and `Input(...)` bindings.
//!
//! Only the top-level statement sequence is scanned. A marked function
//! nested in another function or under an `if` is ordinary code.

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::{ExternalSpec, InputSpec, Location, ParamKind, ParameterSpec, ParseResult};
use crate::error::{GrailError, Result};
use crate::syntax::ast::{
    Constant, Expr, ExprKind, FunctionDef, Keyword, Param, Parameters, Span, Stmt, StmtKind,
};
use crate::syntax::strings::clean_docstring;
use crate::syntax::unparse::unparse_expr;
use crate::syntax::{parse_module, LineIndex};

/// Module that exports the declaration markers.
pub const MARKER_MODULE: &str = "grail";
pub const EXTERNAL_MARKER: &str = "external";
pub const INPUT_MARKER: &str = "Input";

/// How a script spells a declaration marker.
///
/// `@external` / `Input(...)` are `Bare`; `@grail.external` /
/// `grail.Input(...)` are `Qualified`. Aliased imports
/// (`from grail import external as ext`) are not recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSpelling {
    Bare,
    Qualified,
}

impl MarkerSpelling {
    /// Resolve how `expr` refers to `marker`, or `None` if it does not.
    pub fn resolve(expr: &Expr, marker: &str) -> Option<Self> {
        match &expr.kind {
            ExprKind::Name { id, .. } if id == marker => Some(MarkerSpelling::Bare),
            ExprKind::Attribute { value, attr, .. } if attr == marker => match &value.kind {
                ExprKind::Name { id, .. } if id == MARKER_MODULE => Some(MarkerSpelling::Qualified),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Parse `source` and extract its declaration tables.
///
/// Fails with [`GrailError::Syntax`] when the text does not parse,
/// [`GrailError::BindingMismatch`] when `x = Input("y")` names disagree and
/// [`GrailError::MalformedDeclaration`] for a declaration of the wrong shape.
pub fn compile(source: &str, source_identifier: Option<&str>) -> Result<ParseResult> {
    let line_index = LineIndex::new(source);
    let source_lines: Vec<String> = source.lines().map(str::to_string).collect();

    let module = parse_module(source).map_err(|e| {
        let (line, column) = line_index.line_col(e.span.start);
        GrailError::Syntax {
            message: e.message,
            location: Location::new(line, column),
            line_text: source_lines
                .get(line.saturating_sub(1))
                .cloned()
                .unwrap_or_default(),
        }
    })?;

    let extractor = Extractor {
        index: &line_index,
        lines: &source_lines,
    };
    let mut externals = IndexMap::new();
    let mut inputs = IndexMap::new();

    for stmt in &module.body {
        match &stmt.kind {
            StmtKind::FunctionDef(func) if is_external(func) => {
                let spec = extractor.external(func, stmt.span)?;
                insert_declaration(&mut externals, spec.name.clone(), spec, "external");
            }
            StmtKind::Assign { targets, value } => {
                if let Some((args, keywords)) = input_call(value) {
                    let [target] = targets.as_slice() else {
                        return Err(extractor.malformed(
                            "Input() must be assigned to a single variable name",
                            stmt.span,
                        ));
                    };
                    let spec = extractor.input(target, None, args, keywords, stmt.span)?;
                    insert_declaration(&mut inputs, spec.name.clone(), spec, "input");
                }
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value: Some(value),
            } => {
                if let Some((args, keywords)) = input_call(value) {
                    let spec =
                        extractor.input(target, Some(annotation), args, keywords, stmt.span)?;
                    insert_declaration(&mut inputs, spec.name.clone(), spec, "input");
                }
            }
            _ => {}
        }
    }

    debug!(
        file = source_identifier.unwrap_or("<string>"),
        externals = externals.len(),
        inputs = inputs.len(),
        "extracted declarations"
    );

    Ok(ParseResult {
        module,
        externals,
        inputs,
        source_lines,
        source_identifier: source_identifier.map(str::to_string),
        line_index,
    })
}

pub(crate) fn is_external(func: &FunctionDef) -> bool {
    func.decorators
        .iter()
        .any(|d| MarkerSpelling::resolve(d, EXTERNAL_MARKER).is_some())
}

/// The arguments of `value` if it is a call to the input marker.
pub(crate) fn input_call(value: &Expr) -> Option<(&[Expr], &[Keyword])> {
    match &value.kind {
        ExprKind::Call {
            func,
            args,
            keywords,
        } if MarkerSpelling::resolve(func, INPUT_MARKER).is_some() => Some((args, keywords)),
        _ => None,
    }
}

/// Whether a top-level statement is one of the extracted declarations.
///
/// Matches on both the target name and the marker shape, so `y = 42` is
/// not a declaration even when an input named `y` exists.
pub(crate) fn is_declaration(stmt: &Stmt, result: &ParseResult) -> bool {
    let declared_input = |target: &Expr| {
        matches!(&target.kind, ExprKind::Name { id, .. } if result.inputs.contains_key(id))
    };
    match &stmt.kind {
        StmtKind::FunctionDef(func) => {
            is_external(func) && result.externals.contains_key(&func.name)
        }
        StmtKind::Assign { targets, value } => {
            input_call(value).is_some() && matches!(targets.as_slice(), [t] if declared_input(t))
        }
        StmtKind::AnnAssign {
            target,
            value: Some(value),
            ..
        } => input_call(value).is_some() && declared_input(target),
        _ => false,
    }
}

fn insert_declaration<T>(table: &mut IndexMap<String, T>, name: String, spec: T, what: &str) {
    if table.insert(name.clone(), spec).is_some() {
        warn!(name = %name, "duplicate {what} declaration; the later one wins");
    }
}

struct Extractor<'a> {
    index: &'a LineIndex,
    lines: &'a [String],
}

impl Extractor<'_> {
    fn location(&self, span: Span) -> Location {
        let (line, column) = self.index.line_col(span.start);
        Location::new(line, column)
    }

    /// Original text of the line `location` points at.
    fn line_text(&self, location: Location) -> String {
        self.lines
            .get(location.line.saturating_sub(1))
            .cloned()
            .unwrap_or_default()
    }

    fn malformed(&self, message: impl Into<String>, span: Span) -> GrailError {
        let location = self.location(span);
        GrailError::MalformedDeclaration {
            message: message.into(),
            line_text: self.line_text(location),
            location,
        }
    }

    fn external(&self, func: &FunctionDef, span: Span) -> Result<ExternalSpec> {
        let docstring = self.external_body(func, span)?;
        Ok(ExternalSpec {
            name: func.name.clone(),
            is_async: func.is_async,
            parameters: parameter_specs(&func.params),
            return_type: func.returns.as_ref().map(unparse_expr),
            docstring,
            location: self.location(span),
        })
    }

    /// Check the body is `...`, optionally after a docstring. Returns the
    /// cleaned docstring.
    fn external_body(&self, func: &FunctionDef, span: Span) -> Result<Option<String>> {
        let mut body = func.body.as_slice();
        let mut docstring = None;
        if let Some((first, rest)) = body.split_first() {
            if let StmtKind::Expr(Expr {
                kind: ExprKind::Constant(Constant::Str { value, .. }),
                ..
            }) = &first.kind
            {
                docstring = Some(clean_docstring(value));
                body = rest;
            }
        }

        match body {
            [Stmt {
                kind:
                    StmtKind::Expr(Expr {
                        kind: ExprKind::Constant(Constant::Ellipsis),
                        ..
                    }),
                ..
            }] => Ok(docstring),
            _ => {
                let at = body.iter().find(|s| !is_ellipsis(s)).map_or(span, |s| s.span);
                Err(self.malformed(
                    format!(
                        "external function '{}' must have '...' as its body (optionally after a docstring)",
                        func.name
                    ),
                    at,
                ))
            }
        }
    }

    fn input(
        &self,
        target: &Expr,
        annotation: Option<&Expr>,
        args: &[Expr],
        keywords: &[Keyword],
        span: Span,
    ) -> Result<InputSpec> {
        let ExprKind::Name { id: name, .. } = &target.kind else {
            return Err(self.malformed(
                "Input() must be assigned to a simple variable name",
                target.span,
            ));
        };

        let name_arg = args.first().or_else(|| {
            keywords
                .iter()
                .find(|k| k.arg.as_deref() == Some("name"))
                .map(|k| &k.value)
        });
        let declared_name = match name_arg {
            None => None,
            Some(Expr {
                kind: ExprKind::Constant(Constant::Str { value, .. }),
                ..
            }) => Some(value.clone()),
            Some(other) => {
                return Err(self.malformed(
                    format!("Input() name for '{name}' must be a string literal"),
                    other.span,
                ));
            }
        };

        if let Some(declared) = &declared_name {
            if declared != name {
                let location = self.location(span);
                return Err(GrailError::BindingMismatch {
                    declared: declared.clone(),
                    variable: name.clone(),
                    line_text: self.line_text(location),
                    location,
                });
            }
        }

        let default_value = keywords
            .iter()
            .find(|k| k.arg.as_deref() == Some("default"))
            .map(|k| unparse_expr(&k.value));

        Ok(InputSpec {
            name: name.clone(),
            declared_name,
            type_annotation: annotation.map(unparse_expr),
            has_default: default_value.is_some(),
            default_value,
            location: self.location(span),
        })
    }
}

fn is_ellipsis(stmt: &Stmt) -> bool {
    matches!(
        &stmt.kind,
        StmtKind::Expr(Expr {
            kind: ExprKind::Constant(Constant::Ellipsis),
            ..
        })
    )
}

/// Flatten the five parameter groups into declaration order.
///
/// Positional defaults are right-aligned: default `i` belongs to positional
/// parameter `total_positional - defaults.len() + i`. Keyword-only defaults
/// run parallel to the keyword-only parameters.
fn parameter_specs(params: &Parameters) -> Vec<ParameterSpec> {
    let total_positional = params.posonly.len() + params.args.len();
    let first_default = total_positional.saturating_sub(params.defaults.len());

    let positional = params
        .posonly
        .iter()
        .map(|p| (p, ParamKind::PositionalOnly))
        .chain(params.args.iter().map(|p| (p, ParamKind::PositionalOrKeyword)));

    let mut specs = Vec::with_capacity(total_positional + params.kwonly.len() + 2);
    for (index, (param, kind)) in positional.enumerate() {
        let default = index
            .checked_sub(first_default)
            .and_then(|i| params.defaults.get(i));
        specs.push(parameter_spec(param, kind, default));
    }
    if let Some(vararg) = &params.vararg {
        specs.push(parameter_spec(vararg, ParamKind::VarPositional, None));
    }
    for (index, param) in params.kwonly.iter().enumerate() {
        let default = params.kw_defaults.get(index).and_then(Option::as_ref);
        specs.push(parameter_spec(param, ParamKind::KeywordOnly, default));
    }
    if let Some(kwarg) = &params.kwarg {
        specs.push(parameter_spec(kwarg, ParamKind::VarKeyword, None));
    }
    specs
}

fn parameter_spec(param: &Param, kind: ParamKind, default: Option<&Expr>) -> ParameterSpec {
    ParameterSpec {
        name: param.name.clone(),
        type_annotation: param.annotation.as_ref().map(unparse_expr),
        has_default: default.is_some(),
        default_repr: default.map(unparse_expr),
        kind,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;

    fn kinds(spec: &ExternalSpec) -> Vec<(&str, ParamKind, bool)> {
        spec.parameters
            .iter()
            .map(|p| (p.name.as_str(), p.kind, p.has_default))
            .collect()
    }

    #[test]
    fn extracts_external_with_docstring() {
        let src = "from grail import external, Input\n\n@external\nasync def fetch(id: int) -> str:\n    \"\"\"Fetch a record.\n\n    Returns its JSON.\n    \"\"\"\n    ...\n";
        let result = compile(src, Some("fetch.pym")).unwrap();
        let fetch = &result.externals["fetch"];
        assert!(fetch.is_async);
        assert_eq!(fetch.return_type.as_deref(), Some("str"));
        assert_eq!(
            fetch.docstring.as_deref(),
            Some("Fetch a record.\n\nReturns its JSON.")
        );
        assert_eq!(fetch.location, Location::new(4, 1));
        assert_eq!(fetch.parameters[0].type_annotation.as_deref(), Some("int"));
        assert_eq!(result.source_identifier.as_deref(), Some("fetch.pym"));
    }

    #[test]
    fn every_parameter_kind_is_reconstructed() {
        let src = "@external\ndef f(a, /, b=1, *args, c=2, **kw) -> None:\n    ...\n";
        let result = compile(src, None).unwrap();
        assert_eq!(
            kinds(&result.externals["f"]),
            vec![
                ("a", ParamKind::PositionalOnly, false),
                ("b", ParamKind::PositionalOrKeyword, true),
                ("args", ParamKind::VarPositional, false),
                ("c", ParamKind::KeywordOnly, true),
                ("kw", ParamKind::VarKeyword, false),
            ]
        );
        assert_eq!(result.externals["f"].parameters[1].default_repr.as_deref(), Some("1"));
    }

    #[test]
    fn defaults_are_right_aligned_across_groups() {
        let src = "@external\ndef f(a, b=1, /, c=2, d=3, *, e, g=4) -> None: ...\n";
        let f = &compile(src, None).unwrap().externals["f"];
        let defaults: Vec<Option<&str>> = f
            .parameters
            .iter()
            .map(|p| p.default_repr.as_deref())
            .collect();
        assert_eq!(
            defaults,
            vec![None, Some("1"), Some("2"), Some("3"), None, Some("4")]
        );
    }

    #[test]
    fn qualified_markers_are_recognized() {
        let src = "import grail\n\n@grail.external\ndef g(x: int) -> int: ...\n\nn: int = grail.Input(\"n\")\n";
        let result = compile(src, None).unwrap();
        assert!(result.externals.contains_key("g"));
        assert_eq!(result.inputs["n"].type_annotation.as_deref(), Some("int"));
    }

    #[test]
    fn unrelated_attribute_markers_are_ignored() {
        let src = "@other.external\ndef g() -> int:\n    return 1\n";
        assert!(compile(src, None).unwrap().externals.is_empty());
    }

    #[test]
    fn nested_declarations_are_not_extracted() {
        let src = "def outer():\n    @external\n    def inner() -> int: ...\n    y: int = Input(\"y\")\n\nif True:\n    z = Input(\"z\")\n";
        let result = compile(src, None).unwrap();
        assert!(result.externals.is_empty());
        assert!(result.inputs.is_empty());
    }

    #[test]
    fn input_forms() {
        let src = "a: int = Input(\"a\")\nb = Input(\"b\", default=[1, 2])\nc: str = Input(name=\"c\")\nd: float = Input()\n";
        let result = compile(src, None).unwrap();
        let a = &result.inputs["a"];
        assert!(a.required());
        assert_eq!(a.declared_name.as_deref(), Some("a"));
        let b = &result.inputs["b"];
        assert_eq!(b.type_annotation, None);
        assert_eq!(b.default_value.as_deref(), Some("[1, 2]"));
        assert!(!b.required());
        assert_eq!(result.inputs["c"].declared_name.as_deref(), Some("c"));
        assert_eq!(result.inputs["d"].declared_name, None);
        assert_eq!(result.inputs["d"].location, Location::new(4, 1));
    }

    #[test]
    fn binding_mismatch_is_fatal() {
        let err = compile("x = 1\nbudget: float = Input(\"total\")\n", None).unwrap_err();
        assert!(
            err.to_string().ends_with("\n    budget: float = Input(\"total\")"),
            "{err}"
        );
        match err {
            GrailError::BindingMismatch {
                declared,
                variable,
                location,
                line_text,
            } => {
                assert_eq!(declared, "total");
                assert_eq!(variable, "budget");
                assert_eq!(location.line, 2);
                assert_eq!(line_text, "budget: float = Input(\"total\")");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_declarations() {
        for src in [
            "@external\ndef f() -> int:\n    return 1\n",
            "@external\ndef f() -> int:\n    \"\"\"Doc only.\"\"\"\n",
            "a.b = Input(\"b\")\n",
            "x = y = Input(\"x\")\n",
            "x = Input(name_var)\n",
        ] {
            match compile(src, None) {
                Err(GrailError::MalformedDeclaration {
                    location,
                    line_text,
                    ..
                }) => {
                    let expected = src.lines().nth(location.line - 1).unwrap();
                    assert_eq!(line_text, expected, "{src:?}");
                    assert!(!line_text.is_empty(), "{src:?}");
                }
                other => panic!("expected malformed declaration for {src:?}, got {other:?}"),
            }
        }

        let err = compile("x = 1\n\na.b = Input(\"b\")\n", None).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("declaration error at line 3, column 1:"), "{text}");
        assert!(text.ends_with("\n    a.b = Input(\"b\")"), "{text}");
    }

    #[test]
    fn syntax_error_quotes_the_line() {
        let err = compile("x = 1\ny = (1 +\n", Some("bad.pym")).unwrap_err();
        match err {
            GrailError::Syntax {
                location,
                line_text,
                ..
            } => {
                assert_eq!(location.line, 2);
                assert_eq!(line_text, "y = (1 +");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_declaration_keeps_the_later_one() {
        let src = "@external\ndef f(a: int) -> int: ...\n\n@external\ndef f(b: str) -> str: ...\n";
        let result = compile(src, None).unwrap();
        assert_eq!(result.externals.len(), 1);
        assert_eq!(result.externals["f"].parameters[0].name, "b");
    }

    #[test]
    fn missing_annotations_are_recorded_as_absent() {
        let src = "@external\ndef f(x, *rest):\n    ...\n";
        let f = &compile(src, None).unwrap().externals["f"];
        assert_eq!(f.return_type, None);
        assert!(f.parameters.iter().all(|p| p.type_annotation.is_none()));
    }
}
