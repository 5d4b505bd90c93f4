//! End-to-end pipeline tests: compile once, then check, strip and stub the
//! same parse, including concurrently from several threads.
#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

use grail::compiler::{ParamKind, ParseResult};
use grail::config::Settings;
use grail::script::compile_script;
use grail::{check, compile, generate, synthesize_stub, GrailError};

const BUDGET_SCRIPT: &str = "\
from grail import external, Input

budget: float = Input(\"budget\")

@external
async def fetch(id: int) -> str:
    \"\"\"Fetch one record by id.\"\"\"
    ...

records = []
for i in range(3):
    record = await fetch(i)
    if len(records) < budget:
        records.append(record)
    else:
        break
records
";

fn parse(src: &str) -> ParseResult {
    compile(src, Some("budget.pym")).unwrap()
}

#[test]
fn budget_example_end_to_end() {
    let parsed = parse(BUDGET_SCRIPT);

    let report = check(&parsed);
    assert!(report.valid, "{:?}", report.errors);
    assert_eq!(report.file.as_deref(), Some("budget.pym"));

    let (code, map) = generate(&parsed).unwrap();
    assert!(!code.contains("Input"));
    assert!(!code.contains("@external"));
    assert!(!code.contains("grail"));
    assert!(code.starts_with("records = []\n"));
    // the stripped text re-parses
    compile(&code, None).unwrap();

    // every stripped line maps to a real original line or to nothing
    let original_lines = BUDGET_SCRIPT.lines().count();
    for (stripped, original) in map.entries() {
        if let Some(original) = original {
            assert!(original >= 1 && original <= original_lines, "line {stripped}");
        }
    }
    assert_eq!(map.to_original(1), Some(10));
    let else_line = code.lines().position(|l| l.trim() == "else:").unwrap() + 1;
    assert_eq!(map.to_original(else_line), None);

    let stub = synthesize_stub(&parsed);
    assert_eq!(
        stub,
        "budget: float\n\nasync def fetch(id: int) -> str:\n    \"\"\"Fetch one record by id.\"\"\"\n    ...\n"
    );
}

#[test]
fn one_of_each_parameter_kind() {
    let parsed = parse("@external\ndef f(a: int, /, b: int = 1, *rest: int, c: int = 2, **extra: int) -> None: ...\n");
    let params = &parsed.externals["f"].parameters;
    let shape: Vec<(ParamKind, bool)> = params.iter().map(|p| (p.kind, p.has_default)).collect();
    assert_eq!(
        shape,
        vec![
            (ParamKind::PositionalOnly, false),
            (ParamKind::PositionalOrKeyword, true),
            (ParamKind::VarPositional, false),
            (ParamKind::KeywordOnly, true),
            (ParamKind::VarKeyword, false),
        ]
    );
}

#[test]
fn stripping_is_precise() {
    let src = "y: int = Input(\"y\")\nz = y\ny = 42\n";
    let (code, _) = generate(&parse(src)).unwrap();
    assert_eq!(code, "z = y\ny = 42\n");
}

#[test]
fn valid_scripts_always_regenerate_to_valid_text() {
    let scripts = [
        "x = (1 if a else 2) + (lambda_value := 3)\n",
        "def f(*args, key=None, **kw):\n    return [k for k in kw if k]\n",
        "try:\n    a()\nexcept (KeyError, ValueError) as e:\n    raise RuntimeError('x') from e\nelse:\n    b()\nfinally:\n    c()\n",
        "while n > 0:\n    n -= 1\n    if n % 2:\n        continue\nelse:\n    done = True\n",
        "data = {'a': [1, 2], **extra}\nvalue = data['a'][-1:]\nmsg = f\"{value}\"\n",
        "async def g():\n    async for item in source():\n        await sink(item)\n",
        "x = not a or b and c\ny = -x ** 2\nz = (-x) ** 2\n",
    ];
    for src in scripts {
        let parsed = parse(src);
        let (code, map) = generate(&parsed).unwrap();
        compile(&code, None).unwrap();
        assert_eq!(map.len(), code.lines().count(), "{src}");
    }
}

#[test]
fn stub_is_deterministic_across_declaration_order() {
    let forward = "\
a: int = Input(\"a\")
b: Optional[str] = Input(\"b\")

@external
def one(x: int) -> int: ...

@external
def two(y: Dict[str, int]) -> int: ...
";
    let backward = "\
@external
def two(y: Dict[str, int]) -> int: ...

@external
def one(x: int) -> int: ...

b: Optional[str] = Input(\"b\")
a: int = Input(\"a\")
";
    let first = synthesize_stub(&parse(forward));
    assert_eq!(first, synthesize_stub(&parse(backward)));
    assert!(first.starts_with("from typing import Dict, Optional\n"));
}

#[test]
fn stages_run_concurrently_over_one_parse() {
    let parsed = parse(BUDGET_SCRIPT);
    let expected_code = generate(&parsed).unwrap().0;
    let expected_stub = synthesize_stub(&parsed);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    let report = check(&parsed);
                    let (code, _) = generate(&parsed).unwrap();
                    let stub = synthesize_stub(&parsed);
                    (report.valid, code, stub)
                })
            })
            .collect();
        for handle in handles {
            let (valid, code, stub) = handle.join().unwrap();
            assert!(valid);
            assert_eq!(code, expected_code);
            assert_eq!(stub, expected_stub);
        }
    });

    // independent compilations of different scripts in parallel
    std::thread::scope(|scope| {
        let a = scope.spawn(|| compile("a: int = Input(\"a\")\na\n", None).unwrap());
        let b = scope.spawn(|| compile("b: str = Input(\"b\")\nb\n", None).unwrap());
        let (a, b) = (a.join().unwrap(), b.join().unwrap());
        assert!(a.inputs.contains_key("a") && !a.inputs.contains_key("b"));
        assert!(b.inputs.contains_key("b") && !b.inputs.contains_key("a"));
    });
}

#[test]
fn script_bundle_maps_interpreter_errors_to_original_lines() {
    let script = compile_script(BUDGET_SCRIPT, Some("budget.pym"), &Settings::default()).unwrap();
    let report = script.describe_interpreter_error("TypeError on line 3", None);
    assert_eq!(report.line, Some(12));
    assert_eq!(
        report.source_line.as_deref(),
        Some("    record = await fetch(i)")
    );
}

#[test]
fn pathological_nesting_is_a_syntax_error() {
    let parens = format!("x = {}1{}\n", "(".repeat(5000), ")".repeat(5000));
    match compile(&parens, Some("deep.pym")) {
        Err(GrailError::Syntax {
            message,
            location,
            ..
        }) => {
            assert_eq!(message, "too many nested parentheses");
            assert_eq!(location.line, 1);
        }
        other => panic!("expected a syntax error, got {other:?}"),
    }

    let sum = format!("x = {}\n", vec!["1"; 3000].join(" + "));
    assert!(matches!(compile(&sum, None), Err(GrailError::Syntax { .. })));

    // moderate nesting still goes through every stage
    let nested = format!("x = {}1{}\nx\n", "(".repeat(100), ")".repeat(100));
    let parsed = compile(&nested, None).unwrap();
    assert!(check(&parsed).valid);
    assert_eq!(generate(&parsed).unwrap().0, "x = 1\nx\n");
}

#[test]
fn declaration_errors_quote_the_source_line() {
    let err = compile("x = 1\nbudget: float = Input(\"total\")\n", None).unwrap_err();
    assert_eq!(err.line(), Some(2));
    assert!(
        err.to_string().ends_with("\n    budget: float = Input(\"total\")"),
        "{err}"
    );
}
