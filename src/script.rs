//! A compiled script: every pipeline stage run once, plus the helpers a
//! runner needs around the interpreter call (binding validation and
//! mapping interpreter line numbers back to the original script).

use std::fmt;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::compiler::{
    check_with, compile, generate, synthesize_stub, CheckResult, ExternalSpec, InputSpec,
    ParseResult, SourceMap,
};
use crate::config::Settings;
use crate::error::{GrailError, Result};

/// Name used when a script has no identifier.
const ANONYMOUS: &str = "script";

#[derive(Debug, Clone)]
pub struct CompiledScript {
    pub name: String,
    pub parse_result: ParseResult,
    pub check_result: CheckResult,
    /// Stripped text handed to the interpreter.
    pub code: String,
    pub stub: String,
    pub source_map: SourceMap,
}

/// Run the pipeline over in-memory source.
///
/// parse → check → stub → strip
pub fn compile_script(
    source: &str,
    source_identifier: Option<&str>,
    settings: &Settings,
) -> Result<CompiledScript> {
    let name = source_identifier
        .and_then(|id| Path::new(id).file_stem())
        .and_then(|stem| stem.to_str())
        .unwrap_or(ANONYMOUS)
        .to_string();

    let parse_result = compile(source, source_identifier)?;
    let check_result = check_with(&parse_result, &settings.checker_config());
    if settings.strict && !check_result.valid {
        let messages = check_result
            .errors
            .iter()
            .map(|m| {
                format!(
                    "  line {}: {} {}\n    {}",
                    m.line,
                    m.code,
                    m.message,
                    parse_result.line_text(m.line).unwrap_or("").trim()
                )
            })
            .collect();
        return Err(GrailError::CheckFailed {
            file: source_identifier.unwrap_or(ANONYMOUS).to_string(),
            messages,
        });
    }
    let stub = synthesize_stub(&parse_result);
    let (code, source_map) = generate(&parse_result)?;

    debug!(
        script = %name,
        valid = check_result.valid,
        lines = source_map.len(),
        "compiled script"
    );
    Ok(CompiledScript {
        name,
        parse_result,
        check_result,
        code,
        stub,
        source_map,
    })
}

/// Read and compile a `.pym` file.
pub fn load(path: &Path, settings: &Settings) -> Result<CompiledScript> {
    let source = fs::read_to_string(path).map_err(|e| GrailError::Io {
        message: format!("{}: {e}", path.display()),
    })?;
    compile_script(&source, Some(&path.display().to_string()), settings)
}

/// Names supplied at run time that the script does not declare.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindingReport {
    pub extra_inputs: Vec<String>,
    pub extra_externals: Vec<String>,
}

impl BindingReport {
    pub fn warnings(&self) -> Vec<String> {
        let inputs = self
            .extra_inputs
            .iter()
            .map(|name| format!("extra input '{name}' not declared in script"));
        let externals = self
            .extra_externals
            .iter()
            .map(|name| format!("extra external '{name}' not declared in script"));
        inputs.chain(externals).collect()
    }
}

/// An interpreter failure translated back to the original script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub message: String,
    /// Line as reported by the interpreter (stripped text).
    pub interpreter_line: Option<usize>,
    /// Corresponding line of the original script.
    pub line: Option<usize>,
    /// Original source text of `line`.
    pub source_line: Option<String>,
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {line}: ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(source) = &self.source_line {
            write!(f, "\n    {}", source.trim())?;
        }
        Ok(())
    }
}

impl CompiledScript {
    pub fn externals(&self) -> &IndexMap<String, ExternalSpec> {
        &self.parse_result.externals
    }

    pub fn inputs(&self) -> &IndexMap<String, InputSpec> {
        &self.parse_result.inputs
    }

    /// Check the names a caller is about to bind against the declarations.
    ///
    /// A missing required input or missing external is an error; extra
    /// names are reported and logged.
    pub fn validate_bindings(
        &self,
        input_names: &[&str],
        external_names: &[&str],
    ) -> Result<BindingReport> {
        for (name, spec) in self.inputs() {
            if spec.required() && !input_names.contains(&name.as_str()) {
                return Err(GrailError::MissingInput {
                    name: name.clone(),
                    type_annotation: spec
                        .type_annotation
                        .clone()
                        .unwrap_or_else(|| "Any".to_string()),
                });
            }
        }
        for name in self.externals().keys() {
            if !external_names.contains(&name.as_str()) {
                return Err(GrailError::MissingExternal { name: name.clone() });
            }
        }

        let report = BindingReport {
            extra_inputs: input_names
                .iter()
                .filter(|n| !self.inputs().contains_key(**n))
                .map(|n| (*n).to_string())
                .collect(),
            extra_externals: external_names
                .iter()
                .filter(|n| !self.externals().contains_key(**n))
                .map(|n| (*n).to_string())
                .collect(),
        };
        for warning in report.warnings() {
            warn!(script = %self.name, "{warning}");
        }
        Ok(report)
    }

    /// Original line for an interpreter-reported (stripped) line.
    pub fn map_interpreter_line(&self, line: usize) -> Option<usize> {
        self.source_map.to_original(line)
    }

    /// Translate an interpreter error. The line comes from `line` or, when
    /// absent, from a `line N` mention in the message.
    pub fn describe_interpreter_error(&self, message: &str, line: Option<usize>) -> ExecutionReport {
        let interpreter_line = line.or_else(|| line_mentioned(message));
        let original = interpreter_line.and_then(|l| self.map_interpreter_line(l));
        ExecutionReport {
            message: message.to_string(),
            interpreter_line,
            line: original,
            source_line: original
                .and_then(|l| self.parse_result.line_text(l))
                .map(str::to_string),
        }
    }
}

/// First `line N` in `message`, case-insensitive.
fn line_mentioned(message: &str) -> Option<usize> {
    let lower = message.to_ascii_lowercase();
    lower.match_indices("line").find_map(|(i, _)| {
        let preceded_by_word = lower
            .get(..i)
            .and_then(|before| before.chars().next_back())
            .is_some_and(char::is_alphanumeric);
        if preceded_by_word {
            return None;
        }
        let rest = lower.get(i + 4..)?;
        let digits_at = rest.strip_prefix(' ')?;
        let end = digits_at
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits_at.len());
        digits_at.get(..end)?.parse().ok()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;

    const BUDGET: &str = "\
from grail import external, Input

budget: float = Input(\"budget\")
limit: int = Input(\"limit\", default=3)

@external
async def fetch(id: int) -> str:
    ...

data = await fetch(limit)
if len(data) > budget:
    raise ValueError(\"over budget\")
data
";

    fn compiled() -> CompiledScript {
        compile_script(BUDGET, Some("scripts/budget.pym"), &Settings::default()).unwrap()
    }

    #[test]
    fn compiles_every_artifact() {
        let script = compiled();
        assert_eq!(script.name, "budget");
        assert!(script.check_result.valid);
        assert_eq!(script.check_result.file.as_deref(), Some("scripts/budget.pym"));
        assert!(script.code.starts_with("data = await fetch(limit)\n"));
        assert!(script.stub.contains("async def fetch(id: int) -> str: ..."));
        assert_eq!(script.source_map.len(), 4);
    }

    #[test]
    fn anonymous_scripts_get_a_default_name() {
        let script = compile_script("x = 1\n", None, &Settings::default()).unwrap();
        assert_eq!(script.name, "script");
    }

    #[test]
    fn strict_mode_rejects_invalid_scripts_quoting_source() {
        let settings = Settings {
            strict: true,
            ..Settings::default()
        };
        let err = compile_script("x = 1\nclass Foo:\n    pass\n", Some("a.pym"), &settings)
            .unwrap_err();
        match err {
            GrailError::CheckFailed { file, messages } => {
                assert_eq!(file, "a.pym");
                assert_eq!(messages.len(), 1);
                assert!(messages[0].contains("E001"));
                assert!(messages[0].ends_with("class Foo:"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // non-strict loads still succeed
        assert!(compile_script("class Foo:\n    pass\n", None, &Settings::default()).is_ok());
    }

    #[test]
    fn binding_validation() {
        let script = compiled();
        let report = script
            .validate_bindings(&["budget", "extra"], &["fetch", "other"])
            .unwrap();
        assert_eq!(report.extra_inputs, vec!["extra"]);
        assert_eq!(report.extra_externals, vec!["other"]);
        assert_eq!(report.warnings().len(), 2);

        match script.validate_bindings(&["limit"], &["fetch"]) {
            Err(GrailError::MissingInput {
                name,
                type_annotation,
            }) => {
                assert_eq!(name, "budget");
                assert_eq!(type_annotation, "float");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            script.validate_bindings(&["budget"], &[]),
            Err(GrailError::MissingExternal { .. })
        ));
    }

    #[test]
    fn interpreter_errors_quote_original_lines() {
        let script = compiled();
        assert_eq!(script.map_interpreter_line(3), Some(12));

        let report = script.describe_interpreter_error("ValueError: over budget", Some(3));
        assert_eq!(report.line, Some(12));
        assert_eq!(
            report.source_line.as_deref(),
            Some("    raise ValueError(\"over budget\")")
        );
        assert!(report.to_string().starts_with("line 12: ValueError"));

        let parsed = script.describe_interpreter_error("NameError at Line 1, column 4", None);
        assert_eq!(parsed.interpreter_line, Some(1));
        assert_eq!(parsed.line, Some(10));

        let unknown = script.describe_interpreter_error("boom", None);
        assert_eq!(unknown.line, None);
        assert_eq!(unknown.to_string(), "boom");
    }

    #[test]
    fn line_mentions() {
        assert_eq!(line_mentioned("error on line 42: bad"), Some(42));
        assert_eq!(line_mentioned("LINE 7"), Some(7));
        assert_eq!(line_mentioned("pipeline 3 then line 9"), Some(9));
        assert_eq!(line_mentioned("no numbers here"), None);
    }

    #[test]
    fn load_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calc.pym");
        fs::write(&path, "x: int = Input(\"x\")\nx * 2\n").unwrap();
        let script = load(&path, &Settings::default()).unwrap();
        assert_eq!(script.name, "calc");
        assert_eq!(script.code, "x * 2\n");

        let missing = load(&dir.path().join("nope.pym"), &Settings::default());
        assert!(matches!(missing, Err(GrailError::Io { .. })));
    }
}
