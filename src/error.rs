use serde::Serialize;
use thiserror::Error;

use crate::compiler::Location;

/// Every failure the compiler and its shell can surface.
///
/// Serializes as `{"code": ..., "detail": {...}}` so reports written by the
/// CLI can be matched on by code.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "code", content = "detail")]
pub enum GrailError {
    /// The source text is not parseable at all.
    #[error("syntax error at {location}: {message}\n    {line_text}")]
    Syntax {
        message: String,
        location: Location,
        line_text: String,
    },

    /// `x = Input("y")`: the declared input name disagrees with the variable.
    #[error(
        "declaration error at {location}: Input name '{declared}' does not match variable '{variable}'\n    {line_text}"
    )]
    BindingMismatch {
        declared: String,
        variable: String,
        location: Location,
        line_text: String,
    },

    #[error("declaration error at {location}: {message}\n    {line_text}")]
    MalformedDeclaration {
        message: String,
        location: Location,
        line_text: String,
    },

    /// Regenerated text failed to re-parse. Always a stripper defect.
    #[error("code generation failed: {message}\n  statement: {statement}\n  generated:\n{generated}")]
    Generation {
        message: String,
        statement: String,
        generated: String,
    },

    #[error("{file} failed compatibility check:\n{}", .messages.join("\n"))]
    CheckFailed { file: String, messages: Vec<String> },

    #[error("missing required input: '{name}' (type: {type_annotation})")]
    MissingInput {
        name: String,
        type_annotation: String,
    },

    #[error("missing external function: '{name}'")]
    MissingExternal { name: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("config error: {message}")]
    Config { message: String },
}

pub type Result<T> = std::result::Result<T, GrailError>;

impl GrailError {
    /// Original source line the error points at, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            GrailError::Syntax { location, .. }
            | GrailError::BindingMismatch { location, .. }
            | GrailError::MalformedDeclaration { location, .. } => Some(location.line),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GrailError {
    fn from(e: std::io::Error) -> Self {
        GrailError::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for GrailError {
    fn from(e: serde_json::Error) -> Self {
        GrailError::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_the_offending_line() {
        let err = GrailError::Syntax {
            message: "invalid syntax".into(),
            location: Location::new(3, 5),
            line_text: "x = = 1".into(),
        };
        let text = err.to_string();
        assert!(text.starts_with("syntax error at line 3, column 5: invalid syntax"));
        assert!(text.ends_with("x = = 1"));
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn serializes_with_code_tag() {
        let err = GrailError::MissingExternal {
            name: "fetch".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "MissingExternal");
        assert_eq!(json["detail"]["name"], "fetch");
        assert_eq!(err.line(), None);
    }

    #[test]
    fn binding_mismatch_names_both_sides() {
        let err = GrailError::BindingMismatch {
            declared: "total".into(),
            variable: "budget".into(),
            location: Location::new(2, 1),
            line_text: "budget: float = Input(\"total\")".into(),
        };
        let text = err.to_string();
        assert!(text.contains("'total'") && text.contains("'budget'"), "{text}");
        assert!(text.ends_with("\n    budget: float = Input(\"total\")"), "{text}");
        assert_eq!(err.line(), Some(2));
    }
}
