use std::fs;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::compiler::CheckerConfig;
use crate::error::{GrailError, Result};

/// Default directory for build artifacts, relative to the working directory.
pub const DEFAULT_ARTIFACTS_DIR: &str = ".grail";

/// User settings, read from a JSON file. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Settings {
    /// Scripts longer than this draw a W003 warning.
    pub max_script_lines: usize,
    /// Importable modules beyond `grail`, `typing` and `__future__`.
    pub allowed_modules: Vec<String>,
    /// Treat any check error as a load failure.
    pub strict: bool,
    pub artifacts_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let checker = CheckerConfig::default();
        Self {
            max_script_lines: checker.max_script_lines,
            allowed_modules: checker.allowed_modules,
            strict: false,
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
        }
    }
}

impl Settings {
    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig {
            max_script_lines: self.max_script_lines,
            allowed_modules: self.allowed_modules.clone(),
        }
    }
}

/// Load settings from `path`. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no settings file; using defaults");
        return Ok(Settings::default());
    }
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| GrailError::Config {
        message: format!("{}: {e}", path.display()),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("grail.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.max_script_lines, 200);
        assert!(!settings.strict);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grail.json");
        fs::write(&path, r#"{"allowed_modules": ["json"], "strict": true}"#).unwrap();
        let settings = load_settings(&path).unwrap();
        assert!(settings.strict);
        assert_eq!(settings.max_script_lines, 200);
        assert_eq!(settings.checker_config().allowed_modules, vec!["json"]);
        assert_eq!(settings.artifacts_dir, PathBuf::from(".grail"));
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grail.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_settings(&path),
            Err(GrailError::Config { .. })
        ));
    }
}
