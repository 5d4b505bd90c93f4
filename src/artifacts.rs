//! On-disk build outputs for inspection.
//!
//! Layout, one directory per script:
//!
//! ```text
//! <root>/<name>/monty_code.py
//!              /stubs.pyi
//!              /check.json
//!              /source_map.json
//!              /externals.json
//!              /inputs.json
//! ```

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::script::CompiledScript;

pub const CODE_FILE: &str = "monty_code.py";
pub const STUB_FILE: &str = "stubs.pyi";
pub const CHECK_FILE: &str = "check.json";
pub const SOURCE_MAP_FILE: &str = "source_map.json";
pub const EXTERNALS_FILE: &str = "externals.json";
pub const INPUTS_FILE: &str = "inputs.json";

/// Write every artifact of `script` under `root`. Returns the script's
/// artifact directory.
pub fn write_artifacts(root: &Path, script: &CompiledScript) -> Result<PathBuf> {
    let dir = root.join(&script.name);
    fs::create_dir_all(&dir)?;

    atomic_write(&dir.join(CODE_FILE), script.code.as_bytes())?;
    atomic_write(&dir.join(STUB_FILE), script.stub.as_bytes())?;
    write_json(&dir.join(CHECK_FILE), &script.check_result)?;
    write_json(&dir.join(SOURCE_MAP_FILE), &script.source_map)?;
    write_json(&dir.join(EXTERNALS_FILE), script.externals())?;
    write_json(&dir.join(INPUTS_FILE), script.inputs())?;

    tracing::debug!(dir = %dir.display(), "wrote artifacts");
    Ok(dir)
}

/// Write `data` to a sibling temp file, fsync, then rename over `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path.file_name().unwrap_or_default();
    let mut tmp_name = OsString::from(file_name);
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(&tmp_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    atomic_write(path, json.as_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::script::compile_script;

    #[test]
    fn writes_every_artifact() {
        let src = "n: int = Input(\"n\")\n\n@external\ndef double(x: int) -> int: ...\n\ndouble(n)\n";
        let script = compile_script(src, Some("double.pym"), &Settings::default()).unwrap();
        let root = tempfile::tempdir().unwrap();

        let dir = write_artifacts(root.path(), &script).unwrap();
        assert_eq!(dir, root.path().join("double"));

        assert_eq!(fs::read_to_string(dir.join(CODE_FILE)).unwrap(), "double(n)\n");
        assert_eq!(fs::read_to_string(dir.join(STUB_FILE)).unwrap(), script.stub);

        let check: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(CHECK_FILE)).unwrap()).unwrap();
        assert_eq!(check["valid"], true);
        assert_eq!(check["file"], "double.pym");

        let map: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(SOURCE_MAP_FILE)).unwrap()).unwrap();
        assert_eq!(map["stripped_to_original"], serde_json::json!([6]));

        let externals: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(EXTERNALS_FILE)).unwrap()).unwrap();
        assert_eq!(externals["double"]["parameters"][0]["kind"], "positional_or_keyword");
        let inputs: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(INPUTS_FILE)).unwrap()).unwrap();
        assert_eq!(inputs["n"]["type_annotation"], "int");

        // no temp files left behind
        let leftovers = fs::read_dir(&dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }
}
