//! Locating and loading script files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::HarnessError;
use crate::spec::CmapScript;

/// Expand `paths` into script files: files are kept as given, directories
/// contribute their `*.json` entries in name order.
///
/// # Errors
/// Returns [`HarnessError::Load`] if a path does not exist or a directory cannot be read.
pub fn collect_script_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>, HarnessError> {
    let mut scripts = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries = read_json_entries(path)?;
            entries.sort();
            scripts.extend(entries);
        } else if path.is_file() {
            scripts.push(path.clone());
        } else {
            return Err(HarnessError::Load {
                path: path.clone(),
                reason: "no such file or directory".to_string(),
            });
        }
    }
    Ok(scripts)
}

fn read_json_entries(dir: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    let load_error = |err: std::io::Error| HarnessError::Load {
        path: dir.to_path_buf(),
        reason: err.to_string(),
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(load_error)? {
        let path = entry.map_err(load_error)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            entries.push(path);
        }
    }
    Ok(entries)
}

/// Load every script under `paths`, paired with the file it came from.
///
/// # Errors
/// Fails on the first path that cannot be collected, read, or parsed.
pub fn load_scripts(paths: &[PathBuf]) -> Result<Vec<(PathBuf, CmapScript)>, HarnessError> {
    collect_script_paths(paths)?
        .into_iter()
        .map(|path| {
            let script = CmapScript::from_json_path(&path)?;
            Ok((path, script))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SCRIPT: &str = r#"{ "description": "d", "operations": [{ "name": "checkOut" }] }"#;

    #[test]
    fn directories_contribute_sorted_json_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.json"), SCRIPT).unwrap();
        fs::write(dir.path().join("a.json"), SCRIPT).unwrap();
        fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let paths = collect_script_paths(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.json", "b.json"]);
        assert_eq!(load_scripts(&paths).unwrap().len(), 2);
    }

    #[test]
    fn missing_path_is_a_load_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let err = collect_script_paths(&[missing]).unwrap_err();
        assert!(matches!(err, HarnessError::Load { .. }));
    }

    #[test]
    fn malformed_script_names_its_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "operations": [{ "name": "nope" }] }"#).unwrap();
        let err = load_scripts(&[path]).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}
