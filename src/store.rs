//! Reading and writing JSON documents.

use std::fs;
use std::path::{Path, PathBuf};

use failure::ResultExt;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CapsuleError;

/// Read and deserialize the JSON document at `path`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, failure::Error> {
    let contents =
        fs::read_to_string(path).with_context(|_| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|_| format!("parsing {}", path.display()))?;
    Ok(value)
}

/// Like `load_json`, but any failure is a `CapsuleError::TemplateLoad`.
pub fn load_template<T: DeserializeOwned>(path: &Path) -> Result<T, CapsuleError> {
    let contents = fs::read_to_string(path).map_err(|e| CapsuleError::template_load(path, e))?;
    serde_json::from_str(&contents).map_err(|e| CapsuleError::template_load(path, e))
}

/// Serialize `value` the way the simulator's own examples are formatted: pretty-printed with four
/// spaces of indentation.
pub fn to_json_string<T: Serialize>(value: &T) -> Result<String, failure::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

/// Write `value` to `root/rel`, creating parent directories as needed. Returns the full path
/// written.
pub fn save_json<T: Serialize>(root: &Path, rel: &Path, value: &T) -> Result<PathBuf, CapsuleError> {
    let path = root.join(rel);

    let contents = to_json_string(value).map_err(|e| CapsuleError::save(&path, e))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CapsuleError::save(&path, e))?;
    }
    fs::write(&path, contents).map_err(|e| CapsuleError::save(&path, e))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tempdir::TempDir;

    #[test]
    fn save_creates_directories() {
        let dir = TempDir::new("store").unwrap();
        let value = json!({"a": [1, 2], "b": {"c": "d"}});

        let path = save_json(dir.path(), Path::new("x/y/z.json"), &value).unwrap();
        assert_eq!(path, dir.path().join("x/y/z.json"));

        let back: serde_json::Value = load_json(&path).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn four_space_indent() {
        let s = to_json_string(&json!({"a": 1})).unwrap();
        assert_eq!(s, "{\n    \"a\": 1\n}");
    }

    #[test]
    fn template_errors_name_the_file() {
        let dir = TempDir::new("store").unwrap();
        let missing = dir.path().join("missing.json");
        let err = load_template::<serde_json::Value>(&missing).unwrap_err();
        assert!(err.to_string().contains("missing.json"));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        match load_template::<serde_json::Value>(&broken) {
            Err(CapsuleError::TemplateLoad { path, .. }) => assert!(path.ends_with("broken.json")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn save_failure_is_reported() {
        let dir = TempDir::new("store").unwrap();
        // A file where a directory should be.
        fs::write(dir.path().join("blocker"), "").unwrap();
        let err = save_json(dir.path(), Path::new("blocker/a.json"), &json!({})).unwrap_err();
        match err {
            CapsuleError::Save { .. } => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
