use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Load a JSON config from `path`, writing the value produced by `initializer` there first when
/// the file does not exist yet.
pub fn load_or_init<T, F>(path: &Path, initializer: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    if path.exists() {
        read_json(path)
    } else {
        let value = initializer();
        write_json(path, &value)?;
        Ok(value)
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

/// Pretty-print `value` as JSON into `path`, creating parent directories as needed.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    fs::write(path, serialized).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Seeded {
        seed: u64,
    }

    #[test]
    fn initializes_missing_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");

        let first: Seeded = load_or_init(&path, || Seeded { seed: 7 }).unwrap();
        assert_eq!(first, Seeded { seed: 7 });
        assert!(path.exists());

        let second: Seeded = load_or_init(&path, || Seeded { seed: 99 }).unwrap();
        assert_eq!(second, Seeded { seed: 7 });
    }

    #[test]
    fn reports_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = read_json::<Seeded>(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }
}
