//! Configuration storage for the bench services.
//!
//! Configuration documents are JSON files stored under a single root directory,
//! `~/.htb_config/` by default, one file per named document.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Invalid config name '{0}'")]
    InvalidName(String),
}

/// Configuration storage manager.
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    /// Root directory for all configuration (e.g., ~/.htb_config)
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.htb_config)
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        let root_path = PathBuf::from(home).join(".htb_config");
        Ok(Self { root_path })
    }

    /// Create a new config storage with custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    /// Get the root configuration path
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Path of the document called `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, ConfigError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ConfigError::InvalidName(name.to_string()));
        }
        Ok(self.root_path.join(format!("{name}.json")))
    }

    /// Load a document.
    ///
    /// Returns None if the document does not exist.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<Result<T, ConfigError>> {
        let path = match self.path_for(name) {
            Ok(path) => path,
            Err(e) => return Some(Err(e)),
        };

        if !path.exists() {
            return None;
        }

        Some(load_json(&path))
    }

    /// Load a document, falling back to `T::default()` when it does not exist.
    pub fn get_or_default<T: DeserializeOwned + Default>(
        &self,
        name: &str,
    ) -> Result<T, ConfigError> {
        self.get(name).unwrap_or_else(|| Ok(T::default()))
    }

    /// Save a document as pretty-printed JSON.
    ///
    /// Creates the config directory if it doesn't exist.
    /// Returns the path where the document was saved.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ConfigError> {
        let path = self.path_for(name)?;
        std::fs::create_dir_all(&self.root_path)?;

        let json = serde_json::to_string_pretty(value).map_err(ConfigError::Serialize)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// List the names of all stored documents.
    pub fn list(&self) -> std::io::Result<Vec<String>> {
        if !self.root_path.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root_path)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a document.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete(&self, name: &str) -> Result<bool, ConfigError> {
        let path = self.path_for(name)?;

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(path)?;
        Ok(true)
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(PathBuf::from(".htb_config")))
    }
}

/// Read and parse a JSON file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    #[serde(default)]
    struct Interval {
        seconds: f64,
        label: String,
    }

    fn create_test_storage() -> (tempfile::TempDir, ConfigStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = ConfigStorage::with_path(dir.path().join("htb"));
        (dir, storage)
    }

    #[test]
    fn test_save_and_load() {
        let (_dir, storage) = create_test_storage();
        let value = Interval {
            seconds: 3.0,
            label: "tick".to_string(),
        };

        let path = storage.save("interval", &value).unwrap();
        assert!(path.exists());
        assert!(path.ends_with("interval.json"));

        let loaded: Interval = storage
            .get("interval")
            .expect("Config should exist")
            .expect("Config should load successfully");
        assert_relative_eq!(loaded.seconds, 3.0);
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_get_nonexistent() {
        let (_dir, storage) = create_test_storage();
        assert!(storage.get::<Interval>("missing").is_none());
        assert_eq!(
            storage.get_or_default::<Interval>("missing").unwrap(),
            Interval::default()
        );
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let (_dir, storage) = create_test_storage();
        std::fs::create_dir_all(storage.root_path()).unwrap();
        std::fs::write(storage.root_path().join("partial.json"), r#"{"seconds": 1.5}"#).unwrap();

        let loaded: Interval = storage.get("partial").unwrap().unwrap();
        assert_relative_eq!(loaded.seconds, 1.5);
        assert!(loaded.label.is_empty());
    }

    #[test]
    fn test_corrupt_document() {
        let (_dir, storage) = create_test_storage();
        std::fs::create_dir_all(storage.root_path()).unwrap();
        std::fs::write(storage.root_path().join("bad.json"), "{ nope").unwrap();

        let result = storage.get::<Interval>("bad").unwrap();
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_list_and_delete() {
        let (_dir, storage) = create_test_storage();
        assert!(storage.list().unwrap().is_empty());

        storage.save("b", &Interval::default()).unwrap();
        storage.save("a", &Interval::default()).unwrap();
        assert_eq!(storage.list().unwrap(), vec!["a", "b"]);

        assert!(storage.delete("a").unwrap());
        assert!(!storage.delete("a").unwrap());
        assert_eq!(storage.list().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_rejects_path_like_names() {
        let (_dir, storage) = create_test_storage();
        assert!(matches!(
            storage.save("../escape", &Interval::default()),
            Err(ConfigError::InvalidName(_))
        ));
        assert!(matches!(
            storage.get::<Interval>(""),
            Some(Err(ConfigError::InvalidName(_)))
        ));
    }
}
