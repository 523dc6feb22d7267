//! Storage configuration.
//!
//! Every component receives its roots from a `StorageConfig` at construction
//! time; nothing in the crate reads paths from process-wide state.

use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

pub const DEFAULT_WIKI_DIR: &str = "./wikidir";
pub const DEFAULT_TAG_DIR_NAME: &str = "tags";
pub const DEFAULT_PUB_DIR_NAME: &str = "pub";
pub const DEFAULT_RAW_EXTENSION: &str = "PDF";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the content tree.
    pub wiki_dir: PathBuf,
    /// Tag sidecar root; defaults to `<wiki_dir>/tags`.
    pub tag_dir: Option<PathBuf>,
    /// Publish marker root; defaults to `<wiki_dir>/pub`.
    pub pub_dir: Option<PathBuf>,
    /// Extension surfaced as a synthetic tag (matched case-insensitively).
    pub raw_extension: String,
    /// Size of the worker pool shared by search and index rebuilds.
    /// `0` sizes the pool to the available parallelism.
    pub worker_threads: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WIKI_DIR)
    }
}

impl StorageConfig {
    pub fn new(wiki_dir: impl Into<PathBuf>) -> Self {
        Self {
            wiki_dir: wiki_dir.into(),
            tag_dir: None,
            pub_dir: None,
            raw_extension: DEFAULT_RAW_EXTENSION.to_string(),
            worker_threads: 0,
        }
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Loads configuration from an optional JSON file, then applies
    /// environment overrides. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match fs::read(path) {
            Ok(bytes) => {
                log::info!("wiki storage config loaded path={}", path.display());
                serde_json::from_slice(&bytes).map_err(|error| {
                    StorageError::InvalidInput(format!(
                        "malformed config {}: {error}",
                        path.display()
                    ))
                })?
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(error) => return Err(StorageError::from_io(path, error)),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value_of = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(value) = value_of("WIKIDIR") {
            self.wiki_dir = PathBuf::from(value);
        }
        if let Some(value) = value_of("TAGDIR") {
            self.tag_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = value_of("PUBDIR") {
            self.pub_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = value_of("RAWEXTENSION") {
            self.raw_extension = value;
        }
        if let Some(value) = value_of("WIKIWORKERS") {
            match value.parse() {
                Ok(workers) => self.worker_threads = workers,
                Err(_) => log::warn!("ignoring non-numeric WIKIWORKERS value={value}"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.wiki_dir.as_os_str().is_empty() {
            return Err(StorageError::InvalidInput(
                "wiki_dir must not be empty".to_string(),
            ));
        }
        if self.raw_extension.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "raw_extension must not be empty".to_string(),
            ));
        }

        let reserved = self.reserved_dirs();
        for name in &reserved {
            if name.is_empty() || name.starts_with('.') {
                return Err(StorageError::InvalidInput(format!(
                    "reserved directory name {name:?} must be non-empty and visible"
                )));
            }
        }
        if reserved.len() == 2 && reserved[0] == reserved[1] {
            return Err(StorageError::InvalidInput(format!(
                "tag and publish roots share the name {:?}",
                reserved[0]
            )));
        }
        Ok(())
    }

    pub fn tag_dir(&self) -> PathBuf {
        self.tag_dir
            .clone()
            .unwrap_or_else(|| self.wiki_dir.join(DEFAULT_TAG_DIR_NAME))
    }

    pub fn pub_dir(&self) -> PathBuf {
        self.pub_dir
            .clone()
            .unwrap_or_else(|| self.wiki_dir.join(DEFAULT_PUB_DIR_NAME))
    }

    /// Directory names that navigation never descends into and that page
    /// titles may not use as a component.
    pub fn reserved_dirs(&self) -> Vec<String> {
        [self.tag_dir(), self.pub_dir()]
            .iter()
            .map(|dir| {
                dir.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// The worker pool size with `0` resolved.
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn roots_default_under_wiki_dir() {
        let config = StorageConfig::new("/srv/wiki");
        assert_eq!(config.tag_dir(), PathBuf::from("/srv/wiki/tags"));
        assert_eq!(config.pub_dir(), PathBuf::from("/srv/wiki/pub"));
        assert_eq!(config.reserved_dirs(), vec!["tags", "pub"]);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("WIKIDIR", "/data/wiki"),
            ("WIKIWORKERS", "3"),
            ("RAWEXTENSION", ""),
        ]
        .into_iter()
        .collect();

        let mut config = StorageConfig::new("/srv/wiki");
        config.apply_env(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.wiki_dir, PathBuf::from("/data/wiki"));
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.raw_extension, DEFAULT_RAW_EXTENSION);
    }

    #[test]
    fn load_reads_json_and_fills_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "wiki_dir": "/notes", "worker_threads": 2 }"#).expect("write");

        let config = StorageConfig::load(&path).expect("load");
        assert_eq!(config.tag_dir(), PathBuf::from("/notes/tags"));
        assert_eq!(config.raw_extension, "PDF");
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").expect("write");

        let err = StorageConfig::load(&path).expect_err("malformed");
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[test]
    fn validate_rejects_colliding_reserved_names() {
        let mut config = StorageConfig::new("/srv/wiki");
        config.pub_dir = Some(PathBuf::from("/elsewhere/tags"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_resolves_to_parallelism() {
        let config = StorageConfig::new("/srv/wiki");
        assert!(config.effective_worker_threads() >= 1);
        assert_eq!(config.with_worker_threads(5).effective_worker_threads(), 5);
    }
}
