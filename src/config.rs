//! Engine configuration types.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the configuration file looked up by [`EngineConfig::load`].
pub const CONFIG_FILE: &str = "infer.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse infer.toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("max_fixpoint_iterations must be at least 1")]
    NoIterations,
}

/// Configuration for one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Entry point. `None` (or `entry = ""`) analyses the program as a library.
    pub entry: Option<String>,
    /// Extra functions that must resolve, as if called by the entry point
    pub roots: Vec<String>,
    /// Bound on rounds of every recursive fixpoint
    pub max_fixpoint_iterations: usize,
    /// Build contracts on the rayon thread pool (requires the `parallel` feature)
    pub parallel: bool,
    /// Report unresolved functions that are never instantiated as warnings
    pub warn_unreachable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry: Some("main".to_string()),
            roots: Vec::new(),
            max_fixpoint_iterations: 32,
            parallel: true,
            warn_unreachable: true,
        }
    }
}

impl EngineConfig {
    /// Library mode: no entry point, nothing is required.
    pub fn library() -> Self {
        Self {
            entry: None,
            ..Self::default()
        }
    }

    pub fn with_roots(mut self, roots: &[&str]) -> Self {
        self.roots = roots.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Entry point and roots, in that order.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.entry.iter().chain(self.roots.iter()).map(String::as_str)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        if config.entry.as_deref() == Some("") {
            config.entry = None;
        }
        if config.max_fixpoint_iterations == 0 {
            return Err(ConfigError::NoIterations);
        }
        Ok(config)
    }

    /// Load `infer.toml` from a directory
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
        Self::from_toml_str(&content)
    }

    /// Load `infer.toml` if the directory has one, defaults otherwise.
    pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
        if dir.join(CONFIG_FILE).exists() {
            Self::load(dir)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.entry.as_deref(), Some("main"));
        assert_eq!(config.max_fixpoint_iterations, 32);
        assert!(config.parallel);
        assert!(config.warn_unreachable);
        assert_eq!(config.required().collect::<Vec<_>>(), vec!["main"]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            roots = ["exported_api"]
            warn_unreachable = false
            "#,
        )
        .unwrap();
        assert_eq!(config.entry.as_deref(), Some("main"));
        assert_eq!(config.roots, vec!["exported_api".to_string()]);
        assert!(!config.warn_unreachable);
        assert_eq!(
            config.required().collect::<Vec<_>>(),
            vec!["main", "exported_api"]
        );
    }

    #[test]
    fn test_empty_entry_is_library_mode() {
        let config = EngineConfig::from_toml_str("entry = \"\"").unwrap();
        assert_eq!(config, EngineConfig::library());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = EngineConfig::from_toml_str("max_fixpoint_iterations = 0").unwrap_err();
        assert!(matches!(err, ConfigError::NoIterations));
    }

    #[test]
    fn test_load_from_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "entry = \"start\"\nparallel = false\n",
        )
        .unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.entry.as_deref(), Some("start"));
        assert!(!config.parallel);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            EngineConfig::load(dir.path()),
            Err(ConfigError::Read { .. })
        ));
        assert_eq!(
            EngineConfig::load_or_default(dir.path()).unwrap(),
            EngineConfig::default()
        );
    }
}
