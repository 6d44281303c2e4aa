use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::{IdMatcher, MatcherConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecflowConfig {
    pub requirements_document: String,
    pub design_document: String,
    /// Name of the checklist document inside each feature directory.
    pub tasks_document: String,
    pub matcher: MatcherConfig,
}

impl Default for SpecflowConfig {
    fn default() -> Self {
        Self {
            requirements_document: "requirements.md".to_string(),
            design_document: "design.md".to_string(),
            tasks_document: "tasks.md".to_string(),
            matcher: MatcherConfig::default(),
        }
    }
}

impl SpecflowConfig {
    pub fn id_matcher(&self) -> IdMatcher {
        IdMatcher::from(&self.matcher)
    }
}

pub fn config_filename_candidates() -> [&'static str; 2] {
    [".specflow.toml", ".specflowrc"]
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(".specflow.toml")
}

/// Loads the first config candidate found under `root`.
///
/// A missing file is `Ok(None)`; a present but malformed one is an error.
pub fn load_config(root: &Path) -> Result<Option<SpecflowConfig>, ConfigError> {
    for name in config_filename_candidates() {
        let path = root.join(name);
        if path.is_file() {
            let text = fs::read_to_string(&path)?;
            let config = toml::from_str::<SpecflowConfig>(&text)?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}

pub fn load_config_or_default(root: &Path) -> Result<SpecflowConfig, ConfigError> {
    Ok(load_config(root)?.unwrap_or_default())
}

pub fn write_config(root: &Path, config: &SpecflowConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path(root);
    let body = toml::to_string_pretty(config)?;
    fs::write(&path, body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_and_read_config() {
        let temp = TempDir::new().expect("tempdir");
        let config = SpecflowConfig {
            tasks_document: "checklist.md".to_string(),
            ..SpecflowConfig::default()
        };
        let path = write_config(temp.path(), &config).expect("write");
        assert!(path.ends_with(".specflow.toml"));
        let loaded = load_config(temp.path()).expect("load").expect("config");
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_config_is_none() {
        let temp = TempDir::new().expect("tempdir");
        assert!(load_config(temp.path()).expect("load").is_none());
        assert_eq!(
            load_config_or_default(temp.path()).expect("default"),
            SpecflowConfig::default()
        );
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(
            temp.path().join(".specflowrc"),
            "[matcher]\ntrailing = \".:\"\n",
        )
        .expect("write");
        let loaded = load_config(temp.path()).expect("load").expect("config");
        assert_eq!(loaded.tasks_document, "tasks.md");
        assert_eq!(loaded.matcher.trailing, ".:");
        assert_eq!(loaded.matcher.leading, MatcherConfig::default().leading);
        assert!(!loaded.id_matcher().trailing.contains(&')'));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(config_path(temp.path()), "tasks_document = [").expect("write");
        assert!(matches!(load_config(temp.path()), Err(ConfigError::Parse(_))));
    }
}
