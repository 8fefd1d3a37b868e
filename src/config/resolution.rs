//! Layered settings resolution.
//!
//! Settings are merged from two levels, lowest priority first:
//!
//! 1. **User**: `{config_dir}/diary-pilot/settings.json` (shared credentials-free
//!    defaults such as a preferred provider or browser)
//! 2. **Project**: `<project>/.diary-pilot/settings.json`
//!
//! Objects merge key by key; any other value in a higher level replaces the
//! lower one, arrays included.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::PilotConfig;
use crate::error::{PilotError, Result};

/// Where a settings file sits in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigLevel {
    User,
    Project,
}

impl std::fmt::Display for ConfigLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// A settings file that took part in resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub level: ConfigLevel,
    pub path: PathBuf,
    /// False when the file did not exist.
    pub loaded: bool,
}

/// Loads [`PilotConfig`] with user-level inheritance.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_path: Self::default_user_path(),
        }
    }

    /// `{config_dir}/diary-pilot/settings.json`, when the platform has one.
    #[must_use]
    pub fn default_user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("diary-pilot").join(super::SETTINGS_FILE))
    }

    #[must_use]
    pub fn with_user_path(mut self, path: PathBuf) -> Self {
        self.user_path = Some(path);
        self
    }

    /// Ignore the user level entirely.
    #[must_use]
    pub fn without_user_config(mut self) -> Self {
        self.user_path = None;
        self
    }

    pub fn load(&self, project_dir: &Path) -> Result<PilotConfig> {
        self.load_with_sources(project_dir).map(|(config, _)| config)
    }

    /// Load and report which files were consulted.
    pub fn load_with_sources(&self, project_dir: &Path) -> Result<(PilotConfig, Vec<ConfigSource>)> {
        let mut merged = Value::Object(serde_json::Map::new());
        let mut sources = Vec::with_capacity(2);

        if let Some(user_path) = &self.user_path {
            let loaded = load_and_merge(&mut merged, user_path)?;
            sources.push(ConfigSource {
                level: ConfigLevel::User,
                path: user_path.clone(),
                loaded,
            });
        }

        let project_path = PilotConfig::settings_path(project_dir);
        let loaded = load_and_merge(&mut merged, &project_path)?;
        sources.push(ConfigSource {
            level: ConfigLevel::Project,
            path: project_path.clone(),
            loaded,
        });

        let config = serde_json::from_value(merged).map_err(|e| {
            PilotError::config_with_path(format!("Invalid settings: {e}"), project_path)
        })?;
        Ok((config, sources))
    }
}

/// Merge the file at `path` into `accumulated`. Returns false if it is absent.
fn load_and_merge(accumulated: &mut Value, path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        PilotError::config_with_path(format!("Failed to parse settings: {e}"), path.to_path_buf())
    })?;
    debug!("Loaded settings from {}", path.display());
    deep_merge(accumulated, value);
    Ok(true)
}

fn deep_merge(parent: &mut Value, child: Value) {
    match (parent, child) {
        (Value::Object(parent_map), Value::Object(child_map)) => {
            for (key, child_value) in child_map {
                match parent_map.get_mut(&key) {
                    Some(parent_value) => deep_merge(parent_value, child_value),
                    None => {
                        parent_map.insert(key, child_value);
                    }
                }
            }
        }
        (parent, child) => {
            *parent = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_deep_merge_objects_and_replace_arrays() {
        let mut parent = json!({"a": {"x": 1, "y": 2}, "list": [1, 2]});
        deep_merge(&mut parent, json!({"a": {"y": 3}, "list": [9]}));
        assert_eq!(parent, json!({"a": {"x": 1, "y": 3}, "list": [9]}));
    }

    #[test]
    fn test_project_overrides_user() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user").join("settings.json");
        write(
            &user,
            r#"{"llm": {"provider": "gemini", "maxRetries": 5}, "browser": {"kind": "firefox"}}"#,
        );
        let project = dir.path().join("project");
        write(
            &PilotConfig::settings_path(&project),
            r#"{"llm": {"provider": "groq"}}"#,
        );

        let (config, sources) = ConfigLoader::new()
            .with_user_path(user.clone())
            .load_with_sources(&project)
            .unwrap();

        assert_eq!(config.llm.provider, "groq");
        assert_eq!(config.llm.max_retries, 5);
        assert_eq!(config.browser.kind, "firefox");
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|s| s.loaded));
        assert_eq!(sources[0].level, ConfigLevel::User);
    }

    #[test]
    fn test_missing_files_are_reported_not_loaded() {
        let dir = TempDir::new().unwrap();
        let (config, sources) = ConfigLoader::new()
            .with_user_path(dir.path().join("nope.json"))
            .load_with_sources(dir.path())
            .unwrap();
        assert_eq!(config, PilotConfig::default());
        assert!(sources.iter().all(|s| !s.loaded));
    }

    #[test]
    fn test_invalid_json_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        write(&PilotConfig::settings_path(dir.path()), "{ not json");
        let err = ConfigLoader::new()
            .without_user_config()
            .load(dir.path())
            .unwrap_err();
        assert!(matches!(err, PilotError::Config { path: Some(_), .. }));
    }

    #[test]
    fn test_wrong_type_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        write(
            &PilotConfig::settings_path(dir.path()),
            r#"{"submission": {"formTimeoutSecs": "soon"}}"#,
        );
        let err = ConfigLoader::new()
            .without_user_config()
            .load(dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("Invalid settings"));
    }
}
