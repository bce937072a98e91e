//! Workspace identity and the `.vault.json` config document.

use std::path::{Path, PathBuf};

use log::{error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkspaceError;

pub const CONFIG_FILE_NAME: &str = ".vault.json";
pub const PLUGINS_DIR_NAME: &str = "plugins";
pub const PLUGIN_MANIFEST_FILE: &str = "plugin.toml";
pub const PLUGIN_SETTINGS_FILE: &str = "settings.json";

/// LLM section of the workspace config: category defaults and per-category
/// model overrides. Provider-specific settings are passed through opaque.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_category")]
    pub default_category: String,
    #[serde(default)]
    pub categories: Map<String, Value>,
    #[serde(default)]
    pub providers: Map<String, Value>,
}

fn default_category() -> String {
    "fast".to_string()
}

/// The `.vault.json` document. Missing or malformed keys fall back to
/// defaults; only the workspace path itself is authoritative for identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub plugins: Map<String, Value>,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Any other top-level keys the config carries, preserved on save.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An on-disk directory identified by absolute path.
#[derive(Debug, Clone)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Validate that `path` exists and is a directory. The path itself is
    /// authoritative for workspace identity; no marker file is required.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let path = path.into();
        let canonical = std::fs::canonicalize(&path)
            .map_err(|_| WorkspaceError::InvalidPath(path.display().to_string()))?;
        if !canonical.is_dir() {
            return Err(WorkspaceError::InvalidPath(path.display().to_string()));
        }
        Ok(Self { path: canonical })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join(CONFIG_FILE_NAME)
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.path.join(PLUGINS_DIR_NAME)
    }

    /// Load `.vault.json`. Missing file or parse failure both resolve to
    /// defaults; the kernel never refuses to start over a bad config.
    pub fn load_config(&self) -> VaultConfig {
        let config_path = self.config_path();
        match std::fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(err) => {
                    error!("malformed workspace config at {}: {err}", config_path.display());
                    self.default_config()
                }
            },
            Err(_) => {
                warn!("no workspace config at {}, using defaults", config_path.display());
                self.default_config()
            }
        }
    }

    fn default_config(&self) -> VaultConfig {
        VaultConfig {
            name: Some(self.name()),
            ..Default::default()
        }
    }

    pub fn save_config(&self, config: &VaultConfig) -> std::io::Result<()> {
        let serialized = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_path(), serialized)
    }
}

/// Merge a plugin's local `settings.json` defaults with the workspace's
/// per-plugin override object. Workspace wins key-by-key at the top level.
/// A malformed override shape (anything but an object) is treated as
/// absent, not fatal.
pub fn merge_plugin_config(defaults: &Value, overrides: &Value) -> Value {
    let mut merged = match defaults {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(overrides) = overrides {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Whether the merged config enables this plugin. Default is disabled.
pub fn is_enabled(merged: &Value) -> bool {
    merged
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "not json").unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        let config = workspace.load_config();
        assert_eq!(config.name.as_deref(), Some(workspace.name().as_str()));
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        let config = workspace.load_config();
        assert_eq!(config.llm.default_category, "fast");
    }

    #[test]
    fn workspace_override_wins_over_plugin_defaults() {
        let defaults = serde_json::json!({"enabled": false, "greeting": "hi"});
        let overrides = serde_json::json!({"enabled": true});
        let merged = merge_plugin_config(&defaults, &overrides);
        assert_eq!(merged["enabled"], true);
        assert_eq!(merged["greeting"], "hi");
    }

    #[test]
    fn malformed_override_shape_is_treated_as_absent() {
        let defaults = serde_json::json!({"enabled": true});
        let overrides = serde_json::json!(["not", "an", "object"]);
        let merged = merge_plugin_config(&defaults, &overrides);
        assert_eq!(merged["enabled"], true);
    }

    #[test]
    fn invalid_workspace_path_is_rejected() {
        let result = Workspace::open("/does/not/exist/anywhere");
        assert!(result.is_err());
    }
}
