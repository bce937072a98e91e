//! `plugin.toml` manifest: declares which compiled-in factory a discovered
//! plugin directory maps to.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const MANIFEST_FILE: &str = "plugin.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub plugin: PluginManifestEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifestEntry {
    /// Human-readable name, independent of the directory id.
    pub name: String,
    /// Key into the compiled-in factory registry (see `plugin::builtin`).
    pub factory: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl PluginManifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read plugin manifest `{}`", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse plugin manifest `{}`", path.display()))
    }
}
