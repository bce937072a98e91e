//! Discovery, config merge, two-phase load/activate, unload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::RwLock;
use serde_json::Value;
use vault_plugin_sdk::plugin::{KernelHandle, Plugin};
use vault_plugin_sdk::{EventPriority, PluginContext};

use super::builtin;
use super::manifest::PluginManifest;
use crate::workspace::{self, VaultConfig};

pub const TICK_EVENT: &str = "TICK";
const TICK_PRIORITY: EventPriority = 0;

struct LoadedPlugin {
    id: String,
    plugin: Arc<dyn Plugin>,
    context: PluginContext,
}

/// Owns every currently-active plugin, in discovery order.
pub struct PluginHost {
    plugins_dir: PathBuf,
    loaded: RwLock<Vec<LoadedPlugin>>,
}

impl PluginHost {
    pub fn new(plugins_dir: PathBuf) -> Self {
        Self { plugins_dir, loaded: RwLock::new(Vec::new()) }
    }

    /// Immediate subdirectories that are plugin candidates: the name does
    /// not start with `.` or `_`, and a manifest is present. Sorted by name
    /// for deterministic discovery order.
    fn discover(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.plugins_dir) else {
            return candidates;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if name.starts_with('.') || name.starts_with('_') {
                continue;
            }
            if path.join(super::manifest::MANIFEST_FILE).is_file() {
                candidates.push(path);
            }
        }
        candidates.sort();
        candidates
    }

    /// Run discovery, config merge, Phase 1 for every plugin, then Phase 2
    /// for every plugin that survived Phase 1, in discovery order.
    pub async fn load_all(
        &self,
        kernel: Arc<dyn KernelHandle>,
        workspace_path: &Path,
        config: &VaultConfig,
    ) {
        let candidates = self.discover();
        let mut registered = Vec::new();

        for plugin_dir in candidates {
            let id = plugin_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let manifest = match PluginManifest::load(&plugin_dir) {
                Ok(manifest) => manifest,
                Err(err) => {
                    error!("plugin '{id}': failed to load manifest: {err:?}");
                    continue;
                }
            };

            let Some(factory) = builtin::lookup(&manifest.plugin.factory) else {
                error!("plugin '{id}': unknown factory '{}'", manifest.plugin.factory);
                continue;
            };

            let defaults = std::fs::read_to_string(plugin_dir.join(workspace::PLUGIN_SETTINGS_FILE))
                .ok()
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .unwrap_or_else(|| Value::Object(Default::default()));
            let overrides = config.plugins.get(&id).cloned().unwrap_or(Value::Null);
            let merged = workspace::merge_plugin_config(&defaults, &overrides);

            if !workspace::is_enabled(&merged) {
                info!("plugin '{id}': disabled, skipping");
                continue;
            }

            let plugin = factory(plugin_dir.clone(), workspace_path.to_path_buf(), merged.clone());
            let context = PluginContext::new(
                id.clone(),
                plugin_dir.clone(),
                workspace_path.to_path_buf(),
                merged,
                kernel.clone(),
            );

            if let Err(err) = plugin.register_commands(&context) {
                error!("plugin '{id}': register_commands failed: {err}");
                continue;
            }
            if let Err(err) = plugin.register_hooks(&context) {
                error!("plugin '{id}': register_hooks failed: {err}");
                continue;
            }

            registered.push(LoadedPlugin { id, plugin, context });
        }

        for loaded in &registered {
            if let Err(err) = loaded.plugin.on_load(&loaded.context).await {
                warn!("plugin '{}': on_load failed: {err}", loaded.id);
                continue;
            }
            let plugin = loaded.plugin.clone();
            let ctx = loaded.context.clone();
            kernel.subscribe(
                TICK_EVENT,
                TICK_PRIORITY,
                crate::event_bus::handler_fn(move |_payload| {
                    let plugin = plugin.clone();
                    let ctx = ctx.clone();
                    async move {
                        if let Err(err) = plugin.on_tick(&ctx).await {
                            warn!("plugin '{}': on_tick failed: {err}", ctx.plugin_id());
                        }
                        Ok(())
                    }
                }),
            );
        }

        *self.loaded.write() = registered;
    }

    /// Called once the UI has signaled readiness. Per-plugin errors are
    /// logged and do not affect other plugins.
    pub async fn notify_client_connected(&self) {
        let snapshot: Vec<(Arc<dyn Plugin>, PluginContext)> = self
            .loaded
            .read()
            .iter()
            .map(|loaded| (loaded.plugin.clone(), loaded.context.clone()))
            .collect();
        for (plugin, context) in snapshot {
            if let Err(err) = plugin.on_client_connected(&context).await {
                warn!("plugin '{}': on_client_connected failed: {err}", context.plugin_id());
            }
        }
    }

    /// `on_unload` in reverse discovery order. Errors are logged and never
    /// stop the remaining unloads.
    pub async fn unload_all(&self) {
        let snapshot: Vec<(Arc<dyn Plugin>, PluginContext)> = self
            .loaded
            .read()
            .iter()
            .rev()
            .map(|loaded| (loaded.plugin.clone(), loaded.context.clone()))
            .collect();
        for (plugin, context) in snapshot {
            if let Err(err) = plugin.on_unload(&context).await {
                warn!("plugin '{}': on_unload failed: {err}", context.plugin_id());
            }
        }
        self.loaded.write().clear();
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        self.loaded.read().iter().map(|loaded| loaded.id.clone()).collect()
    }
}
