use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::PluginError;
use crate::pipeline::PipelineStage;
use crate::plugin::{
    CommandFn, CommandResult, EventHandlerFn, EventScope, KernelHandle, PipelineHandlerFn,
};
use crate::protocol::{EventPriority, MessageLevel};

/// Everything a plugin needs to talk back to the kernel, handed to every
/// lifecycle hook. Carries the plugin's resolved identity and effective
/// config so hooks never reach for ambient global state.
#[derive(Clone)]
pub struct PluginContext {
    plugin_id: String,
    plugin_dir: PathBuf,
    workspace_path: PathBuf,
    config: Arc<Value>,
    kernel: Arc<dyn KernelHandle>,
}

impl PluginContext {
    pub fn new(
        plugin_id: impl Into<String>,
        plugin_dir: PathBuf,
        workspace_path: PathBuf,
        config: Value,
        kernel: Arc<dyn KernelHandle>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            plugin_dir,
            workspace_path,
            config: Arc::new(config),
            kernel,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    /// Deserialize the plugin's merged config into `T`.
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, PluginError> {
        Ok(T::deserialize(self.config.as_ref())?)
    }

    pub fn config_value(&self) -> &Value {
        &self.config
    }

    pub fn register_command(
        &self,
        id: &str,
        override_existing: bool,
        handler: CommandFn,
    ) -> Result<(), PluginError> {
        self.kernel
            .register_command(id, &self.plugin_id, override_existing, handler)
    }

    pub fn subscribe(&self, event: &str, priority: EventPriority, handler: EventHandlerFn) {
        self.kernel.subscribe(event, priority, handler);
    }

    pub fn subscribe_pipeline(
        &self,
        stage: PipelineStage,
        priority: EventPriority,
        handler: PipelineHandlerFn,
    ) {
        self.kernel.subscribe_pipeline(stage, priority, handler);
    }

    pub async fn publish(&self, event: &str, sequential: bool, payload: Value) {
        self.kernel.publish(event, sequential, payload).await;
    }

    pub async fn execute_command(&self, id: &str, params: Value) -> CommandResult {
        self.kernel.execute_command(id, params).await
    }

    pub fn notify(&self, message: &str, severity: MessageLevel) {
        self.kernel.notify(message, severity);
    }

    pub fn emit(&self, event_type: &str, data: Value, scope: EventScope) {
        self.kernel.emit(event_type, data, scope);
    }

    pub fn is_client_connected(&self) -> bool {
        self.kernel.is_client_connected()
    }

    /// Load `<plugin_dir>/settings.json`, or an empty object if absent.
    pub fn load_settings(&self) -> Value {
        let path = self.plugin_dir.join("settings.json");
        std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}
