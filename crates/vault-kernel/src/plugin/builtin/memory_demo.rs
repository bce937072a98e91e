//! Reference plugin exercising the memory-plugin contract: `chat.get_history`
//! / `chat.set_metadata` / `chat.get_metadata`, plus an `OUTPUT`-stage
//! subscriber that assigns `generated_ids` so persistence-dependent turns
//! have something concrete to observe.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use vault_plugin_sdk::pipeline::PipelineStage;
use vault_plugin_sdk::plugin::CommandResult;
use vault_plugin_sdk::{PluginContext, PluginError};

use crate::registry::arc_handler;

/// Turn-keyed metadata set via `chat.set_metadata`, read back through
/// `chat.get_metadata`. In-memory only; this is a demonstration plugin, not
/// the durable persistence layer.
#[derive(Default)]
struct Store {
    history: Vec<Value>,
    metadata: std::collections::HashMap<String, Value>,
}

pub struct MemoryDemoPlugin {
    id: String,
    store: Arc<RwLock<Store>>,
}

pub fn factory(plugin_dir: PathBuf, _workspace_path: PathBuf, _config: Value) -> Arc<dyn vault_plugin_sdk::plugin::Plugin> {
    let id = plugin_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "memory-demo".to_string());
    Arc::new(MemoryDemoPlugin { id, store: Arc::new(RwLock::new(Store::default())) })
}

#[async_trait]
impl vault_plugin_sdk::plugin::Plugin for MemoryDemoPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn register_commands(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        let store = self.store.clone();
        ctx.register_command(
            "chat.get_history",
            false,
            arc_handler(move |_params| {
                let store = store.clone();
                async move {
                    let history = store.read().history.clone();
                    Ok(serde_json::json!({ "status": "success", "history": history })) as CommandResult
                }
            }),
        )?;

        let store = self.store.clone();
        ctx.register_command(
            "chat.set_metadata",
            false,
            arc_handler(move |params| {
                let store = store.clone();
                async move {
                    let chat_id = params.get("chat_id").and_then(Value::as_str).unwrap_or_default().to_string();
                    let value = params.get("value").cloned().unwrap_or(Value::Null);
                    store.write().metadata.insert(chat_id, value);
                    Ok(serde_json::json!({ "status": "success" })) as CommandResult
                }
            }),
        )?;

        let store = self.store.clone();
        ctx.register_command(
            "chat.get_metadata",
            false,
            arc_handler(move |params| {
                let store = store.clone();
                async move {
                    let chat_id = params.get("chat_id").and_then(Value::as_str).unwrap_or_default();
                    let value = store.read().metadata.get(chat_id).cloned().unwrap_or(Value::Null);
                    Ok(serde_json::json!({ "status": "success", "value": value })) as CommandResult
                }
            }),
        )?;

        Ok(())
    }

    async fn on_load(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        let store = self.store.clone();
        ctx.subscribe_pipeline(
            PipelineStage::Output,
            10,
            crate::event_bus::pipeline_handler_fn(move |ctx| {
                let store = store.clone();
                Box::pin(async move {
                    if let Some(response) = ctx.response.clone() {
                        ctx.add_metadata(
                            "generated_ids",
                            serde_json::json!({
                                "user_message_id": uuid::Uuid::new_v4().to_string(),
                                "assistant_message_id": uuid::Uuid::new_v4().to_string(),
                            }),
                        );
                        let mut store = store.write();
                        store.history.push(serde_json::json!({ "role": "user", "content": ctx.original_message }));
                        store.history.push(serde_json::json!({ "role": "assistant", "content": response }));
                    }
                    Ok(())
                })
            }),
        );
        Ok(())
    }
}
