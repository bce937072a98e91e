//! Wires the command registry, event bus, plugin host, and chat pipeline
//! together behind the [`vault_plugin_sdk::plugin::KernelHandle`] seam, and
//! implements [`crate::rpc::CommandExecutor`] so the RPC layer never depends
//! on this module directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{info, warn};
use parking_lot::RwLock;
use serde_json::{json, Value};
use uuid::Uuid;

use vault_plugin_sdk::pipeline::{HistoryEntry, PipelineStage};
use vault_plugin_sdk::plugin::{
    CommandFn, CommandResult, EventHandlerFn, EventScope, KernelHandle, PipelineHandlerFn,
};
use vault_plugin_sdk::{MessageLevel, PipelineContext, PluginError};

use crate::error::CommandError;
use crate::event_bus::EventBus;
use crate::pipeline::Pipeline;
use crate::plugin::PluginHost;
use crate::registry::{arc_handler, CommandRegistry};
use crate::rpc::{CommandExecutor, OutboundHub, RpcMessage};
use crate::services::keyring::{provider_info, CredentialStore, PROVIDERS};
use crate::services::llm::LlmProvider;
use crate::workspace::{VaultConfig, Workspace};

/// Default cadence for the periodic `TICK` event; a convention, not a
/// contract plugins may rely on precisely.
const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

fn now_epoch_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, PluginError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| PluginError::new(format!("'{key}' is required")))
}

/// Owns every long-lived collaborator the kernel wires together, and is the
/// sole implementor of [`KernelHandle`] every plugin is handed.
pub struct Orchestrator {
    workspace: Workspace,
    config: RwLock<VaultConfig>,
    bus: RwLock<Arc<EventBus>>,
    registry: Arc<CommandRegistry>,
    plugin_host: PluginHost,
    pipeline: RwLock<Arc<Pipeline>>,
    llm: Arc<dyn LlmProvider>,
    credentials: Arc<dyn CredentialStore>,
    outbound: Arc<OutboundHub>,
    client_connected: AtomicBool,
}

impl Orchestrator {
    /// Runs the full startup sequence: load config, push stored credentials
    /// into the environment, build the pipeline, discover and activate
    /// plugins, register built-in commands, and announce readiness.
    pub async fn initialize(
        workspace: Workspace,
        llm: Arc<dyn LlmProvider>,
        credentials: Arc<dyn CredentialStore>,
        outbound: Arc<OutboundHub>,
    ) -> Arc<Self> {
        let config = workspace.load_config();
        credentials.set_env_vars();

        let bus = Arc::new(EventBus::new());
        let pipeline = Arc::new(Pipeline::new(bus.clone(), llm.clone()));
        let plugin_host = PluginHost::new(workspace.plugins_dir());

        let orchestrator = Arc::new(Self {
            workspace,
            config: RwLock::new(config.clone()),
            bus: RwLock::new(bus),
            registry: Arc::new(CommandRegistry::new()),
            plugin_host,
            pipeline: RwLock::new(pipeline),
            llm,
            credentials,
            outbound,
            client_connected: AtomicBool::new(false),
        });

        register_builtin_commands(&orchestrator);
        orchestrator
            .plugin_host
            .load_all(orchestrator.clone(), orchestrator.workspace.path(), &config)
            .await;
        orchestrator.bus().publish("ALL_PLUGINS_LOADED", false, Value::Null).await;
        info!("vault '{}' ready with {} command(s)", orchestrator.workspace.name(), orchestrator.registry.known_ids().len());

        tokio::spawn(tick_driver(orchestrator.clone()));
        orchestrator
    }

    fn bus(&self) -> Arc<EventBus> {
        self.bus.read().clone()
    }

    fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.read().clone()
    }

    fn config(&self) -> VaultConfig {
        self.config.read().clone()
    }

    /// Full hot-restart sequence: unload every plugin in reverse discovery
    /// order, discard all subscriptions and command bindings by swapping in
    /// a fresh event bus, reload the workspace config, and reactivate.
    /// Idempotent: each step only depends on state this function itself
    /// rebuilds, never on what ran before the previous restart.
    pub async fn restart(orchestrator: &Arc<Self>) {
        info!("restarting vault '{}'", orchestrator.workspace.name());
        orchestrator.bus().publish("SYSTEM_SHUTDOWN", false, Value::Null).await;
        orchestrator.plugin_host.unload_all().await;
        orchestrator.registry.clear();

        let fresh_bus = Arc::new(EventBus::new());
        *orchestrator.bus.write() = fresh_bus.clone();
        *orchestrator.pipeline.write() = Arc::new(Pipeline::new(fresh_bus, orchestrator.llm.clone()));

        let config = orchestrator.workspace.load_config();
        *orchestrator.config.write() = config.clone();
        orchestrator.client_connected.store(false, Ordering::SeqCst);

        register_builtin_commands(orchestrator);
        orchestrator
            .plugin_host
            .load_all(orchestrator.clone(), orchestrator.workspace.path(), &config)
            .await;
        orchestrator.bus().publish("ALL_PLUGINS_LOADED", false, Value::Null).await;
        info!("vault '{}' restarted", orchestrator.workspace.name());
    }
}

#[async_trait]
impl KernelHandle for Orchestrator {
    fn register_command(
        &self,
        id: &str,
        owner: &str,
        override_existing: bool,
        handler: CommandFn,
    ) -> Result<(), PluginError> {
        self.registry.register(id, owner, override_existing, handler);
        Ok(())
    }

    fn subscribe(&self, event: &str, priority: vault_plugin_sdk::EventPriority, handler: EventHandlerFn) {
        self.bus().subscribe(event, priority, handler);
    }

    fn subscribe_pipeline(
        &self,
        stage: PipelineStage,
        priority: vault_plugin_sdk::EventPriority,
        handler: PipelineHandlerFn,
    ) {
        self.bus().subscribe_pipeline(stage, priority, handler);
    }

    async fn publish(&self, event: &str, sequential: bool, payload: Value) {
        self.bus().publish(event, sequential, payload).await;
    }

    async fn execute_command(&self, id: &str, params: Value) -> CommandResult {
        self.registry
            .execute(&self.bus(), id, params)
            .await
            .map_err(|err| match err {
                CommandError::Execution { source, .. } => source,
                other => PluginError::new(other.to_string()),
            })
    }

    fn notify(&self, message: &str, severity: MessageLevel) {
        self.outbound.send(&RpcMessage::trigger_event(
            "NOTIFY",
            "window",
            json!({ "message": message, "severity": severity }),
            now_epoch_seconds(),
        ));
    }

    fn emit(&self, event_type: &str, data: Value, scope: EventScope) {
        let scope = match scope {
            EventScope::Window => "window",
            EventScope::Vault => "vault",
            EventScope::Global => "global",
        };
        self.outbound.send(&RpcMessage::trigger_event(event_type, scope, data, now_epoch_seconds()));
    }

    fn is_client_connected(&self) -> bool {
        self.client_connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for Orchestrator {
    async fn execute(&self, method: &str, params: Value) -> Result<Value, CommandError> {
        self.registry.execute(&self.bus(), method, params).await
    }
}

fn register_builtin_commands(orchestrator: &Arc<Orchestrator>) {
    macro_rules! core {
        ($id:expr, $handler:expr) => {
            orchestrator.registry.register_core($id, arc_handler($handler))
        };
    }

    let orch = orchestrator.clone();
    core!("chat.send", move |params| {
        let orch = orch.clone();
        async move { chat_send(orch, params).await }
    });

    let orch = orchestrator.clone();
    core!("system.chat", move |params| {
        let orch = orch.clone();
        async move { chat_send(orch, params).await }
    });

    let orch = orchestrator.clone();
    core!("chat.set_model", move |params| {
        let orch = orch.clone();
        async move { chat_set_model(orch, params).await }
    });

    let orch = orchestrator.clone();
    core!("system.info", move |_params| {
        let orch = orch.clone();
        async move { system_info(orch).await }
    });

    let orch = orchestrator.clone();
    core!("system.list_commands", move |_params| {
        let orch = orch.clone();
        async move { Ok(json!({ "status": "success", "commands": orch.registry.known_ids() })) }
    });

    let orch = orchestrator.clone();
    core!("system.client_ready", move |_params| {
        let orch = orch.clone();
        async move {
            orch.client_connected.store(true, Ordering::SeqCst);
            orch.plugin_host.notify_client_connected().await;
            Ok(json!({ "status": "success" }))
        }
    });

    let orch = orchestrator.clone();
    core!("system.restart_vault", move |_params| {
        let orch = orch.clone();
        async move {
            Orchestrator::restart(&orch).await;
            Ok(json!({ "status": "success" }))
        }
    });

    let orch = orchestrator.clone();
    core!("plugins.list", move |_params| {
        let orch = orch.clone();
        async move { Ok(json!({ "status": "success", "plugins": orch.plugin_host.loaded_ids() })) }
    });

    let orch = orchestrator.clone();
    core!("plugins.toggle", move |params| {
        let orch = orch.clone();
        async move { plugins_toggle(orch, params).await }
    });

    for id in ["plugins.install", "plugins.update", "plugins.uninstall"] {
        orchestrator.registry.register_core(
            id,
            arc_handler(move |_params| async move {
                Ok(json!({
                    "status": "error",
                    "message": "plugin acquisition is handled outside this kernel",
                }))
            }),
        );
    }

    let orch = orchestrator.clone();
    core!("settings.store_api_key", move |params| {
        let orch = orch.clone();
        async move {
            let provider = require_str(&params, "provider")?;
            let api_key = require_str(&params, "api_key")?;
            if !orch.credentials.store_api_key(provider, api_key) {
                return Ok(json!({ "status": "error", "message": format!("unknown provider '{provider}'") }));
            }
            orch.credentials.set_env_vars();
            Ok(json!({ "status": "success" }))
        }
    });

    let orch = orchestrator.clone();
    core!("settings.delete_api_key", move |params| {
        let orch = orch.clone();
        async move {
            let provider = require_str(&params, "provider")?;
            let removed = orch.credentials.delete_api_key(provider);
            Ok(json!({ "status": "success", "removed": removed }))
        }
    });

    let orch = orchestrator.clone();
    core!("settings.list_providers", move |_params| {
        let orch = orch.clone();
        async move {
            let configured = orch.credentials.list_configured_providers();
            let providers: Vec<Value> = PROVIDERS
                .iter()
                .map(|p| {
                    json!({
                        "id": p.id,
                        "display_name": p.display_name,
                        "configured": configured.iter().any(|c| c == p.id),
                    })
                })
                .collect();
            Ok(json!({ "status": "success", "providers": providers }))
        }
    });

    let orch = orchestrator.clone();
    core!("settings.verify_api_key", move |params| {
        let orch = orch.clone();
        async move {
            let provider = require_str(&params, "provider")?;
            if provider_info(provider).is_none() {
                return Ok(json!({ "status": "success", "valid": false, "error": "unknown provider" }));
            }
            match orch.credentials.get_api_key(provider) {
                Some(_) => Ok(json!({
                    "status": "success",
                    "valid": false,
                    "error": "live verification requires a network call this kernel does not make",
                })),
                None => Ok(json!({ "status": "success", "valid": false, "error": "no API key stored" })),
            }
        }
    });

    core!("settings.get_available_models", move |_params| async move {
        Ok(json!({ "status": "success", "models": {} }))
    });

    let orch = orchestrator.clone();
    core!("settings.get_model_categories", move |_params| {
        let orch = orch.clone();
        async move {
            let config = orch.config();
            Ok(json!({
                "status": "success",
                "default_category": config.llm.default_category,
                "categories": config.llm.categories,
            }))
        }
    });

    let orch = orchestrator.clone();
    core!("settings.set_model_category", move |params| {
        let orch = orch.clone();
        async move {
            let category = require_str(&params, "category")?.to_string();
            let model = require_str(&params, "model")?.to_string();
            let mut config = orch.config();
            config.llm.categories.insert(category, json!(model));
            if let Err(err) = orch.workspace.save_config(&config) {
                return Ok(json!({ "status": "error", "message": err.to_string() }));
            }
            *orch.config.write() = config;
            Ok(json!({ "status": "success" }))
        }
    });

    core!("settings.detect_ollama", move |_params| async move {
        Ok(json!({ "status": "success", "available": false, "models": [] }))
    });

    core!("settings.get_model_info", move |params| {
        let model = params.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
        async move { Ok(json!({ "status": "success", "model": model, "info": null })) }
    });
}

async fn plugins_toggle(orchestrator: Arc<Orchestrator>, params: Value) -> CommandResult {
    let plugin_id = require_str(&params, "plugin_id")?;
    let enabled = params.get("enabled").and_then(Value::as_bool).unwrap_or(true);

    let mut config = orchestrator.config();
    let entry = config.plugins.entry(plugin_id.to_string()).or_insert_with(|| json!({}));
    if let Value::Object(map) = entry {
        map.insert("enabled".to_string(), json!(enabled));
    }
    if let Err(err) = orchestrator.workspace.save_config(&config) {
        return Ok(json!({ "status": "error", "message": err.to_string() }));
    }
    *orchestrator.config.write() = config;
    Ok(json!({ "status": "success", "plugin_id": plugin_id, "enabled": enabled }))
}

async fn system_info(orchestrator: Arc<Orchestrator>) -> CommandResult {
    Ok(json!({
        "status": "success",
        "vault": orchestrator.workspace.name(),
        "path": orchestrator.workspace.path().display().to_string(),
        "plugins": orchestrator.plugin_host.loaded_ids(),
        "client_connected": orchestrator.is_client_connected(),
    }))
}

async fn chat_set_model(orchestrator: Arc<Orchestrator>, params: Value) -> CommandResult {
    let chat_id = require_str(&params, "chat_id")?;
    let model = params.get("model").and_then(Value::as_str);
    let category = params.get("category").and_then(Value::as_str);
    let override_value = model.or(category).ok_or_else(|| PluginError::new("'model' or 'category' is required"))?;

    if orchestrator.registry.is_registered("chat.set_metadata") {
        orchestrator
            .registry
            .execute(
                &orchestrator.bus(),
                "chat.set_metadata",
                json!({ "chat_id": chat_id, "value": { "model_override": override_value } }),
            )
            .await
            .map_err(|err| PluginError::new(err.to_string()))?;
    }
    Ok(json!({ "status": "success" }))
}

fn history_from_value(value: &Value) -> Vec<HistoryEntry> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let role = entry.get("role")?.as_str()?;
                    let content = entry.get("content")?.as_str()?;
                    Some(HistoryEntry::new(role, content))
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn resolve_history(orchestrator: &Arc<Orchestrator>, params: &Value) -> Vec<HistoryEntry> {
    if let Some(history) = params.get("history") {
        return history_from_value(history);
    }
    if orchestrator.registry.is_registered("chat.get_history") {
        if let Ok(result) = orchestrator.registry.execute(&orchestrator.bus(), "chat.get_history", Value::Null).await {
            let history = result.get("history").cloned().unwrap_or(Value::Null);
            return history_from_value(&history);
        }
    }
    Vec::new()
}

async fn resolve_model_override(orchestrator: &Arc<Orchestrator>, chat_id: &str) -> Option<String> {
    if !orchestrator.registry.is_registered("chat.get_metadata") {
        return None;
    }
    let result = orchestrator
        .registry
        .execute(&orchestrator.bus(), "chat.get_metadata", json!({ "chat_id": chat_id }))
        .await
        .ok()?;
    result.get("value")?.get("model_override")?.as_str().map(str::to_string)
}

/// Handles both the non-streaming and the streaming `chat.send` contract.
/// In the streaming branch, the handler itself drives the stream to
/// completion (emitting `CHAT_TOKEN` events along the way) before the
/// command result — and so the JSON-RPC response — resolves.
async fn chat_send(orchestrator: Arc<Orchestrator>, params: Value) -> CommandResult {
    let message = require_str(&params, "message")?.to_string();
    let chat_id = params
        .get("chat_id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("chat_{}", now_epoch_seconds() as u64));
    let category = params.get("category").and_then(Value::as_str).unwrap_or("fast").to_string();
    let stream = params.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let history = resolve_history(&orchestrator, &params).await;
    let model_override = resolve_model_override(&orchestrator, &chat_id).await;

    let mut ctx = PipelineContext::new(message, history);
    ctx.add_metadata("chat_id", json!(chat_id));
    ctx.add_metadata("category", json!(category));
    if let Some(model) = model_override {
        ctx.add_metadata("model", json!(model));
    }

    if !stream {
        let ctx = orchestrator.pipeline().run(ctx).await;
        let model = ctx.metadata_str("model").unwrap_or("").to_string();
        let usage = ctx.metadata.get("usage").cloned().unwrap_or_else(|| json!({}));
        return Ok(json!({
            "status": "success",
            "chat_id": chat_id,
            "response": ctx.response,
            "model": model,
            "usage": usage,
            "message_ids": Value::Object(ctx.generated_ids()),
        }));
    }

    let stream_id = params
        .get("stream_id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    orchestrator.outbound.send(&RpcMessage::trigger_event(
        "CHAT_STREAM_START",
        "window",
        json!({ "stream_id": stream_id, "chat_id": chat_id, "message": ctx.message }),
        now_epoch_seconds(),
    ));

    let mut token_stream = match orchestrator.pipeline().stream_run(&mut ctx).await {
        Ok(stream) => stream,
        Err(err) => {
            orchestrator.outbound.send(&RpcMessage::trigger_event(
                "CHAT_STREAM_END",
                "window",
                json!({ "stream_id": stream_id, "chat_id": chat_id, "status": "error", "error": err.to_string() }),
                now_epoch_seconds(),
            ));
            return Err(err);
        }
    };

    let mut accumulated = String::new();
    let mut stream_error = None;
    {
        use futures_util::StreamExt;
        while let Some(token) = token_stream.next().await {
            match token {
                Ok(token) => {
                    accumulated.push_str(&token);
                    orchestrator.outbound.send(&RpcMessage::trigger_event(
                        "CHAT_TOKEN",
                        "window",
                        json!({ "stream_id": stream_id, "chat_id": chat_id, "token": token }),
                        now_epoch_seconds(),
                    ));
                }
                Err(err) => {
                    stream_error = Some(err.to_string());
                    break;
                }
            }
        }
    }

    ctx.response = Some(accumulated.clone());
    orchestrator.bus().publish_pipeline(PipelineStage::Output, &mut ctx).await;
    let message_ids = ctx.generated_ids();
    let status = if stream_error.is_some() { "error" } else { "success" };

    let mut end_payload = json!({
        "stream_id": stream_id,
        "chat_id": chat_id,
        "status": status,
        "response": accumulated,
        "message_ids": message_ids,
    });
    if let Some(err) = &stream_error {
        end_payload["error"] = json!(err);
    }
    orchestrator.outbound.send(&RpcMessage::trigger_event("CHAT_STREAM_END", "window", end_payload, now_epoch_seconds()));

    if let Some(err) = stream_error {
        warn!("chat.send stream '{stream_id}' failed: {err}");
    }

    Ok(json!({
        "status": "success",
        "chat_id": chat_id,
        "stream_id": stream_id,
        "response": accumulated,
        "message_ids": Value::Object(message_ids),
    }))
}

/// Publishes `TICK` on a fixed cadence for the lifetime of the process.
/// Reads the bus through `orchestrator.bus()` on every iteration, so it
/// keeps publishing against whichever event bus is current across a hot
/// restart without needing to be respawned itself.
async fn tick_driver(orchestrator: Arc<Orchestrator>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        orchestrator.bus().publish("TICK", false, Value::Null).await;
    }
}
