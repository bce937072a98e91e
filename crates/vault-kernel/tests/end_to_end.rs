//! Black-box scenarios driven only through the public `KernelHandle` /
//! `CommandExecutor` surface and a real `Orchestrator`, matching the literal
//! end-to-end scenarios this kernel is expected to satisfy.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use vault_kernel::event_bus::pipeline_handler_fn;
use vault_kernel::orchestrator::Orchestrator;
use vault_kernel::rpc::{CommandExecutor, OutboundHub};
use vault_kernel::services::keyring::InMemoryCredentialStore;
use vault_kernel::services::llm::{ChatMessage, Completion, DemoLlmProvider, LlmProvider, ModelSelector, Usage};
use vault_kernel::workspace::Workspace;
use vault_plugin_sdk::plugin::{EventScope, KernelHandle};
use vault_plugin_sdk::{PipelineStage, PluginError};

/// An `LlmProvider` that counts how many times it was actually invoked, so
/// tests can assert "the LLM was never called" rather than just inspecting
/// the response text.
#[derive(Default)]
struct CountingLlmProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for CountingLlmProvider {
    async fn complete(&self, messages: &[ChatMessage], selector: &ModelSelector) -> Result<Completion, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last_user = messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.as_str()).unwrap_or("");
        Ok(Completion {
            content: format!("counted: {last_user}"),
            model: selector.label().to_string(),
            usage: Usage::default(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn stream(&self, _messages: &[ChatMessage], _selector: &ModelSelector) -> Result<BoxStream<'static, Result<String, PluginError>>, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(futures_util::stream::empty()))
    }
}

async fn orchestrator_with_llm(llm: Arc<dyn LlmProvider>) -> (Arc<Orchestrator>, Arc<OutboundHub>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
    let workspace = Workspace::open(dir.path()).unwrap();
    let outbound = Arc::new(OutboundHub::new());
    let orchestrator = Orchestrator::initialize(workspace, llm, Arc::new(InMemoryCredentialStore::new()), outbound.clone()).await;
    (orchestrator, outbound, dir)
}

async fn orchestrator() -> (Arc<Orchestrator>, Arc<OutboundHub>, tempfile::TempDir) {
    orchestrator_with_llm(Arc::new(DemoLlmProvider)).await
}

fn write_memory_demo_plugin(plugins_dir: &Path, id: &str) {
    let plugin_dir = plugins_dir.join(id);
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(
        plugin_dir.join("plugin.toml"),
        format!("[plugin]\nname = \"{id}\"\nfactory = \"memory_demo\"\n"),
    )
    .unwrap();
    std::fs::write(plugin_dir.join("settings.json"), r#"{"enabled": true}"#).unwrap();
}

/// Scenario 1: no plugins active, no configured LLM collaborator beyond the
/// demo echo fallback.
#[tokio::test]
async fn non_streaming_echo_with_no_plugins_active() {
    let (orchestrator, _outbound, _dir) = orchestrator().await;
    let result = orchestrator.execute("chat.send", json!({ "message": "hi" })).await.unwrap();

    assert_eq!(result["status"], "success");
    let chat_id = result["chat_id"].as_str().unwrap();
    let suffix = chat_id.strip_prefix("chat_").expect("chat_id must be 'chat_' + epoch seconds");
    suffix.parse::<u64>().expect("chat_id suffix must be an epoch-seconds integer");
    assert_eq!(result["response"], "[Demo Mode] Echo: hi");
    assert_eq!(result["usage"], json!({}));
    assert_eq!(result["message_ids"], json!({}));
}

/// Scenario 2: a second, overriding registration of the same command id
/// wins; the registry never prefers the first registration once
/// `override_existing` is set.
#[tokio::test]
async fn override_via_command_reregistration() {
    let (orchestrator, _outbound, _dir) = orchestrator().await;
    let handle: Arc<dyn KernelHandle> = orchestrator.clone();

    handle
        .register_command(
            "chat.get_history",
            "plugin-a",
            false,
            Arc::new(|_params| Box::pin(async { Ok(json!({ "status": "success", "history": [] })) })),
        )
        .unwrap();
    handle
        .register_command(
            "chat.get_history",
            "plugin-b",
            true,
            Arc::new(|_params| {
                Box::pin(async { Ok(json!({ "status": "success", "history": [{ "role": "user", "content": "prev" }] })) })
            }),
        )
        .unwrap();

    let result = orchestrator.execute("chat.get_history", Value::Null).await.unwrap();
    assert_eq!(result["history"][0]["content"], "prev");
}

/// Scenario 3: streaming `chat.send` with an OUTPUT-stage persistence
/// subscriber. Checks the literal wire sequence — one `CHAT_STREAM_START`,
/// at least one `CHAT_TOKEN`, one `CHAT_STREAM_END` — and that the
/// `message_ids` on the terminal event equal both the OUTPUT-stage-written
/// `generated_ids` and the final RPC response's `message_ids`.
#[tokio::test]
async fn streaming_chat_send_matches_the_wire_contract() {
    let (orchestrator, outbound, _dir) = orchestrator().await;
    let handle: Arc<dyn KernelHandle> = orchestrator.clone();

    handle.subscribe_pipeline(
        PipelineStage::Output,
        10,
        pipeline_handler_fn(|ctx| {
            Box::pin(async move {
                ctx.add_metadata("generated_ids", json!({ "user_message_id": "u1", "assistant_message_id": "a1" }));
                Ok(())
            })
        }),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    outbound.attach(tx);

    let result = orchestrator.execute("chat.send", json!({ "message": "hello", "stream": true })).await.unwrap();

    let mut frames = Vec::new();
    while let Ok(Some(Message::Text(text))) = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await {
        frames.push(serde_json::from_str::<Value>(&text).unwrap());
    }

    assert!(frames.len() >= 3, "expected START + >=1 TOKEN + END, got {frames:?}");
    assert_eq!(frames.first().unwrap()["params"]["event_type"], "CHAT_STREAM_START");
    let end = frames.last().unwrap();
    assert_eq!(end["params"]["event_type"], "CHAT_STREAM_END");

    let tokens: String = frames[1..frames.len() - 1]
        .iter()
        .map(|f| f["params"]["data"]["token"].as_str().unwrap_or(""))
        .collect();
    let end_data = &end["params"]["data"];
    assert_eq!(end_data["status"], "success");
    assert_eq!(end_data["response"], tokens);
    assert_eq!(end_data["message_ids"], json!({ "user_message_id": "u1", "assistant_message_id": "a1" }));

    assert_eq!(result["message_ids"], end_data["message_ids"].clone());
}

/// Scenario 4: an INPUT-stage abort must prevent both the LLM call and any
/// OUTPUT-stage persistence.
#[tokio::test]
async fn abort_in_input_skips_the_llm_call() {
    let llm = Arc::new(CountingLlmProvider::default());
    let (orchestrator, _outbound, _dir) = orchestrator_with_llm(llm.clone()).await;
    let handle: Arc<dyn KernelHandle> = orchestrator.clone();

    handle.subscribe_pipeline(
        PipelineStage::Input,
        0,
        pipeline_handler_fn(|ctx| {
            Box::pin(async move {
                ctx.abort("forbidden topic");
                Ok(())
            })
        }),
    );

    let result = orchestrator.execute("chat.send", json!({ "message": "forbidden" })).await.unwrap();
    assert_eq!(result["status"], "success");
    assert!(result["response"].is_null());
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
}

/// Scenario 5: an unknown command id fails the single request but never
/// takes the connection down — a second, valid request still gets served.
#[tokio::test]
async fn unknown_command_does_not_poison_subsequent_requests() {
    let (orchestrator, _outbound, _dir) = orchestrator().await;

    let err = orchestrator.execute("not.a.real.command", Value::Null).await.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("not.a.real.command") || matches!(err, vault_kernel::error::CommandError::NotFound { .. }));

    let result = orchestrator.execute("system.info", Value::Null).await.unwrap();
    assert_eq!(result["status"], "success");
}

/// Scenario 6, exercised against a real on-disk plugin rather than an empty
/// plugins directory: a hot restart reloads the plugin and the set of
/// registered commands is unchanged, but per-turn in-memory plugin state
/// (here, the demo memory plugin's history) does not survive the restart —
/// only full-vault restart is supported, never partial reload.
#[tokio::test]
async fn hot_restart_reloads_plugins_and_preserves_the_command_set() {
    let dir = tempfile::tempdir().unwrap();
    write_memory_demo_plugin(&dir.path().join("plugins"), "memory");
    let workspace = Workspace::open(dir.path()).unwrap();
    let outbound = Arc::new(OutboundHub::new());
    let orchestrator = Orchestrator::initialize(workspace, Arc::new(DemoLlmProvider), Arc::new(InMemoryCredentialStore::new()), outbound).await;

    orchestrator.execute("chat.send", json!({ "message": "remember this" })).await.unwrap();
    let history_before = orchestrator.execute("chat.get_history", Value::Null).await.unwrap();
    assert_eq!(history_before["history"].as_array().unwrap().len(), 2);

    let commands_before = orchestrator.execute("system.list_commands", Value::Null).await.unwrap();
    let mut before: Vec<String> = commands_before["commands"].as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
    before.sort();

    orchestrator.execute("system.restart_vault", Value::Null).await.unwrap();
    orchestrator.execute("system.restart_vault", Value::Null).await.unwrap();

    let commands_after = orchestrator.execute("system.list_commands", Value::Null).await.unwrap();
    let mut after: Vec<String> = commands_after["commands"].as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
    after.sort();
    assert_eq!(before, after);

    let history_after = orchestrator.execute("chat.get_history", Value::Null).await.unwrap();
    assert_eq!(history_after["history"].as_array().unwrap().len(), 0);
}

/// `emit`/`notify` go through the same outbound hub `chat.send` uses; a
/// plugin using the `KernelHandle` surface directly should see its event
/// reach an attached connection just like a built-in one does.
#[tokio::test]
async fn kernel_handle_emit_reaches_an_attached_connection() {
    let (orchestrator, outbound, _dir) = orchestrator().await;
    let handle: Arc<dyn KernelHandle> = orchestrator.clone();

    let (tx, mut rx) = mpsc::unbounded_channel();
    outbound.attach(tx);

    handle.emit("UPDATE_STATE", json!({ "key": "theme", "value": "dark" }), EventScope::Window);

    let Message::Text(text) = rx.recv().await.unwrap() else { panic!("expected a text frame") };
    let frame: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(frame["params"]["event_type"], "UPDATE_STATE");
    assert_eq!(frame["params"]["scope"], "window");
    assert_eq!(frame["params"]["data"]["value"], "dark");
}
