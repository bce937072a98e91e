//! The LLM collaborator contract consumed by the pipeline. The concrete
//! provider abstraction (OpenAI, Anthropic, Ollama, ...) is outside this
//! kernel's scope; only the narrow `complete`/`stream` surface is.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use vault_plugin_sdk::PluginError;

/// One turn of conversation as handed to the collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into() }
    }
}

/// Either an explicit provider-qualified model id or a category name to be
/// resolved against workspace configuration, with a fallback chain.
#[derive(Debug, Clone)]
pub enum ModelSelector {
    Model(String),
    Category(String),
}

impl ModelSelector {
    pub fn label(&self) -> &str {
        match self {
            ModelSelector::Model(id) => id,
            ModelSelector::Category(category) => category,
        }
    }
}

/// Zero in every field (the demo/no-op path) serializes as `{}` rather
/// than `{"prompt_tokens":0,...}`, so a turn that never called a real
/// collaborator reports an empty `usage` on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub prompt_tokens: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub completion_tokens: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_tokens: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The model-provider contract the pipeline's LLM stage calls through.
/// Implementations may be remote providers, a local runtime, or (the
/// built-in default) a demo echo used when nothing is configured.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        selector: &ModelSelector,
    ) -> Result<Completion, PluginError>;

    /// Yields content-delta strings in arrival order.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        selector: &ModelSelector,
    ) -> Result<BoxStream<'static, Result<String, PluginError>>, PluginError>;
}

/// Fallback used when no real provider is configured. Named after the
/// "[Demo Mode]" marker the orchestrator's non-streaming scenario depends
/// on when no LLM collaborator is wired up.
pub struct DemoLlmProvider;

#[async_trait]
impl LlmProvider for DemoLlmProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        selector: &ModelSelector,
    ) -> Result<Completion, PluginError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(Completion {
            content: format!("[Demo Mode] Echo: {last_user}"),
            model: format!("demo/{}", selector.label()),
            usage: Usage::default(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        _selector: &ModelSelector,
    ) -> Result<BoxStream<'static, Result<String, PluginError>>, PluginError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let tokens: Vec<String> = format!("[Demo Mode] Echo: {last_user}")
            .split_inclusive(' ')
            .map(|s| s.to_string())
            .collect();
        Ok(Box::pin(futures_util::stream::iter(tokens.into_iter().map(Ok))))
    }
}
