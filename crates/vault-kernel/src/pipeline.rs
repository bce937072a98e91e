//! Linear chat pipeline: the fixed eight-stage executor. A graph-driven
//! variant may exist elsewhere in a deployment, sharing this context shape
//! and event sequence; this kernel implements the linear one.

use std::sync::Arc;

use vault_plugin_sdk::pipeline::PipelineStage;
use vault_plugin_sdk::PipelineContext;

use crate::event_bus::EventBus;
use crate::services::llm::{ChatMessage, LlmProvider, ModelSelector};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const MAX_RAG_ENTRIES: usize = 5;

pub struct Pipeline {
    bus: Arc<EventBus>,
    llm: Arc<dyn LlmProvider>,
}

impl Pipeline {
    pub fn new(bus: Arc<EventBus>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { bus, llm }
    }

    /// Run the non-streaming turn end to end. Always returns a context, even
    /// on LLM failure — failures become a diagnostic response string rather
    /// than a propagated error.
    pub async fn run(&self, mut ctx: PipelineContext) -> PipelineContext {
        self.bus.publish_pipeline(PipelineStage::Start, &mut ctx).await;

        self.bus.publish_pipeline(PipelineStage::Input, &mut ctx).await;
        if ctx.should_abort {
            self.bus.publish_pipeline(PipelineStage::End, &mut ctx).await;
            return ctx;
        }

        self.bus.publish_pipeline(PipelineStage::Context, &mut ctx).await;

        self.bus.publish_pipeline(PipelineStage::Prompt, &mut ctx).await;
        compose_final_system_prompt(&mut ctx);

        self.bus.publish_pipeline(PipelineStage::Llm, &mut ctx).await;
        if ctx.response.as_deref().map(str::is_empty).unwrap_or(true) {
            self.run_builtin_llm_call(&mut ctx).await;
        }

        self.bus.publish_pipeline(PipelineStage::PostProcess, &mut ctx).await;
        self.bus.publish_pipeline(PipelineStage::Output, &mut ctx).await;
        self.bus.publish_pipeline(PipelineStage::End, &mut ctx).await;
        ctx
    }

    async fn run_builtin_llm_call(&self, ctx: &mut PipelineContext) {
        let messages = build_message_sequence(ctx);
        let selector = model_selector(ctx);
        match self.llm.complete(&messages, &selector).await {
            Ok(completion) => {
                ctx.response = Some(completion.content);
                ctx.add_metadata("model", serde_json::json!(completion.model));
                ctx.add_metadata("usage", serde_json::to_value(completion.usage).unwrap_or_default());
            }
            Err(err) => {
                ctx.response = Some(format!("[LLM error] {err}"));
            }
        }
    }

    /// Compose the system prompt and build the message sequence inline (no
    /// stage events are published in the streaming variant) and hand back a
    /// token stream. The caller is responsible for publishing OUTPUT once the
    /// stream terminates with the accumulated response assigned.
    pub async fn stream_run(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<futures_util::stream::BoxStream<'static, Result<String, vault_plugin_sdk::PluginError>>, vault_plugin_sdk::PluginError>
    {
        compose_final_system_prompt(ctx);
        let messages = build_message_sequence(ctx);
        let selector = model_selector(ctx);
        self.llm.stream(&messages, &selector).await
    }
}

fn compose_final_system_prompt(ctx: &mut PipelineContext) {
    let system_prompt = ctx
        .metadata
        .get("system_prompt")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .to_string();

    let rag_context = ctx.rag_context();
    let final_prompt = if rag_context.is_empty() {
        system_prompt
    } else {
        let joined = rag_context.iter().take(MAX_RAG_ENTRIES).cloned().collect::<Vec<_>>().join("\n");
        format!("{system_prompt}\n\n---\n{joined}")
    };
    ctx.add_metadata("final_system_prompt", serde_json::json!(final_prompt));
}

fn build_message_sequence(ctx: &PipelineContext) -> Vec<ChatMessage> {
    let system_prompt = ctx
        .metadata
        .get("final_system_prompt")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .to_string();

    let mut messages = vec![ChatMessage::new("system", system_prompt)];
    for entry in &ctx.history {
        messages.push(ChatMessage::new(entry.role.clone(), entry.content.clone()));
    }
    messages.push(ChatMessage::new("user", ctx.message.clone()));
    messages
}

fn model_selector(ctx: &PipelineContext) -> ModelSelector {
    if let Some(model) = ctx.metadata.get("model").and_then(|v| v.as_str()) {
        return ModelSelector::Model(model.to_string());
    }
    let category = ctx
        .metadata
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or("fast")
        .to_string();
    ModelSelector::Category(category)
}
