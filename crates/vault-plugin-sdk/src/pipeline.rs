//! The mutable record carried through one chat turn.
//!
//! `PipelineContext` crosses the plugin boundary: built-in pipeline stages
//! and plugin-installed stage subscribers both read and mutate it in place,
//! in strict priority order, for the lifetime of a single turn.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixed pipeline stage order. Each variant's [`PipelineStage::event_name`]
/// is the namesake event published on the bus at the start of that stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Start,
    Input,
    Context,
    Prompt,
    Llm,
    PostProcess,
    Output,
    End,
}

impl PipelineStage {
    /// The full, normative stage order.
    pub const ORDER: [PipelineStage; 8] = [
        PipelineStage::Start,
        PipelineStage::Input,
        PipelineStage::Context,
        PipelineStage::Prompt,
        PipelineStage::Llm,
        PipelineStage::PostProcess,
        PipelineStage::Output,
        PipelineStage::End,
    ];

    pub fn event_name(self) -> &'static str {
        match self {
            PipelineStage::Start => "START",
            PipelineStage::Input => "INPUT",
            PipelineStage::Context => "CONTEXT",
            PipelineStage::Prompt => "PROMPT",
            PipelineStage::Llm => "LLM",
            PipelineStage::PostProcess => "POST_PROCESS",
            PipelineStage::Output => "OUTPUT",
            PipelineStage::End => "END",
        }
    }
}

/// One turn of conversation history as seen by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
    /// Anything else a memory plugin attached (timestamps, branch ids, ...).
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

impl HistoryEntry {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            extra: Map::new(),
        }
    }
}

/// Mutable record carried through one chat turn.
///
/// Created when `chat.send` begins and dropped when the turn terminates;
/// the kernel never persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    /// Current user text. Subscribers at `INPUT` may rewrite this.
    pub message: String,
    /// Immutable copy of the message as it arrived.
    pub original_message: String,
    /// Conversation history read by the LLM stage.
    pub history: Vec<HistoryEntry>,
    /// Free-form metadata bag. Hosts `chat_id`, `rag_context`,
    /// `final_system_prompt`, `stream`, `category`, `model`,
    /// `generated_ids`, `usage`, `save_to_memory`, ...
    pub metadata: Map<String, Value>,
    /// Set by a plugin to short-circuit the LLM stage, or filled by it.
    pub response: Option<String>,
    pub should_abort: bool,
    pub abort_reason: Option<String>,
    /// Telemetry: stage event names actually published for this turn.
    pub events_emitted: Vec<String>,
    /// Epoch seconds when the turn began.
    pub start_time: f64,
}

impl PipelineContext {
    pub fn new(message: impl Into<String>, history: Vec<HistoryEntry>) -> Self {
        let message = message.into();
        Self {
            original_message: message.clone(),
            message,
            history,
            metadata: Map::new(),
            response: None,
            should_abort: false,
            abort_reason: None,
            events_emitted: Vec::new(),
            start_time: now_epoch_seconds(),
        }
    }

    /// Record that a stage event fired, for telemetry.
    pub fn mark_emitted(&mut self, stage: PipelineStage) {
        self.events_emitted.push(stage.event_name().to_string());
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Cooperatively abort the remainder of the turn.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.should_abort = true;
        self.abort_reason = Some(reason.into());
    }

    /// RAG snippets accumulated at the `CONTEXT` stage, if any.
    pub fn rag_context(&self) -> Vec<String> {
        self.metadata
            .get("rag_context")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a RAG snippet, creating `metadata.rag_context` if absent.
    pub fn push_rag_context(&mut self, snippet: impl Into<String>) {
        let entry = self
            .metadata
            .entry("rag_context")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = entry {
            list.push(Value::String(snippet.into()));
        }
    }

    /// Server-assigned ids written by an `OUTPUT` subscriber, e.g.
    /// `{"user_message_id": "...", "assistant_message_id": "..."}`.
    pub fn generated_ids(&self) -> Map<String, Value> {
        self.metadata
            .get("generated_ids")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

fn now_epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
