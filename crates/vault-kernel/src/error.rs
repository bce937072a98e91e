//! Kernel error taxonomy.
//!
//! Cross-boundary errors (RPC) are structured; intra-kernel errors are
//! localized per plugin or per subscriber and never escape as panics.

use serde_json::Value;
use vault_plugin_sdk::PluginError;

/// Errors raised while registering or executing a command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command not found: {id}")]
    NotFound { id: String, known: Vec<String> },

    #[error("command '{id}' handler must be registered as async and side-effect free during Phase 1")]
    Registration { id: String, reason: String },

    #[error("command '{id}' failed: {source}")]
    Execution { id: String, source: PluginError },
}

impl CommandError {
    /// JSON-RPC error code this maps to at the RPC boundary.
    pub fn rpc_code(&self) -> i64 {
        match self {
            CommandError::NotFound { .. } => super::rpc::protocol::METHOD_NOT_FOUND,
            CommandError::Registration { .. } => super::rpc::protocol::INVALID_REQUEST,
            CommandError::Execution { .. } => super::rpc::protocol::INTERNAL_ERROR,
        }
    }

    pub fn rpc_data(&self) -> Option<Value> {
        match self {
            CommandError::NotFound { known, .. } => Some(serde_json::json!({ "known_commands": known })),
            CommandError::Execution { source, .. } => source.data.clone(),
            CommandError::Registration { .. } => None,
        }
    }
}

/// Errors raised while validating or loading a workspace.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace path does not exist or is not a directory: {0}")]
    InvalidPath(String),
}
