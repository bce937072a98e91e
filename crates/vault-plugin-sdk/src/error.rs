use serde_json::Value;

/// Error returned by a plugin command handler or lifecycle hook.
///
/// Plugins are trusted and in-process, so this is a thin wrapper rather than
/// a rich taxonomy: the kernel only needs a human-readable message and an
/// optional structured payload to forward back across the RPC boundary.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
    pub data: Option<Value>,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }
}

impl From<anyhow::Error> for PluginError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}
