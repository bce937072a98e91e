//! Small value types shared between the kernel and plugin implementations.

use serde::{Deserialize, Serialize};

/// Severity levels understood by the host for logging and UI notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Error,
    Warning,
    Info,
    Log,
}

/// Subscriber ordering key. Higher fires first; insertion order breaks ties.
pub type EventPriority = i32;

/// Command parameters as received by a handler, already unwrapped from any
/// legacy `{"p": {...}}` / `{"params": {...}}` envelope by the registry.
pub type PluginCommandParams = serde_json::Value;
