//! Command Registry: name -> handler map with override semantics.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;
use serde_json::Value;
use vault_plugin_sdk::plugin::CommandFn;

use crate::error::CommandError;
use crate::event_bus::EventBus;

const CORE_OWNER: &str = "core";

struct Binding {
    owner: String,
    handler: CommandFn,
}

/// Unwraps the legacy calling convention where a handler's real parameters
/// are nested under a `p` or `params` key, implemented once here rather
/// than in every command handler.
pub fn unwrap_params(params: Value) -> Value {
    match &params {
        Value::Object(map) if !map.contains_key("p") && !map.contains_key("params") => params,
        Value::Object(map) => {
            if let Some(nested) = map.get("p") {
                nested.clone()
            } else if let Some(nested) = map.get("params") {
                nested.clone()
            } else {
                params
            }
        }
        _ => params,
    }
}

/// Owns the command name -> handler map. No persistence across restarts.
pub struct CommandRegistry {
    bindings: RwLock<HashMap<String, Binding>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self { bindings: RwLock::new(HashMap::new()) }
    }

    /// Register a handler. A collision without `override_existing` replaces
    /// the binding but logs a warning; `override_existing` replaces it
    /// silently.
    pub fn register(&self, id: &str, owner: &str, override_existing: bool, handler: CommandFn) {
        let mut bindings = self.bindings.write();
        if bindings.contains_key(id) && !override_existing {
            warn!("command '{id}' already registered, overriding with owner '{owner}'");
        }
        bindings.insert(id.to_string(), Binding { owner: owner.to_string(), handler });
    }

    pub fn register_core(&self, id: &str, handler: CommandFn) {
        self.register(id, CORE_OWNER, true, handler);
    }

    /// Returns whether a binding existed.
    pub fn unregister(&self, id: &str) -> bool {
        self.bindings.write().remove(id).is_some()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.bindings.read().contains_key(id)
    }

    pub fn known_ids(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.bindings.write().clear();
    }

    /// Look up and invoke `id` with `params`, unwrapping the legacy `p`/
    /// `params` envelope. On success a fire-and-forget `COMMAND_EXECUTED`
    /// event is published through `bus`.
    pub async fn execute(
        &self,
        bus: &EventBus,
        id: &str,
        params: Value,
    ) -> Result<Value, CommandError> {
        let handler = {
            let bindings = self.bindings.read();
            match bindings.get(id) {
                Some(binding) => binding.handler.clone(),
                None => {
                    return Err(CommandError::NotFound { id: id.to_string(), known: self.known_ids() });
                }
            }
        };

        let args = unwrap_params(params.clone());
        let result = handler(args.clone()).await.map_err(|source| CommandError::Execution {
            id: id.to_string(),
            source,
        })?;

        bus.publish(
            "COMMAND_EXECUTED",
            false,
            serde_json::json!({ "command_id": id, "args": args, "status": "success" }),
        )
        .await;

        Ok(result)
    }
}

pub fn arc_handler<F, Fut>(f: F) -> CommandFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = vault_plugin_sdk::plugin::CommandResult> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_plugin_sdk::PluginError;

    #[test]
    fn legacy_p_envelope_is_unwrapped() {
        let wrapped = serde_json::json!({ "p": { "message": "hi" } });
        assert_eq!(unwrap_params(wrapped), serde_json::json!({ "message": "hi" }));
    }

    #[test]
    fn legacy_params_envelope_is_unwrapped() {
        let wrapped = serde_json::json!({ "params": { "message": "hi" } });
        assert_eq!(unwrap_params(wrapped), serde_json::json!({ "message": "hi" }));
    }

    #[test]
    fn plain_object_passes_through() {
        let plain = serde_json::json!({ "message": "hi" });
        assert_eq!(unwrap_params(plain.clone()), plain);
    }

    #[tokio::test]
    async fn unknown_command_reports_known_ids() {
        let registry = CommandRegistry::new();
        registry.register_core("system.info", arc_handler(|_| async { Ok(Value::Null) }));
        let bus = EventBus::new();
        let err = registry.execute(&bus, "nope", Value::Null).await.unwrap_err();
        match err {
            CommandError::NotFound { id, known } => {
                assert_eq!(id, "nope");
                assert_eq!(known, vec!["system.info".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn override_true_replaces_handler_silently() {
        let registry = CommandRegistry::new();
        registry.register("chat.get_history", "plugin-a", false, arc_handler(|_| async {
            Ok(serde_json::json!({ "status": "success", "history": [] }))
        }));
        registry.register("chat.get_history", "plugin-b", true, arc_handler(|_| async {
            Ok(serde_json::json!({ "status": "success", "history": [{"role": "user", "content": "prev"}] }))
        }));

        let bus = EventBus::new();
        let result = registry.execute(&bus, "chat.get_history", Value::Null).await.unwrap();
        assert_eq!(result["history"][0]["content"], "prev");
    }

    #[tokio::test]
    async fn execution_error_wraps_original_error() {
        let registry = CommandRegistry::new();
        registry.register_core(
            "explode",
            arc_handler(|_| async { Err(PluginError::new("kaboom")) }),
        );
        let bus = EventBus::new();
        let err = registry.execute(&bus, "explode", Value::Null).await.unwrap_err();
        assert!(matches!(err, CommandError::Execution { .. }));
    }
}
