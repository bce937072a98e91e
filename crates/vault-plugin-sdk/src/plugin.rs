use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::path::PathBuf;

use crate::error::PluginError;
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::protocol::{EventPriority, MessageLevel};

/// Outcome of a command handler invocation.
pub type CommandResult = Result<Value, PluginError>;

/// Type-erased, cloneable async command handler.
///
/// Boxed this way (rather than as a generic) so the registry can hold
/// handlers owned by core and by every plugin in one `HashMap`.
pub type CommandFn = Arc<dyn Fn(Value) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// Type-erased async handler for a named internal event. A handler that
/// returns `Err` is logged by the bus and does not stop its siblings.
pub type EventHandlerFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), PluginError>> + Send + Sync>;

/// Type-erased async handler for a pipeline stage event. Takes the shared
/// turn context by mutable reference; handlers run strictly sequentially
/// within one stage, so no synchronization is needed here. An `Err` is
/// logged and the pipeline continues.
pub type PipelineHandlerFn = Arc<
    dyn for<'a> Fn(&'a mut PipelineContext) -> BoxFuture<'a, Result<(), PluginError>>
        + Send
        + Sync,
>;

/// Scope of an outbound event delivered to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    Window,
    Vault,
    Global,
}

/// The kernel-side handle a plugin uses to participate in the runtime.
///
/// Implemented once by the orchestrator and handed to every plugin through
/// [`crate::context::PluginContext`], so plugin code never reaches for a
/// hidden global singleton.
#[async_trait]
pub trait KernelHandle: Send + Sync {
    /// Register a command. `override_existing` suppresses the
    /// already-registered warning when replacing a binding on purpose.
    fn register_command(
        &self,
        id: &str,
        owner: &str,
        override_existing: bool,
        handler: CommandFn,
    ) -> Result<(), PluginError>;

    /// Subscribe to a named internal event.
    fn subscribe(&self, event: &str, priority: EventPriority, handler: EventHandlerFn);

    /// Subscribe to a pipeline stage. Only valid during `on_load` or later.
    fn subscribe_pipeline(
        &self,
        stage: PipelineStage,
        priority: EventPriority,
        handler: PipelineHandlerFn,
    );

    /// Publish a named internal event through the bus.
    async fn publish(&self, event: &str, sequential: bool, payload: Value);

    /// Invoke another command through the registry (plugin-to-plugin).
    async fn execute_command(&self, id: &str, params: Value) -> CommandResult;

    /// Surface a toast-style notification to the UI.
    fn notify(&self, message: &str, severity: MessageLevel);

    /// Emit an arbitrary outbound event to the UI.
    fn emit(&self, event_type: &str, data: Value, scope: EventScope);

    /// Whether a UI client is currently connected.
    fn is_client_connected(&self) -> bool;
}

/// Constructs a plugin instance from its resolved identity and config.
///
/// Mirrors the "compiled-in registry of factories" discovery mode: the
/// kernel never executes arbitrary code found on disk, it matches a
/// manifest-declared factory id against this table.
pub type PluginFactory =
    fn(plugin_dir: PathBuf, workspace_path: PathBuf, config: Value) -> Arc<dyn Plugin>;

/// Capability set every in-process plugin implements.
///
/// Lifecycle: `register_commands` (+ optional `register_hooks`) must be
/// pure registration with no I/O, network access, or timers — active
/// behavior waits for `on_load`. `on_tick` is subscribed to the periodic
/// `TICK` event automatically once `on_load` returns.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Directory name this plugin was discovered under.
    fn id(&self) -> &str;

    /// Phase 1: pure registration. No I/O, no subscriptions to events the
    /// plugin would actually process, no timers.
    fn register_commands(&self, ctx: &crate::context::PluginContext) -> Result<(), PluginError>;

    /// Optional Phase 1b hook for plugins that separate hook registration
    /// from command registration. Default is a no-op.
    fn register_hooks(&self, _ctx: &crate::context::PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Phase 2: activation. May rely on every other plugin's commands
    /// already being registered.
    async fn on_load(&self, _ctx: &crate::context::PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called once, the first time the UI signals readiness.
    async fn on_client_connected(
        &self,
        _ctx: &crate::context::PluginContext,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Periodic hook, invoked on the `TICK` cadence after `on_load`.
    async fn on_tick(&self, _ctx: &crate::context::PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called on shutdown or hot restart, in reverse discovery order.
    async fn on_unload(&self, _ctx: &crate::context::PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}
