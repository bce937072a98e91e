#![deny(rust_2018_idioms)]

//! Shared plugin interface between the vault kernel and in-process plugins.
//!
//! A plugin is a trusted, in-process extension: the kernel never sandboxes
//! plugin code, so this crate only needs to describe the *shape* of the
//! lifecycle (two registration phases, one optional periodic hook) and the
//! handful of value types that cross the boundary between a plugin and the
//! kernel's command registry, event bus, and chat pipeline.

pub mod context;
pub mod error;
pub mod pipeline;
pub mod plugin;
pub mod protocol;

pub use context::PluginContext;
pub use error::PluginError;
pub use pipeline::{HistoryEntry, PipelineContext, PipelineStage};
pub use plugin::{
    CommandFn, CommandResult, EventHandlerFn, EventScope, KernelHandle, Plugin, PipelineHandlerFn,
    PluginFactory,
};
pub use protocol::{EventPriority, MessageLevel, PluginCommandParams};
