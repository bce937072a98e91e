//! Compiled-in plugin factories, matched against a discovered plugin's
//! manifest by name. A safety-motivated choice of this kernel, not a
//! carried-over one: it instantiates a known Rust type behind the id the
//! manifest declares rather than executing anything the manifest names.

use vault_plugin_sdk::plugin::PluginFactory;

mod memory_demo;

pub fn lookup(factory_name: &str) -> Option<PluginFactory> {
    match factory_name {
        "memory_demo" => Some(memory_demo::factory),
        _ => None,
    }
}
