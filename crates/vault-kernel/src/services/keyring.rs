//! Credential storage contract. Secure OS-keychain storage is outside this
//! kernel's scope; what's specified is the narrow "set environment, list
//! providers" interface the settings.* commands and the LLM collaborator
//! depend on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// A supported LLM provider and the environment variable its API key is
/// forwarded through.
#[derive(Debug, Clone, Copy)]
pub struct ProviderInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub env_var: &'static str,
}

pub const PROVIDERS: &[ProviderInfo] = &[
    ProviderInfo { id: "openai", display_name: "OpenAI", env_var: "OPENAI_API_KEY" },
    ProviderInfo { id: "anthropic", display_name: "Anthropic", env_var: "ANTHROPIC_API_KEY" },
    ProviderInfo { id: "gemini", display_name: "Google Gemini", env_var: "GEMINI_API_KEY" },
    ProviderInfo { id: "mistral", display_name: "Mistral AI", env_var: "MISTRAL_API_KEY" },
    ProviderInfo { id: "groq", display_name: "Groq", env_var: "GROQ_API_KEY" },
    ProviderInfo { id: "openrouter", display_name: "OpenRouter", env_var: "OPENROUTER_API_KEY" },
];

pub fn provider_info(id: &str) -> Option<&'static ProviderInfo> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// Credential storage as seen by the kernel: store/delete/list, and push
/// stored keys into the process environment for the LLM collaborator to
/// pick up.
pub trait CredentialStore: Send + Sync {
    fn store_api_key(&self, provider: &str, api_key: &str) -> bool;
    fn delete_api_key(&self, provider: &str) -> bool;
    fn get_api_key(&self, provider: &str) -> Option<String>;
    fn list_configured_providers(&self) -> Vec<String>;

    /// Forward every stored key into its provider's environment variable.
    fn set_env_vars(&self) {
        for provider in PROVIDERS {
            if let Some(key) = self.get_api_key(provider.id) {
                std::env::set_var(provider.env_var, key);
            }
        }
    }
}

/// In-memory credential store. A real deployment would back this with the
/// OS keychain; this kernel only specifies the interface above, so an
/// in-process map keyed by provider id stands in for it.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    secrets: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn store_api_key(&self, provider: &str, api_key: &str) -> bool {
        if provider_info(provider).is_none() {
            return false;
        }
        self.secrets.write().insert(provider.to_string(), api_key.to_string());
        true
    }

    fn delete_api_key(&self, provider: &str) -> bool {
        self.secrets.write().remove(provider).is_some()
    }

    fn get_api_key(&self, provider: &str) -> Option<String> {
        self.secrets.read().get(provider).cloned()
    }

    fn list_configured_providers(&self) -> Vec<String> {
        self.secrets.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let store = InMemoryCredentialStore::new();
        assert!(!store.store_api_key("not-a-provider", "sk-test"));
    }

    #[test]
    fn stored_key_round_trips() {
        let store = InMemoryCredentialStore::new();
        assert!(store.store_api_key("openai", "sk-test"));
        assert_eq!(store.get_api_key("openai").as_deref(), Some("sk-test"));
        assert_eq!(store.list_configured_providers(), vec!["openai".to_string()]);
    }

    #[test]
    fn deleting_an_unconfigured_provider_reports_false() {
        let store = InMemoryCredentialStore::new();
        assert!(!store.delete_api_key("anthropic"));
    }
}
