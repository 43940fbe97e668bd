//! Registry of AI provider agents and the env variables they require.

use crate::env_file::EnvFile;
use crate::keystore::KeyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderAgent {
    /// Stable id used by `Settings::selected_agent`.
    pub id: &'static str,
    pub display_name: &'static str,
    /// Env-var name the worker expects for this provider.
    pub env_key: &'static str,
    /// Whether the provider can answer vision (screenshot) requests.
    pub supports_vision: bool,
}

pub const AGENT_REGISTRY: [ProviderAgent; 4] = [
    ProviderAgent {
        id: "openai",
        display_name: "OpenAI",
        env_key: "OPENAI_API_KEY",
        supports_vision: true,
    },
    ProviderAgent {
        id: "anthropic",
        display_name: "Anthropic",
        env_key: "ANTHROPIC_API_KEY",
        supports_vision: true,
    },
    ProviderAgent {
        id: "gemini",
        display_name: "Google Gemini",
        env_key: "GEMINI_API_KEY",
        supports_vision: true,
    },
    ProviderAgent {
        id: "groq",
        display_name: "Groq",
        env_key: "GROQ_API_KEY",
        supports_vision: false,
    },
];

pub fn agent_by_id(id: &str) -> Option<&'static ProviderAgent> {
    AGENT_REGISTRY.iter().find(|a| a.id == id)
}

/// Resolve which providers have a usable key, consulting the key store
/// first and the plain config file as override.
pub fn available_providers(env: &EnvFile, store: &KeyStore) -> Vec<String> {
    AGENT_REGISTRY
        .iter()
        .filter(|agent| {
            env.is_set(agent.env_key)
                || matches!(store.get(agent.env_key), Ok(Some(ref v)) if !v.is_empty())
        })
        .map(|agent| agent.env_key.to_string())
        .collect()
}
