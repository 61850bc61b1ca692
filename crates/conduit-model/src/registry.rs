// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider registry: static metadata for every supported backend.
//!
//! Single source of truth for which provider IDs exist and their defaults.
//! It does **not** contain construction logic — that lives in
//! [`crate::store::ModelStore`].

/// Metadata describing a registered provider.
#[derive(Debug, Clone)]
pub struct ProviderMeta {
    /// Unique provider id (e.g. `"openai"`), matching catalog entries.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// One-line description shown by `conduit models`.
    pub description: &'static str,
    /// Environment variable that holds the API key.  `None` for providers
    /// that require no key (local daemons, mock).
    pub api_key_env: Option<&'static str>,
    /// Default base URL.  `None` when the URL comes from settings (Ollama,
    /// remote).
    pub default_base_url: Option<&'static str>,
    /// Whether an explicit API key is required.
    pub requires_api_key: bool,
    /// Model-name prefixes used to infer the provider for models missing
    /// from the catalog.
    pub model_prefixes: &'static [&'static str],
}

/// Complete registry of supported providers.
pub static PROVIDERS: &[ProviderMeta] = &[
    ProviderMeta {
        id: "openai",
        name: "OpenAI",
        description: "OpenAI GPT and o-series models",
        api_key_env: Some("OPENAI_API_KEY"),
        default_base_url: Some("https://api.openai.com/v1"),
        requires_api_key: true,
        model_prefixes: &["gpt-", "o1", "o3", "o4", "chatgpt-", "whisper-", "tts-", "dall-e"],
    },
    ProviderMeta {
        id: "anthropic",
        name: "Anthropic",
        description: "Anthropic Claude models",
        api_key_env: Some("ANTHROPIC_API_KEY"),
        default_base_url: Some("https://api.anthropic.com"),
        requires_api_key: true,
        model_prefixes: &["claude-"],
    },
    ProviderMeta {
        id: "google",
        name: "Google Gemini",
        description: "Google Gemini via the OpenAI-compatible endpoint",
        api_key_env: Some("GOOGLE_API_KEY"),
        default_base_url: Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        requires_api_key: true,
        model_prefixes: &["gemini-"],
    },
    ProviderMeta {
        id: "perplexity",
        name: "Perplexity",
        description: "Perplexity online search and reasoning models",
        api_key_env: Some("PERPLEXITY_API_KEY"),
        default_base_url: Some("https://api.perplexity.ai"),
        requires_api_key: true,
        model_prefixes: &["sonar"],
    },
    ProviderMeta {
        id: "ollama",
        name: "Ollama",
        description: "Ollama local model runner (http://localhost:11434)",
        api_key_env: None,
        default_base_url: None,
        requires_api_key: false,
        model_prefixes: &["llama", "qwen", "mistral", "llava", "phi", "gemma"],
    },
    ProviderMeta {
        id: "mock",
        name: "Mock",
        description: "Scripted provider for tests (no network, echoes input)",
        api_key_env: None,
        default_base_url: None,
        requires_api_key: false,
        model_prefixes: &["mock-"],
    },
];

/// Returns all registered providers in declaration order.
pub fn list_providers() -> &'static [ProviderMeta] {
    PROVIDERS
}

/// Look up a provider by its id.  Returns `None` for unknown ids.
pub fn get_provider(id: &str) -> Option<&'static ProviderMeta> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// Infer the provider for a model name via its prefix table.
pub fn provider_for_model_prefix(model: &str) -> Option<&'static ProviderMeta> {
    PROVIDERS
        .iter()
        .find(|p| p.model_prefixes.iter().any(|prefix| model.starts_with(prefix)))
}
