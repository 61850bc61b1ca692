// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Ollama client: the daemon's OpenAI-compatible endpoint plus its native
//! quirks.  No API key.  The context window comes from a configuration table
//! keyed by model tag (default 32768) and is forwarded as `num_ctx`; the
//! available tag list is enumerated at startup and persisted; tokenization
//! runs a zero-output generation and reads `prompt_eval_count`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use conduit_config::Settings;

use crate::clients::openai_compat::{CompatConfig, OpenAiCompatClient};
use crate::clients::{ProviderClient, TokenPayload};
use crate::error::ConduitError;
use crate::request::GenerationRequest;
use crate::response::GenerationResult;

#[derive(Debug)]
pub struct OllamaClient {
    inner: OpenAiCompatClient,
    http: reqwest::Client,
    /// Daemon base URL without the `/v1` suffix.
    daemon_url: String,
    settings: Settings,
}

impl OllamaClient {
    pub fn new(settings: Settings) -> Self {
        let daemon_url = settings.ollama_url.trim_end_matches('/').to_string();
        let inner = OpenAiCompatClient::new(CompatConfig {
            provider: "ollama".to_string(),
            base_url: format!("{daemon_url}/v1"),
            api_key: None,
        });
        Self { inner, http: reqwest::Client::new(), daemon_url, settings }
    }

    /// Enumerate the daemon's pulled model tags and persist the list to the
    /// state dir so other tooling can read it without a live daemon.
    ///
    /// Failures are non-fatal: a missing daemon just leaves the catalog as
    /// the source of truth.
    pub async fn refresh_models(&self) -> Result<Vec<String>, ConduitError> {
        let raw: Value = self
            .http
            .get(format!("{}/api/tags", self.daemon_url))
            .send()
            .await
            .map_err(|e| ConduitError::from_transport(&e))?
            .json()
            .await
            .map_err(|e| ConduitError::malformed_response(e.to_string()))?;

        let tags = parse_tags(&raw);
        let state_dir = conduit_config::default_state_dir();
        if let Err(e) = persist_tags(&state_dir, &tags) {
            warn!(error = %e, "could not persist ollama tag list");
        }
        debug!(count = tags.len(), "refreshed ollama model tags");
        Ok(tags)
    }

    /// Count prompt tokens by running a generation capped at zero output and
    /// reading the daemon's `prompt_eval_count`.
    async fn daemon_tokenize(&self, model: &str, prompt: &str) -> Result<u32, ConduitError> {
        let body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": { "num_predict": 0 },
        });
        let resp = self
            .http
            .post(format!("{}/api/generate", self.daemon_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ConduitError::from_transport(&e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ConduitError::provider_status(status.as_u16(), text));
        }
        let raw: Value = resp
            .json()
            .await
            .map_err(|e| ConduitError::malformed_response(e.to_string()))?;
        Ok(raw["prompt_eval_count"].as_u64().unwrap_or(0) as u32)
    }
}

/// Extract the tag names from an `/api/tags` response.
pub(crate) fn parse_tags(raw: &Value) -> Vec<String> {
    raw["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["model"].as_str().or_else(|| m["name"].as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn persist_tags(dir: &std::path::Path, tags: &[String]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let payload = serde_json::to_string(&json!({ "ollama": tags }))
        .unwrap_or_else(|_| "{}".to_string());
    std::fs::write(dir.join("ollama_models.json"), payload)
}

#[async_trait]
impl ProviderClient for OllamaClient {
    fn provider(&self) -> &str {
        "ollama"
    }

    async fn query(&self, request: &GenerationRequest) -> GenerationResult {
        // Forward the configured context window unless the caller set one.
        let mut request = request.clone();
        let num_ctx = self.settings.ollama_context_size(&request.params.model);
        request
            .params
            .client_params
            .entry("num_ctx".to_string())
            .or_insert_with(|| json!(num_ctx));
        self.inner.query(&request).await
    }

    async fn tokenize(&self, model: &str, payload: TokenPayload<'_>) -> Result<u32, ConduitError> {
        match payload {
            TokenPayload::Text(text) => self.daemon_tokenize(model, text).await,
            TokenPayload::Messages(messages) => {
                // The daemon has no chat-history count endpoint; render turns
                // with role markers so the overhead is represented.
                let rendered = messages
                    .iter()
                    .map(|m| format!("<|{}|>\n{}", role_tag(m), m.text()))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.daemon_tokenize(model, &rendered).await
            }
        }
    }
}

fn role_tag(m: &crate::message::Message) -> &'static str {
    match m.role() {
        crate::message::Role::System => "system",
        crate::message::Role::User => "user",
        crate::message::Role::Assistant => "assistant",
        crate::message::Role::Tool => "tool",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
