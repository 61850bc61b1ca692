// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Perplexity client.
//!
//! The wire format is OpenAI-compatible; the one difference is the response's
//! extra `search_results` field.  Those are rendered as a trailing `Sources:`
//! footnote block on the assistant text so the rest of the pipeline never
//! needs a citation-specific content type.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;

use crate::clients::openai_compat::{
    parse_chat_response, validate_structured, CompatConfig, OpenAiCompatClient,
};
use crate::clients::{ProviderClient, TokenPayload};
use crate::error::ConduitError;
use crate::message::Message;
use crate::params::OutputType;
use crate::request::GenerationRequest;
use crate::response::{GenerationOutcome, GenerationResult};
use crate::tokens;

#[derive(Debug)]
pub struct PerplexityClient {
    inner: OpenAiCompatClient,
}

impl PerplexityClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| "https://api.perplexity.ai".to_string());
        Self {
            inner: OpenAiCompatClient::new(CompatConfig {
                provider: "perplexity".to_string(),
                base_url,
                api_key: Some(api_key),
            }),
        }
    }
}

/// Render `search_results` into a `Sources:` footnote block, numbered in
/// citation order.  Returns an empty string when there are none.
pub(crate) fn format_search_results(raw: &Value) -> String {
    let Some(results) = raw["search_results"].as_array() else {
        return String::new();
    };
    if results.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nSources:\n");
    for (i, r) in results.iter().enumerate() {
        let title = r["title"].as_str().unwrap_or("untitled");
        let url = r["url"].as_str().unwrap_or("");
        out.push_str(&format!("[{}] {} - {}\n", i + 1, title, url));
    }
    out.trim_end().to_string()
}

#[async_trait]
impl ProviderClient for PerplexityClient {
    fn provider(&self) -> &str {
        "perplexity"
    }

    async fn query(&self, request: &GenerationRequest) -> GenerationResult {
        if request.params.output_type != OutputType::Text {
            return Err(ConduitError::unsupported_modality(
                "perplexity supports text output only",
            ));
        }
        if request.params.stream {
            // Citations arrive on the final frame the compat parser already
            // ignores; streamed answers carry no footnotes.
            return Ok(GenerationOutcome::Stream(
                self.inner.complete_stream(request).await?,
            ));
        }

        let started = Instant::now();
        let raw = self.inner.chat_raw(request).await?;
        let mut response = parse_chat_response(&raw, request)?;
        validate_structured(request, &response)?;

        let footnotes = format_search_results(&raw);
        if !footnotes.is_empty() {
            if let Message::Assistant { content, .. } = &mut response.message {
                content.push_str(&footnotes);
            }
        }
        response.metadata.duration_ms = started.elapsed().as_millis() as u64;
        Ok(GenerationOutcome::Response(response))
    }

    async fn tokenize(&self, _model: &str, payload: TokenPayload<'_>) -> Result<u32, ConduitError> {
        // Per Perplexity's documentation, cl100k_base is the reference
        // tokenizer for their models.
        match payload {
            TokenPayload::Text(text) => tokens::count_text("cl100k", text),
            TokenPayload::Messages(messages) => tokens::count_messages("cl100k", messages),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_search_results_yields_empty_block() {
        assert_eq!(format_search_results(&json!({})), "");
        assert_eq!(format_search_results(&json!({"search_results": []})), "");
    }

    #[test]
    fn search_results_render_numbered_footnotes() {
        let raw = json!({
            "search_results": [
                { "title": "Dolphins", "url": "https://example.com/dolphins" },
                { "title": "Whales", "url": "https://example.com/whales" }
            ]
        });
        let block = format_search_results(&raw);
        assert!(block.starts_with("\n\nSources:"));
        assert!(block.contains("[1] Dolphins - https://example.com/dolphins"));
        assert!(block.contains("[2] Whales - https://example.com/whales"));
    }

    #[test]
    fn missing_fields_degrade_gracefully() {
        let raw = json!({ "search_results": [ {} ] });
        let block = format_search_results(&raw);
        assert!(block.contains("[1] untitled - "));
    }
}
