// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Google Gemini via the Generative Language API's OpenAI-compatible mode.
//! The wire format is plain chat-completions; only the endpoint and key
//! differ, so this is a thin delegation to the compat client.

use async_trait::async_trait;

use crate::clients::openai_compat::{CompatConfig, OpenAiCompatClient};
use crate::clients::{ProviderClient, TokenPayload};
use crate::error::ConduitError;
use crate::request::GenerationRequest;
use crate::response::GenerationResult;

#[derive(Debug)]
pub struct GoogleClient {
    inner: OpenAiCompatClient,
}

impl GoogleClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| {
            "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
        });
        Self {
            inner: OpenAiCompatClient::new(CompatConfig {
                provider: "google".to_string(),
                base_url,
                api_key: Some(api_key),
            }),
        }
    }
}

#[async_trait]
impl ProviderClient for GoogleClient {
    fn provider(&self) -> &str {
        "google"
    }

    async fn query(&self, request: &GenerationRequest) -> GenerationResult {
        self.inner.query(request).await
    }

    async fn tokenize(&self, model: &str, payload: TokenPayload<'_>) -> Result<u32, ConduitError> {
        // Gemini exposes no local tokenizer; the compat approximation is the
        // documented fallback.
        self.inner.tokenize(model, payload).await
    }
}
