// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use crate::catalog;
use crate::clients::{ProviderClient, TokenPayload};
use crate::error::ConduitError;
use crate::message::{Message, Role, UserContent};
use crate::params::{ExecutionMode, GenerationParams};
use crate::request::GenerationRequest;
use crate::response::GenerationResult;
use crate::store::ModelStore;

/// Caller-facing input for a single generation: a bare prompt or a full
/// message history.
#[derive(Debug, Clone)]
pub enum QueryInput {
    Text(String),
    Messages(Vec<Message>),
}

impl From<&str> for QueryInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for QueryInput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<Message>> for QueryInput {
    fn from(messages: Vec<Message>) -> Self {
        Self::Messages(messages)
    }
}

/// Identity wrapper around a provider client: a `(model name, client)` pair.
///
/// Stateless except for identity — generation parameters and runtime options
/// arrive on every call.  The model knows nothing about caching, display, or
/// telemetry; that is the middleware's business.
#[derive(Clone)]
pub struct Model {
    name: String,
    client: Arc<dyn ProviderClient>,
}

impl Model {
    /// Look the client up in the store and bind it to the model name.
    pub fn resolve(store: &ModelStore, name: &str, mode: ExecutionMode) -> Result<Self, ConduitError> {
        let client = store.get_client(name, mode)?;
        Ok(Self { name: name.to_string(), client })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &str {
        self.client.provider()
    }

    /// Execute a request against this model's provider.
    pub async fn pipe(&self, request: &GenerationRequest) -> GenerationResult {
        if request.params.model != self.name {
            return Err(ConduitError::validation(format!(
                "request is for model '{}' but this model is '{}'",
                request.params.model, self.name,
            )));
        }
        self.client.query(request).await
    }

    /// Normalize caller input into a validated request.
    ///
    /// Ensures `params.model` matches this model, prepends the system message
    /// from params when the history has none, and validates message content
    /// against the model's catalog capabilities.
    pub fn prepare_request(
        &self,
        input: impl Into<QueryInput>,
        mut params: GenerationParams,
    ) -> Result<GenerationRequest, ConduitError> {
        params.model = self.name.clone();

        let mut messages = match input.into() {
            QueryInput::Text(text) => vec![Message::user(text)],
            QueryInput::Messages(messages) => messages,
        };
        if messages.is_empty() {
            return Err(ConduitError::validation("input has no messages"));
        }
        if let Some(system) = &params.system {
            let has_system = messages.iter().any(|m| m.role() == Role::System);
            if !has_system {
                messages.insert(0, Message::system(system));
            }
        }
        validate_capabilities(&self.name, &messages)?;
        Ok(GenerationRequest::new(messages, params))
    }

    /// Count tokens with the provider's tokenizer.
    pub async fn tokenize(&self, payload: TokenPayload<'_>) -> Result<u32, ConduitError> {
        self.client.tokenize(&self.name, payload).await
    }
}

/// Check message content against the catalog's modality record.  Models
/// missing from the catalog are not constrained here (the provider will
/// reject what it cannot do).
fn validate_capabilities(model: &str, messages: &[Message]) -> Result<(), ConduitError> {
    for m in messages {
        if let Message::User { content, .. } = m {
            if let UserContent::Blocks(_) = content {
                if !content.has_text_block() {
                    return Err(ConduitError::validation(
                        "a multimodal user message must contain at least one text block",
                    ));
                }
            }
        }
    }

    let Some(entry) = catalog::lookup(model) else {
        return Ok(());
    };
    for m in messages {
        if !entry.supports_images() && !m.image_urls().is_empty() {
            return Err(ConduitError::unsupported_modality(format!(
                "model '{model}' does not accept image input"
            )));
        }
        if !entry.supports_audio() && m.has_audio() {
            return Err(ConduitError::unsupported_modality(format!(
                "model '{model}' does not accept audio input"
            )));
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
