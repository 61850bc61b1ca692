// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::error::ConduitError;
use crate::message::Message;
use crate::request::GenerationRequest;
use crate::response::GenerationResult;

pub mod anthropic;
pub mod google;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod openai_compat;
pub mod perplexity;
pub mod remote;
pub mod sse;

/// Payload handed to a provider tokenizer.
///
/// A plain string returns the raw token weight with no overhead; a message
/// list includes the provider's per-message overhead (role markers, turn
/// separators).
#[derive(Debug, Clone, Copy)]
pub enum TokenPayload<'a> {
    Text(&'a str),
    Messages(&'a [Message]),
}

/// One provider backend: adapts requests to the provider's wire format,
/// performs the network call, and adapts responses back.
#[async_trait]
pub trait ProviderClient: Send + Sync + std::fmt::Debug {
    /// Provider id, matching the registry (`"openai"`, `"anthropic"`, ...).
    fn provider(&self) -> &str;

    /// Execute a generation request.  Returns a completed response, a stream
    /// handle when `params.stream` is set, or a typed error.
    async fn query(&self, request: &GenerationRequest) -> GenerationResult;

    /// Count tokens with the provider's native tokenizer where available.
    async fn tokenize(&self, model: &str, payload: TokenPayload<'_>)
        -> Result<u32, ConduitError>;
}
