// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ConduitError;
use crate::message::Message;
use crate::request::GenerationRequest;

/// Usage and outcome metadata attached to every response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetadata {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Provider's stop reason, normalized to its wire value
    /// (`"stop"`, `"tool_calls"`, `"max_tokens"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Wall-clock duration of the provider call in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Set by the middleware when the response was served from cache.
    #[serde(default)]
    pub cache_hit: bool,
}

impl ResponseMetadata {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            stop_reason: None,
            duration_ms: 0,
            timestamp: Utc::now(),
            cache_hit: false,
        }
    }

    pub fn with_stop_reason(mut self, reason: impl Into<String>) -> Self {
        self.stop_reason = Some(reason.into());
        self
    }
}

/// A completed generation: the assistant's message plus the request that
/// produced it and the usage metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationResponse {
    pub message: Message,
    pub request: GenerationRequest,
    pub metadata: ResponseMetadata,
}

impl GenerationResponse {
    pub fn new(message: Message, request: GenerationRequest, metadata: ResponseMetadata) -> Self {
        Self { message, request, metadata }
    }

    /// The assistant's text content.
    pub fn text(&self) -> String {
        self.message.text()
    }
}

// ─── Streaming ────────────────────────────────────────────────────────────────

/// One event from a provider's chunk stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    TextDelta(String),
    /// Usage frame.  Providers report input tokens at stream start and output
    /// tokens near the end; consumers accumulate with [`StreamUsage::absorb`].
    Usage { input_tokens: u32, output_tokens: u32 },
    /// The stream finished normally.
    Done,
}

/// Accumulated usage over a stream's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl StreamUsage {
    /// Fold a usage frame in.  Frames carry partial counts (input at start,
    /// output at end), so each side takes the max seen.
    pub fn absorb(&mut self, input_tokens: u32, output_tokens: u32) {
        self.input_tokens = self.input_tokens.max(input_tokens);
        self.output_tokens = self.output_tokens.max(output_tokens);
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ConduitError>> + Send>>;

/// Handle over an in-flight streamed generation.
///
/// Dropping the inner stream aborts the underlying HTTP transfer, so
/// [`close`](StreamHandle::close) is how the parser early-terminates a stream
/// once it has what it needs.
pub struct StreamHandle {
    pub model: String,
    stream: Option<EventStream>,
}

impl StreamHandle {
    pub fn new(model: impl Into<String>, stream: EventStream) -> Self {
        Self { model: model.into(), stream: Some(stream) }
    }

    /// The event stream, if not yet closed.
    pub fn stream_mut(&mut self) -> Option<&mut EventStream> {
        self.stream.as_mut()
    }

    /// Abort the upstream transfer.  Idempotent.
    pub fn close(&mut self) {
        self.stream = None;
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("model", &self.model)
            .field("closed", &self.stream.is_none())
            .finish()
    }
}

/// What a provider call produced: a finished response or a live stream.
#[derive(Debug)]
pub enum GenerationOutcome {
    Response(GenerationResponse),
    Stream(StreamHandle),
}

impl GenerationOutcome {
    /// Unwrap the completed response; streaming outcomes are a contract
    /// violation at call sites that requested `stream = false`.
    pub fn into_response(self) -> Result<GenerationResponse, ConduitError> {
        match self {
            Self::Response(r) => Ok(r),
            Self::Stream(_) => Err(ConduitError::validation(
                "expected a completed response but got a stream handle",
            )),
        }
    }
}

/// Alias used throughout the pipeline.
pub type GenerationResult = Result<GenerationOutcome, ConduitError>;

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GenerationParams;

    fn response(text: &str) -> GenerationResponse {
        let request = GenerationRequest::new(
            vec![Message::user("q")],
            GenerationParams::new("mock-model"),
        );
        GenerationResponse::new(Message::assistant(text), request, ResponseMetadata::new(10, 5))
    }

    #[test]
    fn metadata_defaults() {
        let m = ResponseMetadata::new(10, 5);
        assert_eq!(m.input_tokens, 10);
        assert_eq!(m.output_tokens, 5);
        assert!(!m.cache_hit);
        assert!(m.stop_reason.is_none());
    }

    #[test]
    fn response_text_is_assistant_content() {
        assert_eq!(response("hello").text(), "hello");
    }

    #[test]
    fn response_round_trips() {
        let r = response("hello");
        let json = serde_json::to_string(&r).unwrap();
        let back: GenerationResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn stream_usage_absorbs_partial_frames() {
        let mut u = StreamUsage::default();
        u.absorb(42, 0); // stream start: input only
        u.absorb(0, 17); // stream end: output only
        assert_eq!(u, StreamUsage { input_tokens: 42, output_tokens: 17 });
    }

    #[test]
    fn stream_usage_takes_max_of_repeated_frames() {
        let mut u = StreamUsage::default();
        u.absorb(0, 5);
        u.absorb(0, 12);
        u.absorb(0, 3);
        assert_eq!(u.output_tokens, 12);
    }

    #[test]
    fn stream_handle_close_is_idempotent() {
        let stream: EventStream = Box::pin(futures::stream::empty());
        let mut h = StreamHandle::new("m", stream);
        assert!(!h.is_closed());
        h.close();
        h.close();
        assert!(h.is_closed());
        assert!(h.stream_mut().is_none());
    }

    #[test]
    fn outcome_into_response_rejects_stream() {
        let stream: EventStream = Box::pin(futures::stream::empty());
        let out = GenerationOutcome::Stream(StreamHandle::new("m", stream));
        assert!(out.into_response().is_err());
    }
}
