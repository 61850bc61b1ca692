// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Scripted provider for tests: no network, deterministic replies, call
//! accounting.  Also useful for offline development (`mock-model`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Map;

use crate::clients::{ProviderClient, TokenPayload};
use crate::error::ConduitError;
use crate::message::{Message, ToolCall};
use crate::request::GenerationRequest;
use crate::response::{
    EventStream, GenerationOutcome, GenerationResponse, GenerationResult, ResponseMetadata,
    StreamEvent, StreamHandle,
};

/// One scripted reply.  The script is consumed front to back; when it runs
/// dry the client echoes the prompt.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Plain assistant text.
    Text(String),
    /// An assistant turn requesting one tool call.
    ToolCall {
        name: String,
        arguments: Map<String, serde_json::Value>,
    },
    /// A typed failure.
    Error(ConduitError),
    /// A streamed reply delivered as these text chunks, then usage, then Done.
    Stream(Vec<String>),
}

#[derive(Default, Debug)]
pub struct MockClient {
    script: Mutex<VecDeque<MockReply>>,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    /// Artificial latency per call; lets concurrency tests observe overlap.
    delay: Option<Duration>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    /// Append a scripted reply.
    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push_reply(MockReply::Text(text.into()));
    }

    pub fn push_tool_call(
        &self,
        name: impl Into<String>,
        arguments: Map<String, serde_json::Value>,
    ) {
        self.push_reply(MockReply::ToolCall { name: name.into(), arguments });
    }

    /// Total number of `query` calls so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently in-flight calls observed.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn echo_text(request: &GenerationRequest) -> String {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role() == crate::message::Role::User)
            .map(|m| m.text())
            .unwrap_or_default();
        format!("mock reply: {prompt}")
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn query(&self, request: &GenerationRequest) -> GenerationResult {
        self.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.script.lock().unwrap().pop_front();
        let result = match reply {
            None => Ok(GenerationOutcome::Response(GenerationResponse::new(
                Message::assistant(Self::echo_text(request)),
                request.clone(),
                ResponseMetadata::new(10, 5),
            ))),
            Some(MockReply::Text(text)) => Ok(GenerationOutcome::Response(
                GenerationResponse::new(
                    Message::assistant(text),
                    request.clone(),
                    ResponseMetadata::new(10, 5),
                ),
            )),
            Some(MockReply::ToolCall { name, arguments }) => {
                let call = ToolCall::new(
                    format!("mock-call-{}", self.call_count()),
                    name,
                    arguments,
                );
                let mut metadata = ResponseMetadata::new(10, 5);
                metadata.stop_reason = Some("tool_calls".to_string());
                Ok(GenerationOutcome::Response(GenerationResponse::new(
                    Message::assistant_with_tool_calls("", vec![call]),
                    request.clone(),
                    metadata,
                )))
            }
            Some(MockReply::Error(e)) => Err(e),
            Some(MockReply::Stream(chunks)) => {
                let mut events: Vec<Result<StreamEvent, ConduitError>> = chunks
                    .into_iter()
                    .map(|c| Ok(StreamEvent::TextDelta(c)))
                    .collect();
                events.push(Ok(StreamEvent::Usage { input_tokens: 10, output_tokens: 5 }));
                events.push(Ok(StreamEvent::Done));
                let stream: EventStream = Box::pin(futures::stream::iter(events));
                Ok(GenerationOutcome::Stream(StreamHandle::new(
                    &request.params.model,
                    stream,
                )))
            }
        };
        self.exit();
        result
    }

    async fn tokenize(&self, _model: &str, payload: TokenPayload<'_>) -> Result<u32, ConduitError> {
        // Deterministic 4-chars-per-token heuristic.
        Ok(match payload {
            TokenPayload::Text(text) => (text.len() / 4).max(1) as u32,
            TokenPayload::Messages(messages) => messages
                .iter()
                .map(|m| m.approx_tokens() as u32)
                .sum::<u32>(),
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GenerationParams;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest::new(vec![Message::user(prompt)], GenerationParams::new("mock-model"))
    }

    #[tokio::test]
    async fn default_reply_echoes_prompt() {
        let client = MockClient::new();
        let out = client.query(&request("hi")).await.unwrap();
        let resp = out.into_response().unwrap();
        assert_eq!(resp.text(), "mock reply: hi");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn scripted_replies_are_consumed_in_order() {
        let client = MockClient::new();
        client.push_text("first");
        client.push_text("second");
        let a = client.query(&request("x")).await.unwrap().into_response().unwrap();
        let b = client.query(&request("x")).await.unwrap().into_response().unwrap();
        assert_eq!(a.text(), "first");
        assert_eq!(b.text(), "second");
    }

    #[tokio::test]
    async fn scripted_tool_call_sets_stop_reason() {
        let client = MockClient::new();
        let mut args = Map::new();
        args.insert("path".into(), serde_json::json!("/tmp"));
        client.push_tool_call("ls", args);
        let resp = client.query(&request("files?")).await.unwrap().into_response().unwrap();
        assert_eq!(resp.message.tool_calls().len(), 1);
        assert_eq!(resp.metadata.stop_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn scripted_error_is_returned() {
        let client = MockClient::new();
        client.push_reply(MockReply::Error(ConduitError::provider_status(500, "boom")));
        let err = client.query(&request("x")).await.unwrap_err();
        assert_eq!(err.info.code, "provider_5xx");
    }

    #[tokio::test]
    async fn scripted_stream_yields_chunks_then_done() {
        use futures::StreamExt;
        let client = MockClient::new();
        client.push_reply(MockReply::Stream(vec!["a".into(), "b".into()]));
        let out = client.query(&request("x")).await.unwrap();
        let mut handle = match out {
            GenerationOutcome::Stream(h) => h,
            _ => panic!("expected stream"),
        };
        let mut texts = String::new();
        let mut done = false;
        while let Some(ev) = handle.stream_mut().unwrap().next().await {
            match ev.unwrap() {
                StreamEvent::TextDelta(t) => texts.push_str(&t),
                StreamEvent::Done => done = true,
                StreamEvent::Usage { .. } => {}
            }
        }
        assert_eq!(texts, "ab");
        assert!(done);
    }

    #[tokio::test]
    async fn tokenize_uses_four_char_heuristic() {
        let client = MockClient::new();
        assert_eq!(
            client.tokenize("mock-model", TokenPayload::Text("12345678")).await.unwrap(),
            2
        );
    }
}
