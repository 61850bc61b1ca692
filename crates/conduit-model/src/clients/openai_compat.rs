// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Chat-completions wire format shared by OpenAI, Google (OpenAI-compatible
//! endpoint), Perplexity, and Ollama.  Provider-specific quirks live in thin
//! wrappers that delegate here.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::warn;

use crate::clients::{sse, ProviderClient, TokenPayload};
use crate::error::ConduitError;
use crate::message::{ContentBlock, Message, ToolCall, UserContent};
use crate::params::OutputType;
use crate::request::GenerationRequest;
use crate::response::{
    EventStream, GenerationOutcome, GenerationResponse, GenerationResult, ResponseMetadata,
    StreamEvent, StreamHandle,
};
use crate::tokens;

/// Connection settings for one OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct CompatConfig {
    /// Provider id reported on responses and telemetry.
    pub provider: String,
    /// Base URL up to and including the version segment, no trailing slash
    /// (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug)]
pub struct OpenAiCompatClient {
    cfg: CompatConfig,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(cfg: CompatConfig) -> Self {
        Self { cfg, http: reqwest::Client::new() }
    }

    pub fn config(&self) -> &CompatConfig {
        &self.cfg
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url)
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Execute a chat request and return the raw response JSON.  Shared by
    /// the plain path and wrappers that post-process the body (Perplexity).
    pub async fn chat_raw(&self, request: &GenerationRequest) -> Result<Value, ConduitError> {
        let body = build_chat_body(request)?;
        let resp = self
            .apply_auth(self.http.post(self.chat_url()))
            .timeout(request.params.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| ConduitError::from_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ConduitError::provider_status(status.as_u16(), text)
                .with_request_params(body));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| ConduitError::malformed_response(e.to_string()))
    }

    /// Non-streaming completion.
    pub async fn complete(&self, request: &GenerationRequest) -> Result<GenerationResponse, ConduitError> {
        let started = Instant::now();
        let raw = self.chat_raw(request).await?;
        let mut response = parse_chat_response(&raw, request)?;
        response.metadata.duration_ms = started.elapsed().as_millis() as u64;
        validate_structured(request, &response)?;
        Ok(response)
    }

    /// Streaming completion: returns a handle whose events are text deltas
    /// and usage frames.
    pub async fn complete_stream(&self, request: &GenerationRequest) -> Result<StreamHandle, ConduitError> {
        let mut body = build_chat_body(request)?;
        body["stream"] = json!(true);
        // Without this the OpenAI family omits the final usage frame.
        body["stream_options"] = json!({ "include_usage": true });

        let resp = self
            .apply_auth(self.http.post(self.chat_url()))
            .timeout(request.params.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| ConduitError::from_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ConduitError::provider_status(status.as_u16(), text));
        }

        let events: EventStream = Box::pin(sse::data_lines(resp).filter_map(|item| {
            futures::future::ready(match item {
                Ok(data) => parse_stream_data(&data),
                Err(e) => Some(Err(e)),
            })
        }));
        Ok(StreamHandle::new(&request.params.model, events))
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatClient {
    fn provider(&self) -> &str {
        &self.cfg.provider
    }

    async fn query(&self, request: &GenerationRequest) -> GenerationResult {
        if request.params.output_type != OutputType::Text {
            return Err(ConduitError::unsupported_modality(format!(
                "{} supports text output only via the chat endpoint",
                self.cfg.provider,
            )));
        }
        if request.params.stream {
            Ok(GenerationOutcome::Stream(self.complete_stream(request).await?))
        } else {
            Ok(GenerationOutcome::Response(self.complete(request).await?))
        }
    }

    async fn tokenize(&self, model: &str, payload: TokenPayload<'_>) -> Result<u32, ConduitError> {
        match payload {
            TokenPayload::Text(text) => tokens::count_text(model, text),
            TokenPayload::Messages(messages) => tokens::count_messages(model, messages),
        }
    }
}

// ─── Wire building ────────────────────────────────────────────────────────────

/// Convert the message history into chat-completions wire messages.
///
/// System turns are first-class messages; multimodal user content becomes a
/// typed block list; tool-call arguments are serialized as a JSON string.
pub(crate) fn build_chat_messages(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        match m {
            Message::System { content, .. } => {
                out.push(json!({ "role": "system", "content": content }));
            }
            Message::User { content, name, .. } => {
                let wire_content = match content {
                    UserContent::Text(t) => json!(t),
                    UserContent::Blocks(blocks) => {
                        json!(blocks.iter().map(block_to_wire).collect::<Vec<_>>())
                    }
                };
                let mut msg = json!({ "role": "user", "content": wire_content });
                if let Some(name) = name {
                    msg["name"] = json!(name);
                }
                out.push(msg);
            }
            Message::Assistant { content, tool_calls, .. } => {
                let mut msg = json!({ "role": "assistant", "content": content });
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = json!(tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.function_name,
                                    "arguments": tc.arguments_json(),
                                }
                            })
                        })
                        .collect::<Vec<_>>());
                }
                out.push(msg);
            }
            Message::Tool { tool_call_id, content, .. } => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
        }
    }
    out
}

fn block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Image { image_url, detail } => {
            let mut url = json!({ "url": image_url });
            if let Some(detail) = detail {
                url["detail"] = serde_json::to_value(detail).unwrap_or(Value::Null);
            }
            json!({ "type": "image_url", "image_url": url })
        }
        ContentBlock::Audio { data, format } => json!({
            "type": "input_audio",
            "input_audio": { "data": data, "format": format.as_str() },
        }),
    }
}

/// Full request body for the chat endpoint (without the stream flags).
pub(crate) fn build_chat_body(request: &GenerationRequest) -> Result<Value, ConduitError> {
    let params = &request.params;
    let mut body = json!({
        "model": params.model,
        "messages": build_chat_messages(&request.messages),
    });
    if let Some(t) = params.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = params.top_p {
        body["top_p"] = json!(p);
    }
    if let Some(m) = params.max_tokens {
        body["max_tokens"] = json!(m);
    }
    if !params.tools.is_empty() {
        body["tools"] = json!(params
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect::<Vec<_>>());
    }
    if let Some(schema) = &params.response_model {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": "response",
                "schema": schema,
                "strict": true,
            }
        });
    }
    // Escape hatch: forwarded verbatim, may override anything above.
    for (k, v) in &params.client_params {
        body[k.as_str()] = v.clone();
    }
    Ok(body)
}

// ─── Response parsing ─────────────────────────────────────────────────────────

/// Parse a non-streaming chat response into a [`GenerationResponse`].
pub(crate) fn parse_chat_response(
    raw: &Value,
    request: &GenerationRequest,
) -> Result<GenerationResponse, ConduitError> {
    let choice = raw["choices"]
        .get(0)
        .ok_or_else(|| {
            ConduitError::malformed_response("response has no choices")
                .with_raw_response(raw.clone())
        })?;
    let wire_msg = &choice["message"];
    let content = wire_msg["content"].as_str().unwrap_or("").to_string();

    let tool_calls = wire_msg["tool_calls"]
        .as_array()
        .map(|calls| calls.iter().map(parse_wire_tool_call).collect::<Vec<_>>())
        .unwrap_or_default();

    let audio = wire_msg["audio"]["id"]
        .as_str()
        .map(|id| crate::message::AudioRef { id: id.to_string() });

    let message = Message::Assistant {
        id: uuid::Uuid::new_v4().to_string(),
        content,
        tool_calls,
        audio,
    };

    let usage = &raw["usage"];
    let mut metadata = ResponseMetadata::new(
        usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
    );
    if let Some(reason) = choice["finish_reason"].as_str() {
        metadata.stop_reason = Some(reason.to_string());
    }
    Ok(GenerationResponse::new(message, request.clone(), metadata))
}

fn parse_wire_tool_call(v: &Value) -> ToolCall {
    let id = v["id"].as_str().unwrap_or("").to_string();
    let name = v["function"]["name"].as_str().unwrap_or("").to_string();
    let raw_args = v["function"]["arguments"].as_str().unwrap_or("{}");
    let arguments: Map<String, Value> = match serde_json::from_str(raw_args) {
        Ok(Value::Object(map)) => map,
        _ => {
            warn!(tool = %name, "tool-call arguments were not a JSON object; substituting empty");
            Map::new()
        }
    };
    ToolCall { id, function_name: name, arguments }
}

/// When a response schema was requested, the content must be valid JSON.
pub(crate) fn validate_structured(
    request: &GenerationRequest,
    response: &GenerationResponse,
) -> Result<(), ConduitError> {
    if request.params.response_model.is_none() {
        return Ok(());
    }
    let text = response.text();
    serde_json::from_str::<Value>(&text).map_err(|e| {
        ConduitError::json_parse(format!("structured response is not valid JSON: {e}"))
            .with_raw_response(Value::String(text))
    })?;
    Ok(())
}

/// Map one SSE `data:` payload to a stream event.  `None` drops the frame.
pub(crate) fn parse_stream_data(data: &str) -> Option<Result<StreamEvent, ConduitError>> {
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(ConduitError::malformed_response(e.to_string()))),
    };
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return Some(Ok(StreamEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        }));
    }
    let delta = v["choices"][0]["delta"]["content"].as_str()?;
    if delta.is_empty() {
        return None;
    }
    Some(Ok(StreamEvent::TextDelta(delta.to_string())))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
