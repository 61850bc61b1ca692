// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic Messages API client.
//!
//! Differences from the OpenAI wire family: the system prompt is a top-level
//! field (not a message), images travel as base64 source blocks, tool calls
//! are `tool_use` content blocks inside assistant turns, and audio is not
//! supported at all.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::warn;

use crate::clients::{sse, ProviderClient, TokenPayload};
use crate::error::ConduitError;
use crate::message::{parse_data_url_parts, ContentBlock, Message, ToolCall, UserContent};
use crate::params::OutputType;
use crate::request::GenerationRequest;
use crate::response::{
    EventStream, GenerationOutcome, GenerationResponse, GenerationResult, ResponseMetadata,
    StreamEvent, StreamHandle,
};
use crate::tokens;

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Anthropic requires max_tokens; used when the caller does not set one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            http: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    async fn send(&self, request: &GenerationRequest, body: &Value) -> Result<reqwest::Response, ConduitError> {
        let resp = self
            .http
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(request.params.timeout())
            .json(body)
            .send()
            .await
            .map_err(|e| ConduitError::from_transport(&e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ConduitError::provider_status(status.as_u16(), text)
                .with_request_params(body.clone()));
        }
        Ok(resp)
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<GenerationResponse, ConduitError> {
        let body = build_body(request)?;
        let started = Instant::now();
        let raw: Value = self
            .send(request, &body)
            .await?
            .json()
            .await
            .map_err(|e| ConduitError::malformed_response(e.to_string()))?;
        let mut response = parse_response(&raw, request)?;
        response.metadata.duration_ms = started.elapsed().as_millis() as u64;
        crate::clients::openai_compat::validate_structured(request, &response)?;
        Ok(response)
    }

    async fn complete_stream(&self, request: &GenerationRequest) -> Result<StreamHandle, ConduitError> {
        let mut body = build_body(request)?;
        body["stream"] = json!(true);
        let resp = self.send(request, &body).await?;
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
impl ProviderClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }

    async fn query(&self, request: &GenerationRequest) -> GenerationResult {
        if request.params.output_type != OutputType::Text {
            return Err(ConduitError::unsupported_modality(
                "anthropic supports text output only",
            ));
        }
        if request.messages.iter().any(|m| m.has_audio()) {
            return Err(ConduitError::unsupported_modality(
                "anthropic does not accept audio input",
            ));
        }
        if request.params.stream {
            Ok(GenerationOutcome::Stream(self.complete_stream(request).await?))
        } else {
            Ok(GenerationOutcome::Response(self.complete(request).await?))
        }
    }

    async fn tokenize(&self, model: &str, payload: TokenPayload<'_>) -> Result<u32, ConduitError> {
        match payload {
            // Raw string weight: Anthropic publishes no local tokenizer, so
            // use the cl100k approximation the corpus uses for such gaps.
            TokenPayload::Text(text) => tokens::count_text("claude", text),
            TokenPayload::Messages(messages) => {
                let (system, wire) = build_messages(messages)?;
                let mut body = json!({ "model": model, "messages": wire });
                if !system.is_empty() {
                    body["system"] = json!(system);
                }
                let resp = self
                    .http
                    .post(format!("{}/v1/messages/count_tokens", self.base_url))
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
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
                Ok(raw["input_tokens"].as_u64().unwrap_or(0) as u32)
            }
        }
    }
}

// ─── Wire building ────────────────────────────────────────────────────────────

/// Full request body for the Messages endpoint.
pub(crate) fn build_body(request: &GenerationRequest) -> Result<Value, ConduitError> {
    let params = &request.params;
    let (mut system_text, messages) = build_messages(&request.messages)?;

    // `params.system` wins over an in-history system message; prepare_request
    // normally keeps them in sync.
    if let Some(system) = &params.system {
        if system_text.is_empty() {
            system_text = system.clone();
        }
    }
    // Structured output: Anthropic has no response_format, so the schema is
    // carried as a system instruction and the reply validated as JSON.
    if let Some(schema) = &params.response_model {
        let instruction = format!(
            "Respond ONLY with a JSON object matching this JSON schema, no prose:\n{schema}"
        );
        if system_text.is_empty() {
            system_text = instruction;
        } else {
            system_text = format!("{system_text}\n\n{instruction}");
        }
    }

    let mut body = json!({
        "model": params.model,
        "messages": messages,
        "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });
    if let Some(t) = params.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = params.top_p {
        body["top_p"] = json!(p);
    }
    if !system_text.is_empty() {
        body["system"] = json!(system_text);
    }
    if !params.tools.is_empty() {
        body["tools"] = json!(params
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect::<Vec<_>>());
    }
    for (k, v) in &params.client_params {
        body[k.as_str()] = v.clone();
    }
    Ok(body)
}

/// Convert the message history into the Anthropic wire format.
///
/// Returns `(system_text, conversation_messages)`; the system message is
/// separated out because Anthropic expects it as a top-level field.
pub(crate) fn build_messages(messages: &[Message]) -> Result<(String, Vec<Value>), ConduitError> {
    let mut system_text = String::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m {
            Message::System { content, .. } => {
                system_text = content.clone();
            }
            Message::User { content, .. } => match content {
                UserContent::Text(t) => {
                    out.push(json!({ "role": "user", "content": t }));
                }
                UserContent::Blocks(blocks) => {
                    let mut wire_blocks = Vec::with_capacity(blocks.len());
                    for b in blocks {
                        wire_blocks.push(block_to_wire(b)?);
                    }
                    out.push(json!({ "role": "user", "content": wire_blocks }));
                }
            },
            Message::Assistant { content, tool_calls, .. } => {
                if tool_calls.is_empty() {
                    out.push(json!({ "role": "assistant", "content": content }));
                } else {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": content }));
                    }
                    for tc in tool_calls {
                        // Anthropic requires tool_use.id to match
                        // `^[a-zA-Z0-9_-]+$`; an empty id yields a 400, so
                        // substitute a stable fallback.
                        let safe_id = if tc.id.is_empty() {
                            warn!(tool = %tc.function_name, "empty tool_call_id; substituting fallback");
                            "tc_fallback".to_string()
                        } else {
                            tc.id.clone()
                        };
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": safe_id,
                            "name": tc.function_name,
                            "input": Value::Object(tc.arguments.clone()),
                        }));
                    }
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
            }
            Message::Tool { tool_call_id, content, .. } => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content,
                    }]
                }));
            }
        }
    }
    Ok((system_text, out))
}

fn block_to_wire(block: &ContentBlock) -> Result<Value, ConduitError> {
    match block {
        ContentBlock::Text { text } => Ok(json!({ "type": "text", "text": text })),
        ContentBlock::Image { image_url, .. } => {
            if let Ok((mime, data)) = parse_data_url_parts(image_url) {
                Ok(json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": mime, "data": data }
                }))
            } else {
                Ok(json!({
                    "type": "image",
                    "source": { "type": "url", "url": image_url }
                }))
            }
        }
        ContentBlock::Audio { .. } => Err(ConduitError::unsupported_modality(
            "anthropic does not accept audio input",
        )),
    }
}

// ─── Response parsing ─────────────────────────────────────────────────────────

/// Parse a non-streaming Messages response.
pub(crate) fn parse_response(
    raw: &Value,
    request: &GenerationRequest,
) -> Result<GenerationResponse, ConduitError> {
    let content = raw["content"].as_array().ok_or_else(|| {
        ConduitError::malformed_response("response has no content array")
            .with_raw_response(raw.clone())
    })?;

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    for block in content {
        match block["type"].as_str().unwrap_or("") {
            "text" => text.push_str(block["text"].as_str().unwrap_or("")),
            "tool_use" => {
                let arguments: Map<String, Value> = block["input"]
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    function_name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments,
                });
            }
            _ => {}
        }
    }

    let message = Message::Assistant {
        id: uuid::Uuid::new_v4().to_string(),
        content: text,
        tool_calls,
        audio: None,
    };
    let usage = &raw["usage"];
    let mut metadata = ResponseMetadata::new(
        usage["input_tokens"].as_u64().unwrap_or(0) as u32,
        usage["output_tokens"].as_u64().unwrap_or(0) as u32,
    );
    if let Some(reason) = raw["stop_reason"].as_str() {
        metadata.stop_reason = Some(reason.to_string());
    }
    Ok(GenerationResponse::new(message, request.clone(), metadata))
}

/// Map one SSE `data:` payload to a stream event.  `None` drops the frame.
pub(crate) fn parse_stream_data(data: &str) -> Option<Result<StreamEvent, ConduitError>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(ConduitError::malformed_response(e.to_string()))),
    };
    match v["type"].as_str().unwrap_or("") {
        "content_block_delta" => {
            let text = v["delta"]["text"].as_str().unwrap_or("");
            if text.is_empty() {
                None
            } else {
                Some(Ok(StreamEvent::TextDelta(text.to_string())))
            }
        }
        // Anthropic reports input tokens at message_start and output tokens
        // in the trailing message_delta.
        "message_start" => v["message"]["usage"]["input_tokens"].as_u64().map(|n| {
            Ok(StreamEvent::Usage { input_tokens: n as u32, output_tokens: 0 })
        }),
        "message_delta" => v["usage"]["output_tokens"].as_u64().map(|n| {
            Ok(StreamEvent::Usage { input_tokens: 0, output_tokens: n as u32 })
        }),
        "message_stop" => Some(Ok(StreamEvent::Done)),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AudioFormat, ImageDetail};
    use crate::params::GenerationParams;

    fn request(messages: Vec<Message>) -> GenerationRequest {
        GenerationRequest::new(messages, GenerationParams::new("claude-sonnet-4-20250514"))
    }

    // ── Message building ──────────────────────────────────────────────────────

    #[test]
    fn system_extracted_to_top_level() {
        let (sys, msgs) =
            build_messages(&[Message::system("be helpful"), Message::user("hi")]).unwrap();
        assert_eq!(sys, "be helpful");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn base64_image_uses_source_block() {
        let msg = Message::user_with_blocks(vec![
            ContentBlock::text("look at this"),
            ContentBlock::image("data:image/png;base64,iVBORw0KGgo="),
        ]);
        let (_, msgs) = build_messages(&[msg]).unwrap();
        let img = &msgs[0]["content"][1];
        assert_eq!(img["type"], "image");
        assert_eq!(img["source"]["type"], "base64");
        assert_eq!(img["source"]["media_type"], "image/png");
        assert_eq!(img["source"]["data"], "iVBORw0KGgo=");
    }

    #[test]
    fn https_image_uses_url_source() {
        let msg = Message::user_with_blocks(vec![ContentBlock::image_with_detail(
            "https://example.com/img.jpg",
            ImageDetail::High, // detail is an OpenAI concept; must be ignored
        )]);
        let (_, msgs) = build_messages(&[msg]).unwrap();
        let img = &msgs[0]["content"][0];
        assert_eq!(img["source"]["type"], "url");
        assert_eq!(img["source"]["url"], "https://example.com/img.jpg");
        assert!(img.get("detail").is_none());
    }

    #[test]
    fn tool_call_becomes_tool_use_block() {
        let mut args = Map::new();
        args.insert("path".into(), json!("/tmp"));
        let msg = Message::assistant_with_tool_calls("checking", vec![ToolCall::new("tu_1", "ls", args)]);
        let (_, msgs) = build_messages(&[msg]).unwrap();
        let blocks = msgs[0]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["id"], "tu_1");
        assert_eq!(blocks[1]["input"]["path"], "/tmp");
    }

    #[test]
    fn empty_tool_call_id_gets_fallback() {
        let msg = Message::assistant_with_tool_calls("", vec![ToolCall::new("", "ls", Map::new())]);
        let (_, msgs) = build_messages(&[msg]).unwrap();
        assert_eq!(msgs[0]["content"][0]["id"], "tc_fallback");
    }

    #[test]
    fn tool_result_rides_in_user_turn() {
        let (_, msgs) = build_messages(&[Message::tool_result("tu_1", "a.txt\nb.txt")]).unwrap();
        let block = &msgs[0]["content"][0];
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "tu_1");
    }

    #[test]
    fn audio_block_is_rejected() {
        let msg = Message::user_with_blocks(vec![
            ContentBlock::text("listen"),
            ContentBlock::audio("QUJD", AudioFormat::Mp3),
        ]);
        let err = build_messages(&[msg]).unwrap_err();
        assert_eq!(err.info.code, "unsupported_modality");
    }

    // ── Body building ─────────────────────────────────────────────────────────

    #[test]
    fn body_always_has_max_tokens() {
        let body = build_body(&request(vec![Message::user("hi")])).unwrap();
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn body_uses_params_system_when_history_has_none() {
        let mut req = request(vec![Message::user("hi")]);
        req.params.system = Some("be brief".into());
        let body = build_body(&req).unwrap();
        assert_eq!(body["system"], "be brief");
    }

    #[test]
    fn tools_use_input_schema_field() {
        let mut req = request(vec![Message::user("hi")]);
        req.params.tools.push(crate::params::ToolSpec {
            name: "ls".into(),
            description: "list files".into(),
            parameters: json!({ "type": "object" }),
        });
        let body = build_body(&req).unwrap();
        let tool = &body["tools"][0];
        assert_eq!(tool["name"], "ls");
        assert_eq!(tool["input_schema"]["type"], "object");
        assert!(tool.get("function").is_none());
    }

    #[test]
    fn response_schema_becomes_system_instruction() {
        let mut req = request(vec![Message::user("hi")]);
        req.params.response_model = Some(json!({"type": "object"}));
        let body = build_body(&req).unwrap();
        let sys = body["system"].as_str().unwrap();
        assert!(sys.contains("JSON schema"), "missing instruction: {sys}");
    }

    // ── Response parsing ──────────────────────────────────────────────────────

    #[test]
    fn parse_text_response() {
        let raw = json!({
            "content": [ { "type": "text", "text": "A dolphin." } ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 12, "output_tokens": 4 }
        });
        let resp = parse_response(&raw, &request(vec![Message::user("q")])).unwrap();
        assert_eq!(resp.text(), "A dolphin.");
        assert_eq!(resp.metadata.input_tokens, 12);
        assert_eq!(resp.metadata.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn parse_tool_use_response() {
        let raw = json!({
            "content": [
                { "type": "text", "text": "Checking." },
                { "type": "tool_use", "id": "tu_1", "name": "ls", "input": { "path": "/tmp" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 20, "output_tokens": 9 }
        });
        let resp = parse_response(&raw, &request(vec![Message::user("q")])).unwrap();
        let calls = resp.message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "ls");
        assert_eq!(calls[0].arguments["path"], "/tmp");
        assert_eq!(resp.text(), "Checking.");
    }

    #[test]
    fn parse_missing_content_is_malformed() {
        let raw = json!({ "usage": {} });
        let err = parse_response(&raw, &request(vec![Message::user("q")])).unwrap_err();
        assert_eq!(err.info.code, "malformed_provider_response");
    }

    // ── Stream frames ─────────────────────────────────────────────────────────

    #[test]
    fn stream_text_delta() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"wor"}}"#;
        assert_eq!(
            parse_stream_data(data).unwrap().unwrap(),
            StreamEvent::TextDelta("wor".into())
        );
    }

    #[test]
    fn stream_message_start_carries_input_usage() {
        let data = r#"{"type":"message_start","message":{"usage":{"input_tokens":42}}}"#;
        assert_eq!(
            parse_stream_data(data).unwrap().unwrap(),
            StreamEvent::Usage { input_tokens: 42, output_tokens: 0 }
        );
    }

    #[test]
    fn stream_message_delta_carries_output_usage() {
        let data = r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":88}}"#;
        assert_eq!(
            parse_stream_data(data).unwrap().unwrap(),
            StreamEvent::Usage { input_tokens: 0, output_tokens: 88 }
        );
    }

    #[test]
    fn stream_message_stop_is_done() {
        let data = r#"{"type":"message_stop"}"#;
        assert_eq!(parse_stream_data(data).unwrap().unwrap(), StreamEvent::Done);
    }

    #[test]
    fn stream_ping_is_dropped() {
        assert!(parse_stream_data(r#"{"type":"ping"}"#).is_none());
    }
}
