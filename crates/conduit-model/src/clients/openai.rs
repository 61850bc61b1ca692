// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI client: the compat chat path plus the modality endpoints the other
//! compat providers do not have (image generation, audio output,
//! transcription).

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Instant;

use crate::clients::openai_compat::{CompatConfig, OpenAiCompatClient};
use crate::clients::{ProviderClient, TokenPayload};
use crate::error::ConduitError;
use crate::message::{AudioRef, ContentBlock, Message, UserContent};
use crate::params::OutputType;
use crate::request::GenerationRequest;
use crate::response::{GenerationOutcome, GenerationResponse, GenerationResult, ResponseMetadata};

#[derive(Debug)]
pub struct OpenAiClient {
    inner: OpenAiCompatClient,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let inner = OpenAiCompatClient::new(CompatConfig {
            provider: "openai".to_string(),
            base_url: base_url.clone(),
            api_key: Some(api_key.clone()),
        });
        Self { inner, http: reqwest::Client::new(), base_url, api_key }
    }

    /// Image generation via the images endpoint.  The prompt is the text of
    /// the trailing user message; the result is an assistant message whose
    /// content is a data URL.
    async fn generate_image(&self, request: &GenerationRequest) -> Result<GenerationResponse, ConduitError> {
        let prompt = trailing_user_text(request)?;
        let started = Instant::now();
        let mut body = json!({
            "model": request.params.model,
            "prompt": prompt,
        });
        for (k, v) in &request.params.client_params {
            body[k.as_str()] = v.clone();
        }

        let resp = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
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
        let raw: Value = resp
            .json()
            .await
            .map_err(|e| ConduitError::malformed_response(e.to_string()))?;

        let b64 = raw["data"][0]["b64_json"].as_str().ok_or_else(|| {
            ConduitError::malformed_response("image response has no b64_json payload")
                .with_raw_response(raw.clone())
        })?;
        let message = Message::assistant(format!("data:image/png;base64,{b64}"));

        let usage = &raw["usage"];
        let mut metadata = ResponseMetadata::new(
            usage["input_tokens"].as_u64().unwrap_or(0) as u32,
            usage["output_tokens"].as_u64().unwrap_or(0) as u32,
        );
        metadata.duration_ms = started.elapsed().as_millis() as u64;
        Ok(GenerationResponse::new(message, request.clone(), metadata))
    }

    /// Voice-out chat: the chat endpoint with the audio modality enabled.
    async fn generate_audio(&self, request: &GenerationRequest) -> Result<GenerationResponse, ConduitError> {
        let mut audio_request = request.clone();
        audio_request
            .params
            .client_params
            .entry("modalities".to_string())
            .or_insert_with(|| json!(["text", "audio"]));
        audio_request
            .params
            .client_params
            .entry("audio".to_string())
            .or_insert_with(|| json!({ "voice": "alloy", "format": "mp3" }));

        let started = Instant::now();
        let raw = self.inner.chat_raw(&audio_request).await?;
        let wire_msg = &raw["choices"][0]["message"];
        let transcript = wire_msg["audio"]["transcript"]
            .as_str()
            .or_else(|| wire_msg["content"].as_str())
            .unwrap_or("")
            .to_string();
        let audio = wire_msg["audio"]["id"]
            .as_str()
            .map(|id| AudioRef { id: id.to_string() });
        let message = Message::Assistant {
            id: uuid::Uuid::new_v4().to_string(),
            content: transcript,
            tool_calls: Vec::new(),
            audio,
        };
        let usage = &raw["usage"];
        let mut metadata = ResponseMetadata::new(
            usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        );
        metadata.duration_ms = started.elapsed().as_millis() as u64;
        Ok(GenerationResponse::new(message, request.clone(), metadata))
    }

    /// Speech-to-text: the trailing user message must carry an audio block.
    async fn transcribe(&self, request: &GenerationRequest) -> Result<GenerationResponse, ConduitError> {
        let (data, format) = trailing_user_audio(request)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| ConduitError::validation(format!("audio payload is not base64: {e}")))?;

        let started = Instant::now();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(format!("audio.{}", format.as_str()))
            .mime_str(&format!("audio/{}", format.as_str()))
            .map_err(|e| ConduitError::validation(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", request.params.model.clone())
            .part("file", part);

        let resp = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(request.params.timeout())
            .multipart(form)
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
        let text = raw["text"].as_str().unwrap_or("").to_string();
        let mut metadata = ResponseMetadata::new(0, 0);
        metadata.duration_ms = started.elapsed().as_millis() as u64;
        Ok(GenerationResponse::new(Message::assistant(text), request.clone(), metadata))
    }
}

fn trailing_user_text(request: &GenerationRequest) -> Result<String, ConduitError> {
    match request.messages.last() {
        Some(Message::User { content, .. }) => Ok(content.text()),
        _ => Err(ConduitError::validation(
            "image generation requires a trailing user message",
        )),
    }
}

fn trailing_user_audio(
    request: &GenerationRequest,
) -> Result<(&str, crate::message::AudioFormat), ConduitError> {
    if let Some(Message::User { content: UserContent::Blocks(blocks), .. }) =
        request.messages.last()
    {
        for block in blocks {
            if let ContentBlock::Audio { data, format } = block {
                return Ok((data, *format));
            }
        }
    }
    Err(ConduitError::validation(
        "transcription requires a trailing user message with an audio block",
    ))
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn query(&self, request: &GenerationRequest) -> GenerationResult {
        match request.params.output_type {
            OutputType::Text => self.inner.query(request).await,
            OutputType::Image => {
                Ok(GenerationOutcome::Response(self.generate_image(request).await?))
            }
            OutputType::Audio => {
                Ok(GenerationOutcome::Response(self.generate_audio(request).await?))
            }
            OutputType::Transcription => {
                Ok(GenerationOutcome::Response(self.transcribe(request).await?))
            }
        }
    }

    async fn tokenize(&self, model: &str, payload: TokenPayload<'_>) -> Result<u32, ConduitError> {
        self.inner.tokenize(model, payload).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
