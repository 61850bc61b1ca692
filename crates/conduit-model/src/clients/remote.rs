// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Server-brokered execution: the request is forwarded to a companion server
//! that holds the provider credentials.  Tokenization and availability checks
//! go through the server too.  Streaming is not supported in this mode.

use async_trait::async_trait;
use serde_json::json;

use crate::clients::{ProviderClient, TokenPayload};
use crate::error::ConduitError;
use crate::request::GenerationRequest;
use crate::response::{GenerationOutcome, GenerationResponse, GenerationResult};

#[derive(Debug)]
pub struct RemoteClient {
    server_url: String,
    http: reqwest::Client,
}

impl RemoteClient {
    pub fn new(server_url: String) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: std::time::Duration,
    ) -> Result<serde_json::Value, ConduitError> {
        let resp = self
            .http
            .post(format!("{}{path}", self.server_url))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ConduitError::from_transport(&e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ConduitError::provider_status(status.as_u16(), text));
        }
        resp.json()
            .await
            .map_err(|e| ConduitError::malformed_response(e.to_string()))
    }
}

#[async_trait]
impl ProviderClient for RemoteClient {
    fn provider(&self) -> &str {
        "remote"
    }

    async fn query(&self, request: &GenerationRequest) -> GenerationResult {
        if request.params.stream {
            return Err(ConduitError::validation(
                "streaming is not supported in remote execution mode",
            ));
        }
        let body = serde_json::to_value(request)
            .map_err(|e| ConduitError::validation(e.to_string()))?;
        let raw = self
            .post_json("/v1/generate", &body, request.params.timeout())
            .await?;
        let response: GenerationResponse = serde_json::from_value(raw)
            .map_err(|e| ConduitError::malformed_response(format!("remote response: {e}")))?;
        Ok(GenerationOutcome::Response(response))
    }

    async fn tokenize(&self, model: &str, payload: TokenPayload<'_>) -> Result<u32, ConduitError> {
        let body = match payload {
            TokenPayload::Text(text) => json!({ "model": model, "text": text }),
            TokenPayload::Messages(messages) => json!({ "model": model, "messages": messages }),
        };
        let raw = self
            .post_json("/v1/tokenize", &body, std::time::Duration::from_secs(30))
            .await?;
        Ok(raw["tokens"].as_u64().unwrap_or(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::params::GenerationParams;

    #[tokio::test]
    async fn streaming_is_rejected_before_any_network_io() {
        let client = RemoteClient::new("http://127.0.0.1:1".into());
        let request = GenerationRequest::new(
            vec![Message::user("hi")],
            GenerationParams::new("gpt-4o-mini").streaming(),
        );
        let err = client.query(&request).await.unwrap_err();
        assert_eq!(err.info.code, "validation_error");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = RemoteClient::new("http://server/".into());
        assert_eq!(client.server_url, "http://server");
    }
}
