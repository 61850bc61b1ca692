// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The runtime's error value.
//!
//! Errors are values here, not exceptions-for-control-flow: every fallible
//! pipeline operation returns `Result<T, ConduitError>` and the error travels
//! through the middleware and engine unchanged.  `info` is always present and
//! cheap to clone; `detail` carries debugging payloads (raw provider bodies,
//! request params) and is only populated where they exist.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse error class, drives retry guidance and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Caller mistake: bad input, unsupported modality, missing credentials.
    /// Do not retry.
    Client,
    /// Provider-side failure (4xx/5xx, rate limits).  Retry with backoff.
    Server,
    /// Transport failure.  Retry may succeed.
    Network,
    /// Malformed payloads in either direction.  Do not retry.
    Parsing,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Network => "network",
            Self::Parsing => "parsing",
        }
    }
}

/// Core error information; always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine-readable code, e.g. `"validation_error"`.
    pub code: String,
    pub message: String,
    pub category: ErrorCategory,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

/// Debugging payload, populated where available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Original provider response body that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

/// An unsuccessful generation result.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{info}")]
pub struct ConduitError {
    pub info: ErrorInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorDetail>,
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} - {}: {}",
            self.timestamp,
            self.category.as_str(),
            self.code,
            self.message,
        )
    }
}

impl ConduitError {
    /// Build an error with no debugging detail.
    pub fn simple(
        code: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            info: ErrorInfo {
                code: code.into(),
                message: message.into(),
                category,
                timestamp: Utc::now().timestamp_millis(),
            },
            detail: None,
        }
    }

    /// Attach a raw provider response body.
    pub fn with_raw_response(mut self, raw: Value) -> Self {
        self.detail.get_or_insert_with(ErrorDetail::default).raw_response = Some(raw);
        self
    }

    /// Attach the request parameters that led to the error.
    pub fn with_request_params(mut self, params: Value) -> Self {
        self.detail.get_or_insert_with(ErrorDetail::default).request_params = Some(params);
        self
    }

    // ── Category shorthands ──────────────────────────────────────────────────

    pub fn validation(message: impl Into<String>) -> Self {
        Self::simple("validation_error", message, ErrorCategory::Client)
    }

    pub fn unsupported_modality(message: impl Into<String>) -> Self {
        Self::simple("unsupported_modality", message, ErrorCategory::Client)
    }

    pub fn unknown_model(model: &str) -> Self {
        Self::simple(
            "unknown_model",
            format!("model '{model}' is not in the catalog and matches no provider"),
            ErrorCategory::Client,
        )
    }

    pub fn missing_credentials(env_var: &str) -> Self {
        Self::simple(
            "missing_credentials",
            format!("required environment variable {env_var} is not set"),
            ErrorCategory::Client,
        )
    }

    pub fn incomplete_conversation(message: impl Into<String>) -> Self {
        Self::simple("incomplete_conversation", message, ErrorCategory::Client)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::simple("connection_error", message, ErrorCategory::Network)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::simple("timeout", message, ErrorCategory::Network)
    }

    pub fn stream_interrupted(message: impl Into<String>) -> Self {
        Self::simple("stream_interrupted", message, ErrorCategory::Network)
    }

    /// Map an HTTP status from a provider into the server-error taxonomy.
    pub fn provider_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let (code, message) = if status == 429 {
            ("rate_limited", format!("provider rate limit hit: {body}"))
        } else if (400..500).contains(&status) {
            ("provider_4xx", format!("provider returned {status}: {body}"))
        } else {
            ("provider_5xx", format!("provider returned {status}: {body}"))
        };
        let raw = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
        Self::simple(code, message, ErrorCategory::Server).with_raw_response(raw)
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::simple("malformed_provider_response", message, ErrorCategory::Parsing)
    }

    pub fn json_parse(message: impl Into<String>) -> Self {
        Self::simple("json_parse_error", message, ErrorCategory::Parsing)
    }

    pub fn xml_parse(message: impl Into<String>) -> Self {
        Self::simple("xml_parse_error", message, ErrorCategory::Parsing)
    }

    /// Categorize a transport error from reqwest.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::connection(err.to_string())
        }
    }

    /// True when a retry may plausibly succeed (network + server categories).
    pub fn is_retryable(&self) -> bool {
        matches!(self.info.category, ErrorCategory::Network | ErrorCategory::Server)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_fills_timestamp() {
        let e = ConduitError::validation("bad input");
        assert_eq!(e.info.code, "validation_error");
        assert_eq!(e.info.category, ErrorCategory::Client);
        assert!(e.info.timestamp > 0);
        assert!(e.detail.is_none());
    }

    #[test]
    fn display_includes_code_and_category() {
        let e = ConduitError::timeout("30s elapsed");
        let s = e.to_string();
        assert!(s.contains("network"), "missing category: {s}");
        assert!(s.contains("timeout"), "missing code: {s}");
        assert!(s.contains("30s elapsed"), "missing message: {s}");
    }

    #[test]
    fn provider_status_429_is_rate_limited() {
        let e = ConduitError::provider_status(429, "slow down");
        assert_eq!(e.info.code, "rate_limited");
        assert_eq!(e.info.category, ErrorCategory::Server);
    }

    #[test]
    fn provider_status_maps_4xx_and_5xx() {
        assert_eq!(ConduitError::provider_status(400, "").info.code, "provider_4xx");
        assert_eq!(ConduitError::provider_status(503, "").info.code, "provider_5xx");
    }

    #[test]
    fn provider_status_preserves_raw_body() {
        let e = ConduitError::provider_status(500, r#"{"error":"boom"}"#);
        let raw = e.detail.unwrap().raw_response.unwrap();
        assert_eq!(raw["error"], "boom");
    }

    #[test]
    fn retryable_categories() {
        assert!(ConduitError::connection("x").is_retryable());
        assert!(ConduitError::provider_status(500, "x").is_retryable());
        assert!(!ConduitError::validation("x").is_retryable());
        assert!(!ConduitError::json_parse("x").is_retryable());
    }

    #[test]
    fn with_request_params_creates_detail() {
        let e = ConduitError::validation("x")
            .with_request_params(serde_json::json!({"model": "gpt-4o-mini"}));
        assert_eq!(
            e.detail.unwrap().request_params.unwrap()["model"],
            "gpt-4o-mini"
        );
    }

    #[test]
    fn serde_round_trip() {
        let e = ConduitError::unsupported_modality("audio on anthropic");
        let json = serde_json::to_string(&e).unwrap();
        let back: ConduitError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.info, e.info);
    }
}
