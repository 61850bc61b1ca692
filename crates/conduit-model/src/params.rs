// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of artifact the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Text,
    Image,
    Audio,
    Transcription,
}

/// How a client performs its work.
///
/// The canonical pipeline is async; `Sync` exists for the blocking façade and
/// shares the same clients.  `Remote` brokers the call through a companion
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sync,
    #[default]
    Async,
    Remote,
}

/// A tool declaration as advertised to the provider.
///
/// Mirrors the registry's schema shape without depending on the tools crate;
/// the engine copies registry schemas in here before each generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

/// Everything that describes *what to generate*.
///
/// `client_params` is an escape hatch forwarded verbatim into the provider
/// request body (a BTreeMap so serialization order is deterministic — the
/// cache key depends on it).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    /// JSON schema the response must conform to.  Carried as a schema value
    /// (never a type reference) so requests stay serializable and cacheable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_model: Option<Value>,
    /// Tools advertised to the provider for native tool calling.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub client_params: BTreeMap<String, Value>,
    #[serde(default)]
    pub output_type: OutputType,
    /// Request timeout in seconds.  `None` uses the provider default
    /// (30s non-streaming, 120s streaming idle).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<u64>,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Self::default() }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_response_model(mut self, schema: Value) -> Self {
        self.response_model = Some(schema);
        self
    }

    /// Effective request timeout.
    pub fn timeout(&self) -> std::time::Duration {
        let default = if self.stream { 120 } else { 30 };
        std::time::Duration::from_secs(self.timeout_s.unwrap_or(default))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let p = GenerationParams::new("gpt-4o-mini")
            .with_system("be brief")
            .with_temperature(0.3)
            .with_max_tokens(512);
        assert_eq!(p.model, "gpt-4o-mini");
        assert_eq!(p.system.as_deref(), Some("be brief"));
        assert_eq!(p.temperature, Some(0.3));
        assert_eq!(p.max_tokens, Some(512));
        assert!(!p.stream);
    }

    #[test]
    fn default_timeout_depends_on_streaming() {
        let p = GenerationParams::new("m");
        assert_eq!(p.timeout().as_secs(), 30);
        let p = GenerationParams::new("m").streaming();
        assert_eq!(p.timeout().as_secs(), 120);
    }

    #[test]
    fn explicit_timeout_wins() {
        let mut p = GenerationParams::new("m");
        p.timeout_s = Some(5);
        assert_eq!(p.timeout().as_secs(), 5);
    }

    #[test]
    fn none_fields_are_omitted_from_json() {
        let json = serde_json::to_string(&GenerationParams::new("m")).unwrap();
        assert!(!json.contains("temperature"));
        assert!(!json.contains("response_model"));
        assert!(!json.contains("client_params"));
        assert!(!json.contains("tools"));
    }

    #[test]
    fn tool_specs_serialize_with_schema() {
        let mut p = GenerationParams::new("m");
        p.tools.push(ToolSpec {
            name: "ls".into(),
            description: "list files".into(),
            parameters: serde_json::json!({ "type": "object" }),
        });
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"tools\""));
        assert!(json.contains("\"ls\""));
    }

    #[test]
    fn output_type_default_is_text() {
        assert_eq!(OutputType::default(), OutputType::Text);
    }

    #[test]
    fn execution_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ExecutionMode::Remote).unwrap(), "\"remote\"");
    }
}
