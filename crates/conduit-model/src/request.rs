// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::message::Message;
use crate::params::GenerationParams;

/// The unit of work handed to a provider client: the message history plus the
/// generation parameters.
///
/// Runtime options (cache handles, repositories, verbosity) deliberately do
/// NOT live here — the request must hash identically regardless of how the
/// run is displayed or persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>, params: GenerationParams) -> Self {
        Self { messages, params }
    }

    /// Deterministic SHA-256 over the canonical JSON of this request.
    ///
    /// Canonical form: object keys sorted (serde_json's default map is
    /// ordered), nulls stripped recursively, message ids excluded — two
    /// requests with the same semantic content produce the same key even when
    /// their messages were constructed at different times.
    pub fn cache_key(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        let canonical = canonicalize(value);
        let json = serde_json::to_string(&canonical).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Strip nulls and volatile identity fields, recursively.  Key order is
/// already deterministic because `serde_json::Map` is a sorted map.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, v)| !v.is_null() && k != "id")
                .map(|(k, v)| (k, canonicalize(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
