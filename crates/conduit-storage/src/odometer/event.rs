// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// The unit of usage telemetry: one provider call's token counts.
///
/// Host and timestamp auto-fill at construction; the provider is supplied by
/// the middleware, which resolves it from the model store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Unix epoch seconds.
    pub timestamp_s: i64,
    /// Reporting machine, for multi-host aggregation.
    pub host: String,
}

impl TokenEvent {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            input_tokens,
            output_tokens,
            timestamp_s: Utc::now().timestamp(),
            host: detect_hostname(),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens as u64 + self.output_tokens as u64
    }

    /// The event's local calendar date, `YYYY-MM-DD`.
    pub fn date_string(&self) -> String {
        chrono::DateTime::from_timestamp(self.timestamp_s, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn detect_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
