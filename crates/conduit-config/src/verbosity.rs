// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// How much the runtime reports while a request is in flight.
///
/// Levels are ordered: everything shown at one level is also shown at the
/// levels above it.  `Progress` and up write to stderr so piped stdout stays
/// clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// No output at all.
    Silent,
    /// One-line spinner per in-flight request, one-line complete/failed marker.
    #[default]
    Progress,
    /// Progress plus a short result summary and formatted error panels.
    Summary,
    /// Summary plus request parameters and token counts.
    Detailed,
    /// Detailed plus full message contents.
    Complete,
    /// Everything, including serialized errors with stack context and raw
    /// provider responses.
    Debug,
}

impl Verbosity {
    /// Parse a user-supplied level name.  Accepts the serde names
    /// case-insensitively.  Returns `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Some(Self::Silent),
            "progress" => Some(Self::Progress),
            "summary" => Some(Self::Summary),
            "detailed" => Some(Self::Detailed),
            "complete" => Some(Self::Complete),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    /// True when a spinner / progress line should be shown.
    pub fn shows_progress(self) -> bool {
        self >= Self::Progress
    }

    /// True when error panels and result summaries should be printed.
    pub fn shows_summary(self) -> bool {
        self >= Self::Summary
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
