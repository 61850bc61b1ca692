// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Web tools: URL fetching and Brave web search.
//!
//! Both degrade softly: a missing API key or an unreachable host becomes an
//! error tool result the model can read, never a pipeline failure.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolCall, ToolOutput};

const USER_AGENT: &str = "conduit/0.9 (+https://github.com/conduit)";
const FETCH_MAX_BYTES: usize = 64 * 1024;
const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

/// Fetch a web page and return its body text, truncated.
pub struct FetchUrlTool {
    http: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch the content of a web page"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL of the web page to fetch" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(url) = call.str_arg("url") else {
            return ToolOutput::err(&call.id, "missing required argument: url");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::err(&call.id, "URL must start with http:// or https://");
        }
        let resp = match self
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("fetch failed: {e}")),
        };
        let status = resp.status();
        if !status.is_success() {
            return ToolOutput::err(&call.id, format!("{url} returned {status}"));
        }
        match resp.text().await {
            Ok(mut body) => {
                if body.len() > FETCH_MAX_BYTES {
                    let mut cut = FETCH_MAX_BYTES;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                    body.push_str("\n[truncated]");
                }
                ToolOutput::ok(&call.id, body)
            }
            Err(e) => ToolOutput::err(&call.id, format!("could not read body: {e}")),
        }
    }
}

/// Brave web search.  Reads `BRAVE_API_KEY` at call time.
pub struct WebSearchTool {
    http: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Render Brave's result list to one line per hit.
pub(crate) fn format_brave_results(raw: &Value, limit: usize) -> String {
    let Some(results) = raw["web"]["results"].as_array() else {
        return String::new();
    };
    results
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {} - {}\n   {}",
                i + 1,
                r["title"].as_str().unwrap_or("untitled"),
                r["url"].as_str().unwrap_or(""),
                r["description"].as_str().unwrap_or("").trim(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return titles, URLs, and snippets"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query" },
                "count": { "type": "integer", "description": "Number of results (default 10)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(query) = call.str_arg("query") else {
            return ToolOutput::err(&call.id, "missing required argument: query");
        };
        let Ok(api_key) = std::env::var("BRAVE_API_KEY") else {
            return ToolOutput::err(&call.id, "BRAVE_API_KEY is not set");
        };
        let count = call
            .args
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(10)
            .min(20) as usize;

        let resp = match self
            .http
            .get(BRAVE_ENDPOINT)
            .query(&[("q", query), ("count", &count.to_string())])
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("search failed: {e}")),
        };
        let status = resp.status();
        if !status.is_success() {
            return ToolOutput::err(&call.id, format!("search returned {status}"));
        }
        let raw: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => return ToolOutput::err(&call.id, format!("bad search response: {e}")),
        };
        let rendered = format_brave_results(&raw, count);
        if rendered.is_empty() {
            ToolOutput::ok(&call.id, "no results")
        } else {
            ToolOutput::ok(&call.id, rendered)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
