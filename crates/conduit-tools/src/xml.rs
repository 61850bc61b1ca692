// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model-facing tool-call wire format.
//!
//! Tool calls embedded in streamed assistant text use this XML shape:
//!
//! ```text
//! <function_calls>
//!   <invoke name="TOOL_NAME">
//!     <parameters>
//!       <parameter name="PARAM_NAME">VALUE</parameter>
//!     </parameters>
//!   </invoke>
//! </function_calls>
//! ```
//!
//! Parameter values are parsed as JSON when they are valid JSON and kept as
//! raw strings otherwise; serialization writes strings raw and JSON-encodes
//! everything else.  The round trip `parse(serialize(call)) == call` holds
//! for every call whose string arguments are not themselves valid JSON
//! literals.

use regex::Regex;
use serde_json::{Map, Value};

use crate::tool::ToolCall;

/// The element wrapping every tool-call block.
pub const TOOL_CALL_TAG: &str = "function_calls";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ToolXmlError {
    #[error("no <{TOOL_CALL_TAG}> block found")]
    MissingBlock,
    #[error("malformed tool-call XML: {0}")]
    Malformed(String),
}

/// Render one tool call as a `<function_calls>` block.
pub fn serialize_tool_call(call: &ToolCall) -> String {
    serialize_tool_calls(std::slice::from_ref(call))
}

/// Render several invocations inside a single block.
pub fn serialize_tool_calls(calls: &[ToolCall]) -> String {
    let mut out = String::from("<function_calls>\n");
    for call in calls {
        out.push_str(&format!("  <invoke name=\"{}\">\n", escape(&call.name)));
        out.push_str("    <parameters>\n");
        if let Value::Object(map) = &call.args {
            for (key, value) in map {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out.push_str(&format!(
                    "      <parameter name=\"{}\">{}</parameter>\n",
                    escape(key),
                    escape(&rendered),
                ));
            }
        }
        out.push_str("    </parameters>\n");
        out.push_str("  </invoke>\n");
    }
    out.push_str("</function_calls>");
    out
}

/// Parse every `<invoke>` out of the first `<function_calls>` block.
///
/// Returned calls carry an empty `id`; the caller assigns ids when it hands
/// the calls to a registry.
pub fn parse_tool_calls(text: &str) -> Result<Vec<ToolCall>, ToolXmlError> {
    let start = text.find("<function_calls>").ok_or(ToolXmlError::MissingBlock)?;
    let end_rel = text[start..]
        .find("</function_calls>")
        .ok_or_else(|| ToolXmlError::Malformed("unterminated <function_calls> block".into()))?;
    let block = &text[start..start + end_rel + "</function_calls>".len()];

    // Regexes are fine here: the block is complete by the time this runs (the
    // incremental matching problem lives in the stream parser, not here).
    let invoke_re = Regex::new(r#"(?s)<invoke\s+name="([^"]*)"\s*>(.*?)</invoke>"#)
        .expect("static regex must compile");
    let param_re = Regex::new(r#"(?s)<parameter\s+name="([^"]*)"\s*>(.*?)</parameter>"#)
        .expect("static regex must compile");

    let mut calls = Vec::new();
    for invoke in invoke_re.captures_iter(block) {
        let name = unescape(&invoke[1]);
        if name.is_empty() {
            return Err(ToolXmlError::Malformed("invoke has an empty name".into()));
        }
        let mut args = Map::new();
        for param in param_re.captures_iter(&invoke[2]) {
            let key = unescape(&param[1]);
            let raw = unescape(&param[2]);
            args.insert(key, coerce_value(&raw));
        }
        calls.push(ToolCall::new("", name, Value::Object(args)));
    }
    if calls.is_empty() {
        return Err(ToolXmlError::Malformed("block contains no <invoke> elements".into()));
    }
    Ok(calls)
}

/// Valid JSON → typed value; everything else stays a string.
fn coerce_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) if !v.is_string() => v,
        _ => Value::String(raw.to_string()),
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
