// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Opaque identifier from the model (forwarded verbatim into results).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self { id: id.into(), name: name.into(), args }
    }

    /// String argument accessor; `None` when absent or non-string.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key)?.as_str()
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// True when the tool execution failed non-fatally (the message is the
    /// error text; the conversation continues).
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), is_error: false }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: msg.into(), is_error: true }
    }
}

/// Trait that every built-in and user-defined tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn str_arg_reads_string_values() {
        let call = ToolCall::new("c1", "ls", json!({ "path": "/tmp", "depth": 2 }));
        assert_eq!(call.str_arg("path"), Some("/tmp"));
        assert_eq!(call.str_arg("depth"), None);
        assert_eq!(call.str_arg("missing"), None);
    }

    #[test]
    fn ok_output_is_not_error() {
        let out = ToolOutput::ok("c1", "fine");
        assert!(!out.is_error);
        assert_eq!(out.call_id, "c1");
    }

    #[test]
    fn err_output_is_error() {
        let out = ToolOutput::err("c1", "boom");
        assert!(out.is_error);
        assert_eq!(out.content, "boom");
    }
}
