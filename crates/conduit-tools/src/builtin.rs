// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in filesystem tools.  Enough surface to run tool-loop demos without
//! wiring a custom registry.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolCall, ToolOutput, ToolRegistry};

/// Read a UTF-8 text file, optionally from a byte offset.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file and return its contents"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute or relative file path" },
                "max_bytes": { "type": "integer", "description": "Truncate after this many bytes" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.str_arg("path") else {
            return ToolOutput::err(&call.id, "missing required argument: path");
        };
        match tokio::fs::read_to_string(path).await {
            Ok(mut content) => {
                if let Some(max) = call.args.get("max_bytes").and_then(Value::as_u64) {
                    if content.len() as u64 > max {
                        content.truncate(max as usize);
                        content.push_str("\n[truncated]");
                    }
                }
                ToolOutput::ok(&call.id, content)
            }
            Err(e) => ToolOutput::err(&call.id, format!("could not read {path}: {e}")),
        }
    }
}

/// List directory entries, one name per line, directories suffixed with `/`.
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List the entries of a directory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.str_arg("path") else {
            return ToolOutput::err(&call.id, "missing required argument: path");
        };
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(e) => return ToolOutput::err(&call.id, format!("could not list {path}: {e}")),
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        ToolOutput::ok(&call.id, names.join("\n"))
    }
}

/// Registry preloaded with the built-in tools.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool);
    registry.register(ListDirTool);
    registry.register(crate::web::FetchUrlTool::new());
    registry.register(crate::web::WebSearchTool::new());
    registry
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_file_returns_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "hello file").unwrap();
        let call = ToolCall::new("c1", "read_file", json!({ "path": path.to_str().unwrap() }));
        let out = ReadFileTool.execute(&call).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "hello file");
    }

    #[tokio::test]
    async fn read_file_truncates_at_max_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "abcdefghij").unwrap();
        let call = ToolCall::new(
            "c1",
            "read_file",
            json!({ "path": path.to_str().unwrap(), "max_bytes": 4 }),
        );
        let out = ReadFileTool.execute(&call).await;
        assert!(out.content.starts_with("abcd"));
        assert!(out.content.ends_with("[truncated]"));
    }

    #[tokio::test]
    async fn read_file_missing_path_argument_errors() {
        let out = ReadFileTool.execute(&ToolCall::new("c1", "read_file", json!({}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn read_file_nonexistent_errors_softly() {
        let call = ToolCall::new("c1", "read_file", json!({ "path": "/no/such/file/xyz" }));
        let out = ReadFileTool.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("could not read"));
    }

    #[tokio::test]
    async fn ls_lists_sorted_entries_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let call = ToolCall::new("c1", "ls", json!({ "path": dir.path().to_str().unwrap() }));
        let out = ListDirTool.execute(&call).await;
        assert_eq!(out.content, "a.txt\nb.txt\nsub/");
    }

    #[tokio::test]
    async fn builtin_registry_contains_all_tools() {
        let reg = builtin_registry();
        assert_eq!(reg.names(), vec!["fetch_url", "ls", "read_file", "web_search"]);
    }
}
