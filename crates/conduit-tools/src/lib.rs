// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool invocation surface: the `Tool` trait, the registry the engine
//! executes against, the model-facing XML wire format, and a few built-ins.

pub mod builtin;
mod registry;
mod tool;
pub mod web;
pub mod xml;

pub use builtin::builtin_registry;
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall, ToolOutput};
pub use web::{FetchUrlTool, WebSearchTool};
pub use xml::{parse_tool_calls, serialize_tool_call, serialize_tool_calls, ToolXmlError, TOOL_CALL_TAG};
