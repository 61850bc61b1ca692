// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Data model and provider layer: messages, conversations, requests,
//! responses, the error taxonomy, the model catalog, and the per-provider
//! wire adapters.

pub mod catalog;
pub mod clients;
pub mod conversation;
pub mod error;
pub mod message;
pub mod model;
pub mod params;
pub mod registry;
pub mod request;
pub mod response;
pub mod store;
pub mod tokens;

pub use clients::{ProviderClient, TokenPayload};
pub use conversation::{Conversation, ConversationState, SessionStore};
pub use error::{ConduitError, ErrorCategory, ErrorDetail, ErrorInfo};
pub use message::{
    parse_data_url_parts, AudioFormat, AudioRef, ContentBlock, ImageDetail, Message, Role,
    ToolCall, UserContent,
};
pub use model::{Model, QueryInput};
pub use params::{ExecutionMode, GenerationParams, OutputType, ToolSpec};
pub use request::GenerationRequest;
pub use response::{
    EventStream, GenerationOutcome, GenerationResponse, GenerationResult, ResponseMetadata,
    StreamEvent, StreamHandle, StreamUsage,
};
pub use store::ModelStore;
