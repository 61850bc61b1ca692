// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The conversation state machine.
//!
//! LLMs produce the next token; the engine produces the next message.  Each
//! step inspects the conversation's derived state and either generates (model
//! call through the middleware), executes pending tool calls, or terminates.
//! `max_steps` bounds the loop so a runaway tool cycle degrades into a
//! warning, not an infinite bill.

use serde_json::Value;
use tracing::warn;

use conduit_model::{
    message, ConduitError, Conversation, ConversationState, ExecutionMode, GenerationOutcome,
    GenerationParams, GenerationRequest, Message, Model,
};
use conduit_parser::StreamParser;
use conduit_storage::TokenEvent;
use conduit_tools::{self as tools, TOOL_CALL_TAG};

use crate::middleware;
use crate::options::ConduitOptions;
use crate::runtime::ConduitRuntime;

pub const DEFAULT_MAX_STEPS: u32 = 10;

pub struct Engine;

impl Engine {
    /// Drive `conversation` until it terminates, fails, or exhausts
    /// `max_steps`.
    ///
    /// Provider failures are recorded on the returned conversation (see
    /// [`Conversation::failure`]); malformed conversations fail hard with
    /// `incomplete_conversation`.
    pub async fn run(
        mut conversation: Conversation,
        params: &GenerationParams,
        options: &ConduitOptions,
        runtime: &ConduitRuntime,
        max_steps: u32,
    ) -> Result<Conversation, ConduitError> {
        let mut steps = 0u32;
        while steps < max_steps {
            match conversation.state() {
                ConversationState::Generate => {
                    if let Err(error) =
                        Self::generate(&mut conversation, params, options, runtime).await
                    {
                        conversation.record_failure(&error);
                        return Ok(conversation);
                    }
                }
                ConversationState::Execute => {
                    Self::execute(&mut conversation, options).await;
                }
                ConversationState::Terminate => return Ok(conversation),
                ConversationState::Incomplete => {
                    return Err(ConduitError::incomplete_conversation(
                        "conversation is empty or malformed",
                    ));
                }
            }
            steps += 1;
        }
        warn!(max_steps, "engine hit the step limit; returning current state");
        Ok(conversation)
    }

    /// One model turn: build a request from the history, pipe it through the
    /// middleware, append the assistant's reply.
    async fn generate(
        conversation: &mut Conversation,
        params: &GenerationParams,
        options: &ConduitOptions,
        runtime: &ConduitRuntime,
    ) -> Result<(), ConduitError> {
        if let Some(system) = &params.system {
            conversation.ensure_system_message(system);
        }
        // Advertise the registry's tools unless the caller already declared
        // an explicit set.
        let mut params = params.clone();
        if params.tools.is_empty() {
            if let Some(registry) = &options.tool_registry {
                params.tools = registry
                    .schemas()
                    .into_iter()
                    .map(|s| conduit_model::ToolSpec {
                        name: s.name,
                        description: s.description,
                        parameters: s.parameters,
                    })
                    .collect();
            }
        }
        let request = GenerationRequest::new(conversation.messages.clone(), params.clone());
        let model = Model::resolve(runtime.model_store(), &params.model, ExecutionMode::Async)?;

        match middleware::call(&model, &request, options, runtime.odometer()).await? {
            GenerationOutcome::Response(response) => {
                conversation.add(response.message);
            }
            GenerationOutcome::Stream(mut handle) => {
                // Scan the stream for an embedded tool-call block and close
                // the connection as soon as one completes.
                let outcome = StreamParser::xml(TOOL_CALL_TAG).parse(&mut handle).await;
                let message = Self::streamed_message(&outcome)?;
                conversation.add(message);
                // One token event per streamed generation, from the
                // provider's usage frames.
                runtime.odometer().record(TokenEvent::new(
                    model.provider(),
                    model.name(),
                    outcome.usage.input_tokens,
                    outcome.usage.output_tokens,
                ));
            }
        }
        Ok(())
    }

    /// Build the assistant message for a drained stream: the pre-match text
    /// plus any tool calls parsed from the matched XML block.
    fn streamed_message(outcome: &conduit_parser::ParseOutcome) -> Result<Message, ConduitError> {
        let text = outcome.pre_match_text.trim_end().to_string();
        let Some(block) = &outcome.matched else {
            return Ok(Message::assistant(text));
        };
        let parsed = tools::parse_tool_calls(block)
            .map_err(|e| ConduitError::xml_parse(e.to_string()))?;
        let calls = parsed
            .into_iter()
            .map(|call| {
                let arguments = match call.args {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                message::ToolCall::new(
                    uuid::Uuid::new_v4().to_string(),
                    call.name,
                    arguments,
                )
            })
            .collect();
        Ok(Message::assistant_with_tool_calls(text, calls))
    }

    /// Execute the trailing assistant's tool calls, in the order the
    /// provider emitted them, appending one tool message per call.
    async fn execute(conversation: &mut Conversation, options: &ConduitOptions) {
        let calls: Vec<message::ToolCall> = conversation
            .last()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();

        for call in calls {
            let content = match &options.tool_registry {
                Some(registry) => {
                    let output = registry
                        .execute(&tools::ToolCall::new(
                            &call.id,
                            &call.function_name,
                            Value::Object(call.arguments.clone()),
                        ))
                        .await;
                    if output.is_error {
                        warn!(tool = %call.function_name, "tool returned an error result");
                    }
                    output.content
                }
                None => {
                    warn!(tool = %call.function_name, "no tool registry configured");
                    format!("tool '{}' is not available: no tool registry configured", call.function_name)
                }
            };
            conversation.add(Message::tool_result(&call.id, content));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
