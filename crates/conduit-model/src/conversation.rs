// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConduitError, ErrorInfo};
use crate::message::{Message, Role};

/// What the engine should do next, derived from the trailing message(s).
///
/// LLMs produce the next token; the engine produces the next message.  The
/// state is never stored — it is recomputed from the message log on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Last message is from the user: call the model.
    Generate,
    /// Last message is an assistant turn with pending tool calls: run tools.
    Execute,
    /// Last message is an assistant turn with nothing pending: done.
    Terminate,
    /// The log is malformed (empty, wrong opening role, or a hanging tool
    /// call that never received its result).
    Incomplete,
}

/// An ordered message log with identity, topic, and a leaf pointer.
///
/// Conversations exclusively own their messages and are mutated only by
/// appending; `leaf` always tracks the id of the trailing message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Id of the trailing message; `None` when empty.
    #[serde(default)]
    pub leaf: Option<String>,
    /// Failure recorded by the engine when a generation errored mid-run.
    /// A conversation carrying a failure is never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ErrorInfo>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: None,
            messages: Vec::new(),
            leaf: None,
            failure: None,
        }
    }

    pub fn with_topic(topic: impl Into<String>) -> Self {
        let mut c = Self::new();
        c.topic = Some(topic.into());
        c
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message and advance the leaf pointer.
    pub fn add(&mut self, message: Message) {
        self.leaf = Some(message.id().to_string());
        self.messages.push(message);
    }

    /// Drop the trailing message and rewind the leaf pointer.
    pub fn pop(&mut self) -> Option<Message> {
        let dropped = self.messages.pop();
        self.leaf = self.messages.last().map(|m| m.id().to_string());
        dropped
    }

    /// Remove all messages.  Identity and topic survive.
    pub fn wipe(&mut self) {
        self.messages.clear();
        self.leaf = None;
        self.failure = None;
    }

    /// Insert or replace the system message so that it matches `system` and
    /// sits at index 0.
    pub fn ensure_system_message(&mut self, system: &str) {
        if let Some(Message::System { content, .. }) = self.messages.first_mut() {
            if content.as_str() != system {
                *content = system.to_string();
            }
            return;
        }
        self.messages.insert(0, Message::system(system));
        if self.messages.len() == 1 {
            self.leaf = Some(self.messages[0].id().to_string());
        }
    }

    /// Truncate to the most recent `keep` non-system messages.  The system
    /// message, when present, always survives at index 0.  `None` keeps
    /// everything.
    pub fn prune(&mut self, keep: Option<usize>) {
        let Some(keep) = keep else { return };
        let system = match self.messages.first() {
            Some(Message::System { .. }) => Some(self.messages.remove(0)),
            _ => None,
        };
        if self.messages.len() > keep {
            let drop = self.messages.len() - keep;
            self.messages.drain(..drop);
        }
        if let Some(sys) = system {
            self.messages.insert(0, sys);
        }
        self.leaf = self.messages.last().map(|m| m.id().to_string());
    }

    pub fn record_failure(&mut self, error: &ConduitError) {
        self.failure = Some(error.info.clone());
    }

    /// Sum of per-message token estimates, for pruning heuristics.
    pub fn approx_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.approx_tokens()).sum()
    }

    /// Classify the conversation (see [`ConversationState`]).
    ///
    /// A tool call is "hanging" when an assistant message other than the
    /// trailing one emitted a call id that no later tool message answers —
    /// the trailing assistant's pending calls are exactly the `Execute` state.
    pub fn state(&self) -> ConversationState {
        let Some(last) = self.messages.last() else {
            return ConversationState::Incomplete;
        };

        match self.messages[0].role() {
            Role::System | Role::User => {}
            _ => return ConversationState::Incomplete,
        }

        if self.has_hanging_tool_call() {
            return ConversationState::Incomplete;
        }

        match last {
            Message::User { .. } => ConversationState::Generate,
            Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                ConversationState::Execute
            }
            Message::Assistant { .. } => ConversationState::Terminate,
            // A trailing tool result feeds straight back into generation.
            Message::Tool { .. } => ConversationState::Generate,
            Message::System { .. } => ConversationState::Incomplete,
        }
    }

    fn has_hanging_tool_call(&self) -> bool {
        let n = self.messages.len();
        for (i, msg) in self.messages.iter().enumerate() {
            if i + 1 == n {
                break; // trailing message's calls are Execute, not hanging
            }
            for call in msg.tool_calls() {
                let answered = self.messages[i + 1..].iter().any(|m| {
                    matches!(m, Message::Tool { tool_call_id, .. } if tool_call_id == &call.id)
                });
                if !answered {
                    return true;
                }
            }
        }
        false
    }
}

// ─── Session persistence contract ─────────────────────────────────────────────

/// Backing store for conversation sessions, keyed by (project, session id).
///
/// Implemented by the Postgres repository; tests use an in-memory store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The most recent session for a project, or `None` when there is none.
    async fn last(&self, project: &str) -> Result<Option<Conversation>, ConduitError>;

    /// Upsert a session under its id, with an optional display name.
    async fn save_session(
        &self,
        project: &str,
        conversation: &Conversation,
        name: Option<&str>,
    ) -> Result<(), ConduitError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
