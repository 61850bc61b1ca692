// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The caller-facing orchestrator: one `run` renders a prompt, appends one
//! user turn to a (possibly resumed) conversation, drives the engine, and
//! persists the result.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use conduit_model::{ConduitError, Conversation, GenerationParams, Message, Role};

use crate::engine::{Engine, DEFAULT_MAX_STEPS};
use crate::options::{ConduitOptions, PersistenceMode};
use crate::prompt::Prompt;
use crate::runtime::ConduitRuntime;

pub struct Conduit {
    prompt: Prompt,
    runtime: Arc<ConduitRuntime>,
}

impl Conduit {
    pub fn new(prompt: Prompt, runtime: Arc<ConduitRuntime>) -> Self {
        Self { prompt, runtime }
    }

    pub fn prompt(&self) -> &Prompt {
        &self.prompt
    }

    /// Execute one turn.
    ///
    /// Returns the conversation after the engine finished with it.  When a
    /// generation failed mid-run the conversation carries the failure (see
    /// [`Conversation::failure`]) and is NOT persisted.
    pub async fn run(
        &self,
        input_variables: Option<&HashMap<String, String>>,
        params: &GenerationParams,
        options: &ConduitOptions,
    ) -> Result<Conversation, ConduitError> {
        let rendered = match input_variables {
            Some(vars) => self.prompt.render(vars)?,
            None => self.prompt.render_plain()?,
        };

        let conversation = self.prepare_conversation(rendered, params, options).await?;
        let conversation =
            Engine::run(conversation, params, options, &self.runtime, DEFAULT_MAX_STEPS).await?;

        if let Some(repository) = &options.repository {
            if conversation.failure.is_some() {
                warn!("run failed; not persisting the tainted conversation");
            } else {
                info!("saving conversation to repository");
                repository
                    .save_session(
                        &options.project_name,
                        &conversation,
                        conversation.topic.as_deref(),
                    )
                    .await?;
            }
        }
        Ok(conversation)
    }

    /// Blocking façade over [`run`](Self::run) for synchronous callers.
    /// Must not be invoked from inside an async context.
    pub fn run_sync(
        &self,
        input_variables: Option<&HashMap<String, String>>,
        params: &GenerationParams,
        options: &ConduitOptions,
    ) -> Result<Conversation, ConduitError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConduitError::validation(format!("could not build a runtime: {e}")))?;
        runtime.block_on(self.run(input_variables, params, options))
    }

    /// Build the conversation for this turn: load the last session when a
    /// repository is configured, apply the persistence mode and history
    /// limit, recover from a crashed run, then append the new user turn.
    async fn prepare_conversation(
        &self,
        rendered_prompt: String,
        params: &GenerationParams,
        options: &ConduitOptions,
    ) -> Result<Conversation, ConduitError> {
        let mut conversation: Option<Conversation> = None;

        if let Some(repository) = &options.repository {
            match repository.last(&options.project_name).await? {
                Some(mut loaded) => {
                    info!("loading last conversation from repository");
                    if options.persistence_mode == PersistenceMode::Overwrite {
                        info!("overwriting prior history per persistence mode");
                        loaded.wipe();
                    } else {
                        loaded.prune(options.max_history);
                    }
                    if let Some(system) = &params.system {
                        loaded.ensure_system_message(system);
                    }
                    conversation = Some(loaded);
                }
                None => info!("no previous conversation found in repository"),
            }
        }

        let mut conversation = conversation.unwrap_or_else(|| {
            let mut fresh = Conversation::new();
            if let Some(system) = &params.system {
                fresh.ensure_system_message(system);
            }
            fresh
        });
        conversation.failure = None;

        // Crash recovery: a trailing user message means the previous run
        // died before the assistant replied.  Drop it so resubmission is
        // idempotent at the turn boundary.
        if conversation.last().map(|m| m.role()) == Some(Role::User) {
            warn!("found dangling user message from an interrupted run; dropping it");
            conversation.pop();
        }

        conversation.add(Message::user(rendered_prompt));
        Ok(conversation)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
