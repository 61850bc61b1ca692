// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bounded-concurrency fan-out of independent conduit runs.
//!
//! Two modes, exactly one per call: a single template with a list of
//! variable maps, or a list of pre-rendered prompt strings.  A counting
//! semaphore is the sole backpressure mechanism; omitting the limit means
//! unbounded.  Failures are soft: every input yields a conversation, with
//! per-run failures carried on the conversation itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use conduit_model::{Conversation, GenerationParams, ConduitError};

use crate::conduit::Conduit;
use crate::options::ConduitOptions;
use crate::prompt::Prompt;
use crate::runtime::ConduitRuntime;

pub struct ConduitBatch {
    prompt: Option<Prompt>,
    runtime: Arc<ConduitRuntime>,
}

impl ConduitBatch {
    /// Template mode: `run` takes a list of variable maps.
    pub fn with_template(prompt: Prompt, runtime: Arc<ConduitRuntime>) -> Self {
        Self { prompt: Some(prompt), runtime }
    }

    /// String mode: `run` takes pre-rendered prompt strings.
    pub fn new(runtime: Arc<ConduitRuntime>) -> Self {
        Self { prompt: None, runtime }
    }

    /// Execute the batch.  Results preserve input order: `result[i]`
    /// corresponds to `input[i]`.
    pub async fn run(
        &self,
        input_variables_list: Option<Vec<HashMap<String, String>>>,
        prompt_strings: Option<Vec<String>>,
        params: &GenerationParams,
        options: &ConduitOptions,
        max_concurrent: Option<usize>,
    ) -> Result<Vec<Conversation>, ConduitError> {
        if input_variables_list.is_some() && prompt_strings.is_some() {
            return Err(ConduitError::validation(
                "provide exactly one of: input_variables_list OR prompt_strings",
            ));
        }
        if input_variables_list.is_none() && prompt_strings.is_none() {
            return Err(ConduitError::validation(
                "must provide either input_variables_list or prompt_strings",
            ));
        }
        if input_variables_list.is_some() && self.prompt.is_none() {
            return Err(ConduitError::validation(
                "template mode requires a batch constructed with a prompt",
            ));
        }

        // Warm the shared pool before fanning out so concurrent tasks never
        // race the first connection.
        self.runtime.warm_pool().await?;

        let semaphore = max_concurrent.map(|n| Arc::new(Semaphore::new(n)));

        let tasks: Vec<_> = match (input_variables_list, prompt_strings, &self.prompt) {
            (Some(inputs), None, Some(prompt)) => {
                // One conduit reused across the batch: the template is parsed
                // once.
                let conduit = Arc::new(Conduit::new(prompt.clone(), Arc::clone(&self.runtime)));
                info!(count = inputs.len(), "executing batch in template mode");
                inputs
                    .into_iter()
                    .map(|vars| {
                        let conduit = Arc::clone(&conduit);
                        let semaphore = semaphore.clone();
                        let params = params.clone();
                        let options = options.clone();
                        tokio::spawn(async move {
                            let _permit = match &semaphore {
                                // The semaphore lives for the whole batch and
                                // is never closed.
                                Some(s) => s.acquire().await.ok(),
                                None => None,
                            };
                            conduit.run(Some(&vars), &params, &options).await
                        })
                    })
                    .collect()
            }
            (None, Some(strings), _) => {
                info!(count = strings.len(), "executing batch in string mode");
                strings
                    .into_iter()
                    .map(|prompt| {
                        let runtime = Arc::clone(&self.runtime);
                        let semaphore = semaphore.clone();
                        let params = params.clone();
                        let options = options.clone();
                        tokio::spawn(async move {
                            let _permit = match &semaphore {
                                Some(s) => s.acquire().await.ok(),
                                None => None,
                            };
                            let conduit = Conduit::new(Prompt::new(prompt), runtime);
                            conduit.run(None, &params, &options).await
                        })
                    })
                    .collect()
            }
            _ => unreachable!("mode validation above"),
        };

        let mut conversations = Vec::with_capacity(tasks.len());
        for task in tasks {
            let conversation = match task.await {
                Ok(Ok(conversation)) => conversation,
                // Fail-soft: setup failures become error-carrying results so
                // positions stay aligned with inputs.
                Ok(Err(error)) => {
                    let mut failed = Conversation::new();
                    failed.record_failure(&error);
                    failed
                }
                Err(join_error) => {
                    let mut failed = Conversation::new();
                    failed.record_failure(&ConduitError::validation(format!(
                        "batch task panicked: {join_error}"
                    )));
                    failed
                }
            };
            conversations.push(conversation);
        }

        // One telemetry flush for the whole batch.
        self.runtime.odometer().flush().await;
        Ok(conversations)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
