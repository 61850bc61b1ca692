// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use conduit_config::Verbosity;
use conduit_model::SessionStore;
use conduit_storage::ConduitCache;
use conduit_tools::ToolRegistry;

use crate::display::Console;

/// What happens to a previously stored session when a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceMode {
    /// Continue from the last stored session.
    #[default]
    Resume,
    /// Start over: the loaded session's history is wiped first.
    Overwrite,
}

/// How to run a generation: display, caching, persistence, and tools.
///
/// Deliberately not part of [`conduit_model::GenerationRequest`]: none of
/// these fields may influence the cache key.
#[derive(Clone, Default)]
pub struct ConduitOptions {
    /// Project name used to key sessions in the repository.
    pub project_name: String,
    pub verbosity: Verbosity,
    /// Response cache; `None` disables caching entirely.
    pub cache: Option<Arc<ConduitCache>>,
    /// Session store; `None` disables persistence.
    pub repository: Option<Arc<dyn SessionStore>>,
    pub persistence_mode: PersistenceMode,
    /// Keep only the most recent N non-system messages when resuming.
    pub max_history: Option<usize>,
    /// Display target.  Defaults to stderr.
    pub console: Console,
    /// Tools the engine may execute; `None` means tool calls fail softly.
    pub tool_registry: Option<Arc<ToolRegistry>>,
}

impl ConduitOptions {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self { project_name: project_name.into(), ..Self::default() }
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ConduitCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn SessionStore>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tool_registry = Some(registry);
        self
    }

    pub fn overwrite(mut self) -> Self {
        self.persistence_mode = PersistenceMode::Overwrite;
        self
    }
}

impl std::fmt::Debug for ConduitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConduitOptions")
            .field("project_name", &self.project_name)
            .field("verbosity", &self.verbosity)
            .field("cache", &self.cache.is_some())
            .field("repository", &self.repository.is_some())
            .field("persistence_mode", &self.persistence_mode)
            .field("max_history", &self.max_history)
            .field("tool_registry", &self.tool_registry.is_some())
            .finish()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
