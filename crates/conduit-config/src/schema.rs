// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Verbosity;

/// Runtime settings for the whole process.
///
/// Loaded once at startup from YAML config files plus environment overrides,
/// then threaded explicitly to every subsystem that needs it.  Provider API
/// keys are NOT stored here — they are read from the environment at client
/// construction time so secrets never transit config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Project name used to key conversation sessions in the repository.
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Default verbosity for runs that do not set one explicitly.
    #[serde(default)]
    pub verbosity: Verbosity,

    /// Postgres DSN for telemetry and the conversation repository.
    ///
    /// `None` disables both durable layers: the odometer runs in-memory only
    /// and conversations are not persisted.  Overridden by the
    /// `CONDUIT_DATABASE_URL` environment variable.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Path to the SQLite response cache.  `~` is expanded.  Overridden by
    /// `CONDUIT_CACHE_PATH`.  Defaults to `$XDG_CACHE_HOME/conduit/cache.db`.
    #[serde(default)]
    pub cache_path: Option<String>,

    /// Base URL of the local Ollama daemon.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Preferred context sizes per Ollama model tag.  Models not listed here
    /// fall back to 32768.
    #[serde(default)]
    pub ollama_context_sizes: HashMap<String, u32>,

    /// URL of a companion server for remote (server-brokered) execution.
    #[serde(default)]
    pub remote_url: Option<String>,
}

fn default_project_name() -> String {
    "conduit".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            verbosity: Verbosity::default(),
            database_url: None,
            cache_path: None,
            ollama_url: default_ollama_url(),
            ollama_context_sizes: HashMap::new(),
            remote_url: None,
        }
    }
}

impl Settings {
    /// Apply environment-variable overrides on top of whatever the config
    /// files provided.  Called by [`crate::load`]; exposed for tests.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dsn) = std::env::var("CONDUIT_DATABASE_URL") {
            if !dsn.is_empty() {
                self.database_url = Some(dsn);
            }
        }
        if let Ok(path) = std::env::var("CONDUIT_CACHE_PATH") {
            if !path.is_empty() {
                self.cache_path = Some(path);
            }
        }
        if let Ok(url) = std::env::var("CONDUIT_OLLAMA_URL") {
            if !url.is_empty() {
                self.ollama_url = url;
            }
        }
    }

    /// Resolved cache database path, with `~` expanded and the XDG default
    /// applied when unset.
    pub fn resolved_cache_path(&self) -> PathBuf {
        match &self.cache_path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).into_owned()),
            None => default_cache_dir().join("cache.db"),
        }
    }

    /// Resolved context size for an Ollama model tag (default 32768).
    pub fn ollama_context_size(&self, model: &str) -> u32 {
        self.ollama_context_sizes.get(model).copied().unwrap_or(32768)
    }
}

/// `$XDG_CACHE_HOME/conduit`, falling back to the current directory when the
/// platform reports no cache dir (containers with no HOME).
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conduit")
}

/// `$XDG_STATE_HOME/conduit` — live Ollama tag lists land here.
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conduit")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
