// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The process-wide model/client registry.
//!
//! One store is built at startup and threaded explicitly (no hidden global
//! state).  Clients are constructed lazily per `(model, execution mode)` and
//! cached; the catalog is read-only after process start.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use conduit_config::Settings;

use crate::catalog::{self, ModelCatalogEntry};
use crate::clients::{
    anthropic::AnthropicClient, google::GoogleClient, mock::MockClient, ollama::OllamaClient,
    openai::OpenAiClient, perplexity::PerplexityClient, remote::RemoteClient, ProviderClient,
};
use crate::error::ConduitError;
use crate::params::ExecutionMode;
use crate::registry::{self, ProviderMeta};

pub struct ModelStore {
    settings: Settings,
    clients: Mutex<HashMap<(String, ExecutionMode), Arc<dyn ProviderClient>>>,
}

impl ModelStore {
    pub fn new(settings: Settings) -> Self {
        Self { settings, clients: Mutex::new(HashMap::new()) }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolve the provider for a model: catalog first, then the prefix
    /// heuristics for models the catalog does not know (fresh Ollama pulls,
    /// brand-new API models).
    pub fn identify_provider(&self, model: &str) -> Result<&'static ProviderMeta, ConduitError> {
        if let Some(entry) = catalog::lookup(model) {
            return registry::get_provider(&entry.provider)
                .ok_or_else(|| ConduitError::unknown_model(model));
        }
        registry::provider_for_model_prefix(model).ok_or_else(|| ConduitError::unknown_model(model))
    }

    /// Catalog record for a model, if it has one.
    pub fn catalog_entry(&self, model: &str) -> Option<ModelCatalogEntry> {
        catalog::lookup(model)
    }

    /// Context window for a model.  Ollama models fall back to the configured
    /// per-tag table; everything else defaults to 32768.
    pub fn get_context_window(&self, model: &str) -> u32 {
        if let Some(entry) = catalog::lookup(model) {
            return entry.context_window;
        }
        match self.identify_provider(model) {
            Ok(meta) if meta.id == "ollama" => self.settings.ollama_context_size(model),
            _ => 32768,
        }
    }

    /// Get (or lazily construct) the client for `(model, mode)`.
    ///
    /// Missing API keys surface as `missing_credentials`; models that match
    /// no provider surface as `unknown_model`.
    pub fn get_client(
        &self,
        model: &str,
        mode: ExecutionMode,
    ) -> Result<Arc<dyn ProviderClient>, ConduitError> {
        let key = (model.to_string(), mode);
        if let Some(client) = self.clients.lock().unwrap().get(&key) {
            return Ok(Arc::clone(client));
        }

        let client = self.build_client(model, mode)?;
        let mut clients = self.clients.lock().unwrap();
        let entry = clients.entry(key).or_insert(client);
        Ok(Arc::clone(entry))
    }

    /// Pre-register a client for a model, bypassing construction.  Used by
    /// tests (scripted mocks) and embedders with custom backends.
    pub fn register_client(
        &self,
        model: &str,
        mode: ExecutionMode,
        client: Arc<dyn ProviderClient>,
    ) {
        self.clients
            .lock()
            .unwrap()
            .insert((model.to_string(), mode), client);
    }

    fn build_client(
        &self,
        model: &str,
        mode: ExecutionMode,
    ) -> Result<Arc<dyn ProviderClient>, ConduitError> {
        if mode == ExecutionMode::Remote {
            let url = self
                .settings
                .remote_url
                .clone()
                .ok_or_else(|| ConduitError::validation("remote_url is not configured"))?;
            return Ok(Arc::new(RemoteClient::new(url)));
        }

        let meta = self.identify_provider(model)?;
        let api_key = match meta.api_key_env {
            Some(env_var) => match std::env::var(env_var) {
                Ok(key) if !key.is_empty() => Some(key),
                _ if meta.requires_api_key => {
                    return Err(ConduitError::missing_credentials(env_var));
                }
                _ => None,
            },
            None => None,
        };

        let client: Arc<dyn ProviderClient> = match meta.id {
            "openai" => Arc::new(OpenAiClient::new(api_key.unwrap_or_default(), None)),
            "anthropic" => Arc::new(AnthropicClient::new(api_key.unwrap_or_default(), None)),
            "google" => Arc::new(GoogleClient::new(api_key.unwrap_or_default(), None)),
            "perplexity" => Arc::new(PerplexityClient::new(api_key.unwrap_or_default(), None)),
            "ollama" => Arc::new(OllamaClient::new(self.settings.clone())),
            "mock" => Arc::new(MockClient::new()),
            other => {
                return Err(ConduitError::validation(format!(
                    "provider '{other}' has no client implementation"
                )))
            }
        };
        Ok(client)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
