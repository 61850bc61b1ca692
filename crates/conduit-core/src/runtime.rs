// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The process-wide service container.
//!
//! Everything that used to be a hidden singleton in earlier designs — the
//! model store, the odometer registry, the database pool manager — lives
//! here and is threaded explicitly from the entry point.  Shutdown is driven
//! by whoever owns the runtime (the CLI's signal handler, an embedder's
//! teardown path); exit hooks are a safety net, not the mechanism.

use std::sync::Arc;

use tracing::debug;

use conduit_config::Settings;
use conduit_model::{ConduitError, ModelStore};
use conduit_storage::{ConduitCache, DbManager, OdometerRegistry, SessionRepository};

pub struct ConduitRuntime {
    settings: Settings,
    model_store: Arc<ModelStore>,
    odometer: Arc<OdometerRegistry>,
    db: Option<Arc<DbManager>>,
}

impl ConduitRuntime {
    /// Wire the service graph from settings.  No I/O happens here: the pool
    /// and cache open lazily on first use.
    pub fn initialize(settings: Settings) -> Self {
        let db = settings
            .database_url
            .as_ref()
            .map(|dsn| Arc::new(DbManager::new(dsn.clone())));
        let odometer = match &db {
            Some(db) => Arc::new(OdometerRegistry::with_database(Arc::clone(db))),
            None => Arc::new(OdometerRegistry::in_memory()),
        };
        let model_store = Arc::new(ModelStore::new(settings.clone()));
        debug!(durable_telemetry = db.is_some(), "runtime initialized");
        Self { settings, model_store, odometer, db }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn model_store(&self) -> &Arc<ModelStore> {
        &self.model_store
    }

    pub fn odometer(&self) -> &Arc<OdometerRegistry> {
        &self.odometer
    }

    pub fn db(&self) -> Option<&Arc<DbManager>> {
        self.db.as_ref()
    }

    /// Open the response cache at the configured path.
    pub fn open_cache(&self) -> Result<Arc<ConduitCache>, ConduitError> {
        Ok(Arc::new(ConduitCache::open(self.settings.resolved_cache_path())?))
    }

    /// The session repository, when a database is configured.
    pub fn repository(&self) -> Option<Arc<SessionRepository>> {
        self.db
            .as_ref()
            .map(|db| Arc::new(SessionRepository::new(Arc::clone(db))))
    }

    /// Eagerly initialize the shared pool (the batch path does this before
    /// fanning out so concurrent tasks never race the first connection).
    pub async fn warm_pool(&self) -> Result<(), ConduitError> {
        if let Some(db) = &self.db {
            db.get_pool().await?;
        }
        Ok(())
    }

    /// Graceful shutdown: flush telemetry, then close the pool.  Safe to
    /// call more than once.
    pub async fn shutdown(&self) {
        self.odometer.shutdown().await;
        if let Some(db) = &self.db {
            db.shutdown().await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
