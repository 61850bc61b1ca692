// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shared Postgres pool manager.
//!
//! One `DbManager` serves both telemetry and the session repository.  The
//! pool is created lazily behind a lock, so when K callers race for it
//! exactly one initialization runs and the other K−1 await its completion.
//! Shutdown closes the pool and resets the slot, leaving the manager
//! restartable.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::info;

use conduit_model::{ConduitError, ErrorCategory};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DbManager {
    dsn: String,
    pool: Mutex<Option<PgPool>>,
}

impl DbManager {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into(), pool: Mutex::new(None) }
    }

    /// Get (or lazily create) the shared pool.
    ///
    /// The lock is held across initialization on purpose: that is the
    /// thundering-herd guarantee.  `PgPool` is itself a cheap handle, so
    /// callers clone freely.
    pub async fn get_pool(&self) -> Result<PgPool, ConduitError> {
        let mut slot = self.pool.lock().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        info!("initializing shared Postgres connection pool");
        let pool = PgPoolOptions::new()
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(&self.dsn)
            .await
            .map_err(|e| {
                ConduitError::simple(
                    "connection_error",
                    format!("could not connect to Postgres: {e}"),
                    ErrorCategory::Network,
                )
            })?;
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// True when the pool has been created and not yet shut down.
    pub async fn is_initialized(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    /// Graceful shutdown: close the pool and reset state so the manager can
    /// be used again.  A no-op when nothing was initialized.
    pub async fn shutdown(&self) {
        let mut slot = self.pool.lock().await;
        if let Some(pool) = slot.take() {
            info!("closing shared Postgres connection pool");
            pool.close().await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
