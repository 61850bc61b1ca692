// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Content-addressed SQLite cache of Request → Response.
//!
//! The cache is advisory: a miss (or any read error) yields `None`, and a
//! failed write is logged and swallowed.  Nothing in the pipeline may fail
//! because the cache is broken.  Single-key writes are transactional;
//! concurrent readers and writers are safe behind the connection lock.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, warn};

use conduit_model::{ConduitError, ErrorCategory, GenerationRequest, GenerationResponse};

/// Summary returned by [`ConduitCache::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: u64,
    pub total_size_bytes: u64,
    pub path: PathBuf,
}

pub struct ConduitCache {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl ConduitCache {
    /// Open (or create) the cache at `path`.  Parent directories are created
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConduitError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConduitError::simple(
                    "cache_open_error",
                    format!("could not create {}: {e}", parent.display()),
                    ErrorCategory::Client,
                )
            })?;
        }
        let conn = Connection::open(&path).map_err(|e| {
            ConduitError::simple(
                "cache_open_error",
                format!("could not open {}: {e}", path.display()),
                ErrorCategory::Client,
            )
        })?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                cache_key     TEXT PRIMARY KEY,
                response_data TEXT NOT NULL,
                created_at    TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .map_err(|e| {
            ConduitError::simple("cache_open_error", e.to_string(), ErrorCategory::Client)
        })?;
        Ok(Self { conn: Mutex::new(conn), path })
    }

    /// In-memory cache for tests.
    pub fn in_memory() -> Result<Self, ConduitError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            ConduitError::simple("cache_open_error", e.to_string(), ErrorCategory::Client)
        })?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                cache_key     TEXT PRIMARY KEY,
                response_data TEXT NOT NULL,
                created_at    TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .map_err(|e| {
            ConduitError::simple("cache_open_error", e.to_string(), ErrorCategory::Client)
        })?;
        Ok(Self { conn: Mutex::new(conn), path: PathBuf::from(":memory:") })
    }

    /// Look a response up by raw key.  Never errors.
    pub fn get(&self, cache_key: &str) -> Option<GenerationResponse> {
        let conn = self.conn.lock().unwrap();
        let row: Result<String, _> = conn.query_row(
            "SELECT response_data FROM cache WHERE cache_key = ?1",
            [cache_key],
            |row| row.get(0),
        );
        match row {
            Ok(data) => match serde_json::from_str::<GenerationResponse>(&data) {
                Ok(response) => Some(response),
                Err(e) => {
                    // A corrupt entry behaves as a miss.
                    warn!(key = cache_key, error = %e, "dropping undecodable cache entry");
                    let _ = conn.execute("DELETE FROM cache WHERE cache_key = ?1", [cache_key]);
                    None
                }
            },
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                warn!(key = cache_key, error = %e, "cache read failed");
                None
            }
        }
    }

    /// Store a response by raw key.  Write errors are logged and swallowed.
    pub fn set(&self, cache_key: &str, response: &GenerationResponse) {
        let data = match serde_json::to_string(response) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "response not serializable; skipping cache write");
                return;
            }
        };
        let conn = self.conn.lock().unwrap();
        if let Err(e) = conn.execute(
            "INSERT OR REPLACE INTO cache (cache_key, response_data) VALUES (?1, ?2)",
            rusqlite::params![cache_key, data],
        ) {
            warn!(key = cache_key, error = %e, "cache write failed");
        }
    }

    /// Probe with a request's content hash.
    pub fn check(&self, request: &GenerationRequest) -> Option<GenerationResponse> {
        self.get(&request.cache_key())
    }

    /// Store a response under its request's content hash.
    pub fn store(&self, request: &GenerationRequest, response: &GenerationResponse) {
        self.set(&request.cache_key(), response);
    }

    pub fn delete(&self, cache_key: &str) {
        let conn = self.conn.lock().unwrap();
        if let Err(e) = conn.execute("DELETE FROM cache WHERE cache_key = ?1", [cache_key]) {
            warn!(key = cache_key, error = %e, "cache delete failed");
        }
    }

    pub fn clear(&self) {
        let conn = self.conn.lock().unwrap();
        if let Err(e) = conn.execute("DELETE FROM cache", []) {
            warn!(error = %e, "cache clear failed");
        }
    }

    /// All keys, newest first.
    pub fn retrieve_all_keys(&self) -> Vec<String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare("SELECT cache_key FROM cache ORDER BY created_at DESC") {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cache key listing failed");
                return Vec::new();
            }
        };
        stmt.query_map([], |row| row.get::<_, String>(0))
            .map(|rows| rows.filter_map(Result::ok).collect())
            .unwrap_or_default()
    }

    /// Drop entries older than `days`.  Returns the number removed.
    pub fn cleanup_older_than(&self, days: u32) -> u64 {
        let conn = self.conn.lock().unwrap();
        match conn.execute(
            "DELETE FROM cache WHERE created_at < datetime('now', ?1)",
            [format!("-{days} days")],
        ) {
            Ok(n) => {
                debug!(removed = n, days, "cache cleanup");
                n as u64
            }
            Err(e) => {
                warn!(error = %e, "cache cleanup failed");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let conn = self.conn.lock().unwrap();
        let total_entries: u64 = conn
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))
            .unwrap_or(0);
        let total_size_bytes: u64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(response_data)), 0) FROM cache",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        CacheStats { total_entries, total_size_bytes, path: self.path.clone() }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
