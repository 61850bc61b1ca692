// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The odometer registry fans every token event to the in-memory layer and
//! (when a database is configured) buffers it for the durable layer.
//!
//! Built once at startup and threaded explicitly.  Shutdown flushing is
//! driven by the runtime's shutdown path; the binary's signal handler calls
//! the same idempotent `flush`, so a Ctrl-C loses nothing that was already
//! buffered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use tracing::warn;

use super::event::TokenEvent;
use super::memory::Odometer;
use super::postgres::PersistentOdometer;
use crate::db::DbManager;

pub struct OdometerRegistry {
    session: Mutex<Odometer>,
    durable: Option<PersistentOdometer>,
    /// Events recorded since the last flush; drained on flush.
    pending: Mutex<Vec<TokenEvent>>,
    shutdown_done: AtomicBool,
}

impl OdometerRegistry {
    /// Memory-only registry (no database configured).
    pub fn in_memory() -> Self {
        Self {
            session: Mutex::new(Odometer::new()),
            durable: None,
            pending: Mutex::new(Vec::new()),
            shutdown_done: AtomicBool::new(false),
        }
    }

    /// Registry with a durable layer behind the shared pool manager.
    pub fn with_database(db: Arc<DbManager>) -> Self {
        Self {
            session: Mutex::new(Odometer::new()),
            durable: Some(PersistentOdometer::new(db)),
            pending: Mutex::new(Vec::new()),
            shutdown_done: AtomicBool::new(false),
        }
    }

    /// Main entry point for events emitted by the middleware.
    pub fn record(&self, event: TokenEvent) {
        if self.durable.is_some() {
            self.pending.lock().unwrap().push(event.clone());
        }
        self.session.lock().unwrap().record(event);
    }

    /// Run `f` against the session aggregates.
    pub fn with_session<T>(&self, f: impl FnOnce(&Odometer) -> T) -> T {
        f(&self.session.lock().unwrap())
    }

    /// Number of events awaiting a durable flush.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// The durable reporting layer, when configured.
    pub fn durable(&self) -> Option<&PersistentOdometer> {
        self.durable.as_ref()
    }

    /// Write buffered events to the durable layer.
    ///
    /// A failed flush re-buffers the drained events so a later flush can
    /// retry; the failure itself is logged, never propagated — telemetry
    /// must not break the pipeline.
    pub async fn flush(&self) {
        let Some(durable) = &self.durable else { return };
        let batch: Vec<TokenEvent> = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return;
        }
        if let Err(e) = durable.store_events(&batch).await {
            warn!(error = %e, count = batch.len(), "odometer flush failed; re-buffering");
            let mut pending = self.pending.lock().unwrap();
            let mut restored = batch;
            restored.append(&mut pending);
            *pending = restored;
        }
    }

    /// Final flush on shutdown.  Idempotent: the second and later calls are
    /// no-ops even if events arrived in between (those belong to whoever is
    /// still running after "shutdown", which is a bug upstream).
    pub async fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flush().await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
