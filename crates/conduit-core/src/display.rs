// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Verbosity-gated progress display.
//!
//! Plain mode writes to stderr so piped stdout is never corrupted.  One
//! spinner runs per in-flight request (nested tool-execution requests each
//! get their own), keyed on the model name and a preview of the query.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use conduit_config::Verbosity;
use conduit_model::ConduitError;

const SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];
const FRAME_INTERVAL: Duration = Duration::from_millis(120);
const PREVIEW_CHARS: usize = 40;

/// Where display output goes.  Stderr in production; a buffer in tests.
#[derive(Clone)]
pub enum Console {
    Stderr,
    Null,
    Buffer(Arc<Mutex<String>>),
}

impl Console {
    pub fn buffer() -> (Self, Arc<Mutex<String>>) {
        let buf = Arc::new(Mutex::new(String::new()));
        (Self::Buffer(Arc::clone(&buf)), buf)
    }

    fn write(&self, text: &str) {
        match self {
            Self::Stderr => eprint!("{text}"),
            Self::Null => {}
            Self::Buffer(buf) => buf.lock().unwrap().push_str(text),
        }
    }

    fn writeln(&self, text: &str) {
        self.write(text);
        self.write("\n");
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::Stderr
    }
}

/// Compress a query to a one-line preview.
pub fn query_preview(query: &str) -> String {
    let flat: String = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}

/// A running spinner.  Stop it with [`complete`](ProgressHandle::complete) or
/// [`fail`](ProgressHandle::fail); dropping it silently stops the frames.
pub struct ProgressHandle {
    stop: Option<oneshot::Sender<()>>,
    console: Console,
    verbosity: Verbosity,
    label: String,
    started: Instant,
}

impl ProgressHandle {
    /// Start a spinner for `(model, preview)`.  Below `Progress` verbosity
    /// this is inert.
    pub fn start(console: Console, verbosity: Verbosity, model: &str, preview: &str) -> Self {
        let label = format!("{model} · {}", query_preview(preview));
        let stop = if verbosity.shows_progress() {
            let (tx, mut rx) = oneshot::channel::<()>();
            let spinner_console = console.clone();
            let spinner_label = label.clone();
            tokio::spawn(async move {
                let mut frame = 0usize;
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut rx => break,
                        _ = tokio::time::sleep(FRAME_INTERVAL) => {
                            spinner_console.write(&format!(
                                "\r{} {}",
                                SPINNER_FRAMES[frame % SPINNER_FRAMES.len()],
                                spinner_label,
                            ));
                            frame += 1;
                        }
                    }
                }
            });
            Some(tx)
        } else {
            None
        };
        Self { stop, console, verbosity, label, started: Instant::now() }
    }

    fn stop_spinner(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
            // Clear the spinner line before the final status is printed.
            self.console.write("\r");
        }
    }

    /// Stop with a "complete" marker.
    pub fn complete(mut self) {
        self.stop_spinner();
        if self.verbosity.shows_progress() {
            let secs = self.started.elapsed().as_secs_f32();
            self.console
                .writeln(&format!("done {} ({secs:.1}s)", self.label));
        }
    }

    /// Stop with a "served from cache" marker.
    pub fn cached(mut self) {
        self.stop_spinner();
        if self.verbosity.shows_progress() {
            self.console.writeln(&format!("cached {}", self.label));
        }
    }

    /// Stop with a one-line failure marker; richer error output is gated on
    /// higher verbosity.
    pub fn fail(mut self, error: &ConduitError) {
        self.stop_spinner();
        if self.verbosity.shows_progress() {
            self.console.writeln(&format!(
                "failed {} [{}: {}]",
                self.label, error.info.code, error.info.message,
            ));
        }
        if self.verbosity.shows_summary() {
            self.console.writeln(&error_panel(error, self.verbosity));
        }
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

/// Multi-line error report.  Debug verbosity includes the serialized error
/// with raw provider payloads.
pub fn error_panel(error: &ConduitError, verbosity: Verbosity) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "-- error ----------------------------------------\n\
         code:     {}\n\
         category: {}\n\
         message:  {}\n",
        error.info.code,
        error.info.category.as_str(),
        error.info.message,
    ));
    if verbosity >= Verbosity::Debug {
        if let Ok(full) = serde_json::to_string_pretty(error) {
            out.push_str("detail:\n");
            out.push_str(&full);
            out.push('\n');
        }
    }
    out.push_str("-------------------------------------------------");
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
