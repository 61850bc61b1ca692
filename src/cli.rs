// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-provider LLM orchestration runtime.
///
/// Exit codes: 0 success, 1 generic failure, 2 invalid arguments,
/// 3 provider error, 4 persistence error.
#[derive(Debug, Parser)]
#[command(name = "conduit", version, about)]
pub struct Cli {
    /// Explicit config file (otherwise standard locations are searched)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity: silent | progress | summary | detailed | complete | debug
    #[arg(long, short = 'v', global = true)]
    pub verbosity: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one prompt through a model (reads stdin when PROMPT is omitted)
    Query {
        /// The prompt text
        prompt: Option<String>,

        /// Model to use
        #[arg(long, short = 'm', default_value = "gpt-4o-mini")]
        model: String,

        /// System prompt
        #[arg(long, short = 's')]
        system: Option<String>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,

        /// Maximum output tokens
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Stream the response and stop at the first embedded tool call
        #[arg(long)]
        stream: bool,

        /// Enable the response cache
        #[arg(long)]
        cache: bool,

        /// Enable the built-in filesystem tools
        #[arg(long)]
        tools: bool,

        /// Resume the project's stored session (requires a database)
        #[arg(long)]
        resume: bool,

        /// Start the stored session over instead of resuming
        #[arg(long, conflicts_with = "resume")]
        overwrite: bool,

        /// Keep only the most recent N messages when resuming
        #[arg(long)]
        max_history: Option<usize>,

        /// Template variables, repeatable: --var name=value
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },

    /// Run many prompts concurrently, one per line of FILE (or stdin)
    Batch {
        /// File with one prompt per line; stdin when omitted
        file: Option<PathBuf>,

        #[arg(long, short = 'm', default_value = "gpt-4o-mini")]
        model: String,

        #[arg(long, short = 's')]
        system: Option<String>,

        /// Maximum concurrent requests (unbounded when omitted)
        #[arg(long)]
        max_concurrent: Option<usize>,

        #[arg(long)]
        cache: bool,
    },

    /// List the model catalog
    Models {
        /// Restrict to one provider
        #[arg(long)]
        provider: Option<String>,
    },

    /// Token usage reports
    Usage {
        /// Group durable usage by: provider | model | host | date
        #[arg(long)]
        group_by: Option<String>,
    },

    /// Response cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Entry count, total size, and path
    Stats,
    /// List all cache keys, newest first
    Keys,
    /// Delete every entry
    Clear,
    /// Delete entries older than the given number of days
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    Ok((key.to_string(), value.to_string()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
