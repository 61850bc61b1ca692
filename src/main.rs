// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::collections::HashMap;
use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{CacheCommand, Cli, Command};
use conduit_config::Verbosity;
use conduit_core::{Conduit, ConduitBatch, ConduitOptions, ConduitRuntime, PersistenceMode, Prompt};
use conduit_model::{
    catalog, ConduitError, Conversation, ErrorCategory, GenerationParams,
};
use conduit_storage::GroupBy;

const EXIT_GENERIC: u8 = 1;
const EXIT_INVALID_ARGS: u8 = 2;
const EXIT_PROVIDER: u8 = 3;
const EXIT_PERSISTENCE: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    // Both reqwest and sqlx link rustls; pick one process-wide crypto
    // provider before either opens a connection.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut settings = match conduit_config::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };
    if let Some(level) = &cli.verbosity {
        match Verbosity::parse(level) {
            Some(v) => settings.verbosity = v,
            None => {
                eprintln!("error: unknown verbosity level '{level}'");
                return ExitCode::from(EXIT_INVALID_ARGS);
            }
        }
    }

    let runtime = Arc::new(ConduitRuntime::initialize(settings));

    // Safety net: flush telemetry on Ctrl-C.  The normal path shuts down
    // explicitly below.
    {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                runtime.shutdown().await;
                std::process::exit(130);
            }
        });
    }

    let code = dispatch(cli, &runtime).await;
    runtime.shutdown().await;
    code
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("conduit=warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn dispatch(cli: Cli, runtime: &Arc<ConduitRuntime>) -> ExitCode {
    match cli.command {
        Command::Query {
            prompt,
            model,
            system,
            temperature,
            max_tokens,
            stream,
            cache,
            tools,
            resume,
            overwrite,
            max_history,
            vars,
        } => {
            let prompt_text = match prompt.map(Ok).unwrap_or_else(read_stdin) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::from(EXIT_INVALID_ARGS);
                }
            };

            let mut params = GenerationParams::new(&model);
            params.system = system;
            params.temperature = temperature;
            params.max_tokens = max_tokens;
            params.stream = stream;

            let mut options = ConduitOptions::new(runtime.settings().project_name.clone())
                .with_verbosity(runtime.settings().verbosity);
            if cache {
                match runtime.open_cache() {
                    Ok(c) => options.cache = Some(c),
                    Err(e) => return report(&e),
                }
            }
            if tools {
                options.tool_registry = Some(Arc::new(conduit_tools::builtin_registry()));
            }
            if resume || overwrite {
                match runtime.repository() {
                    Some(repo) => options.repository = Some(repo),
                    None => {
                        eprintln!("error: session persistence requires a configured database");
                        return ExitCode::from(EXIT_PERSISTENCE);
                    }
                }
                if overwrite {
                    options.persistence_mode = PersistenceMode::Overwrite;
                }
                options.max_history = max_history;
            }

            let variables: HashMap<String, String> = vars.into_iter().collect();
            let variables = (!variables.is_empty()).then_some(variables);

            let conduit = Conduit::new(Prompt::new(prompt_text), Arc::clone(runtime));
            match conduit.run(variables.as_ref(), &params, &options).await {
                Ok(conversation) => print_conversation_result(&conversation),
                Err(e) => report(&e),
            }
        }

        Command::Batch { file, model, system, max_concurrent, cache } => {
            let text = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("could not read {}: {e}", path.display())),
                None => read_stdin(),
            };
            let text = match text {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::from(EXIT_INVALID_ARGS);
                }
            };
            let prompts: Vec<String> = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if prompts.is_empty() {
                eprintln!("error: no prompts to run");
                return ExitCode::from(EXIT_INVALID_ARGS);
            }

            let mut params = GenerationParams::new(&model);
            params.system = system;
            let mut options = ConduitOptions::new(runtime.settings().project_name.clone())
                .with_verbosity(runtime.settings().verbosity);
            if cache {
                match runtime.open_cache() {
                    Ok(c) => options.cache = Some(c),
                    Err(e) => return report(&e),
                }
            }

            let batch = ConduitBatch::new(Arc::clone(runtime));
            match batch.run(None, Some(prompts), &params, &options, max_concurrent).await {
                Ok(conversations) => {
                    let mut failed = 0usize;
                    for (i, conversation) in conversations.iter().enumerate() {
                        match &conversation.failure {
                            Some(f) => {
                                failed += 1;
                                println!("[{i}] FAILED {}: {}", f.code, f.message);
                            }
                            None => println!(
                                "[{i}] {}",
                                conversation.last().map(|m| m.text()).unwrap_or_default()
                            ),
                        }
                    }
                    if failed > 0 {
                        eprintln!("{failed} of {} runs failed", conversations.len());
                        ExitCode::from(EXIT_PROVIDER)
                    } else {
                        ExitCode::SUCCESS
                    }
                }
                Err(e) => report(&e),
            }
        }

        Command::Models { provider } => {
            for entry in catalog::static_catalog() {
                if let Some(p) = &provider {
                    if &entry.provider != p {
                        continue;
                    }
                }
                println!(
                    "{:<28} {:<12} ctx={:<9} out={:<7} {}",
                    entry.id,
                    entry.provider,
                    entry.context_window,
                    entry.max_output_tokens,
                    entry.description,
                );
            }
            ExitCode::SUCCESS
        }

        Command::Usage { group_by } => {
            // Session layer first (always available).
            print!("{}", runtime.odometer().with_session(|o| o.stats()));

            let Some(durable) = runtime.odometer().durable() else {
                eprintln!("(no database configured; durable usage unavailable)");
                return ExitCode::SUCCESS;
            };
            match group_by.as_deref() {
                None => match durable.get_overall_stats().await {
                    Ok(stats) => {
                        println!(
                            "all-time: {} requests, {} in / {} out / {} total tokens, {} providers, {} models",
                            stats.requests,
                            stats.input,
                            stats.output,
                            stats.total_tokens,
                            stats.providers,
                            stats.models,
                        );
                        ExitCode::SUCCESS
                    }
                    Err(e) => report(&e),
                },
                Some(key) => {
                    let group = match key {
                        "provider" => GroupBy::Provider,
                        "model" => GroupBy::Model,
                        "host" => GroupBy::Host,
                        "date" => GroupBy::Date,
                        other => {
                            eprintln!("error: unknown group '{other}'");
                            return ExitCode::from(EXIT_INVALID_ARGS);
                        }
                    };
                    match durable.get_aggregates(group, None, None).await {
                        Ok(rows) => {
                            for (key, totals) in rows {
                                println!(
                                    "{key:<32} {:>12} {:>12} {:>12}",
                                    totals.input, totals.output, totals.total,
                                );
                            }
                            ExitCode::SUCCESS
                        }
                        Err(e) => report(&e),
                    }
                }
            }
        }

        Command::Cache { command } => {
            let cache = match runtime.open_cache() {
                Ok(c) => c,
                Err(e) => return report(&e),
            };
            match command {
                CacheCommand::Stats => {
                    let stats = cache.stats();
                    println!(
                        "{} entries, {} bytes, {}",
                        stats.total_entries,
                        stats.total_size_bytes,
                        stats.path.display(),
                    );
                }
                CacheCommand::Keys => {
                    for key in cache.retrieve_all_keys() {
                        println!("{key}");
                    }
                }
                CacheCommand::Clear => {
                    cache.clear();
                    println!("cache cleared");
                }
                CacheCommand::Cleanup { days } => {
                    let removed = cache.cleanup_older_than(days);
                    println!("removed {removed} entries older than {days} days");
                }
            }
            ExitCode::SUCCESS
        }
    }
}

fn read_stdin() -> Result<String, String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("could not read stdin: {e}"))?;
    Ok(buf.trim().to_string())
}

/// Print the final assistant turn to stdout, or the recorded failure.
fn print_conversation_result(conversation: &Conversation) -> ExitCode {
    if let Some(failure) = &conversation.failure {
        eprintln!("error: [{}] {}: {}", failure.category.as_str(), failure.code, failure.message);
        return match failure.category {
            ErrorCategory::Client => ExitCode::from(EXIT_INVALID_ARGS),
            ErrorCategory::Server | ErrorCategory::Network => ExitCode::from(EXIT_PROVIDER),
            ErrorCategory::Parsing => ExitCode::from(EXIT_GENERIC),
        };
    }
    match conversation.last() {
        Some(message) => {
            println!("{}", message.text());
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("error: empty conversation");
            ExitCode::from(EXIT_GENERIC)
        }
    }
}

/// Map a pipeline error to stderr output and an exit code.
fn report(error: &ConduitError) -> ExitCode {
    eprintln!("error: {error}");
    let code = match error.info.category {
        ErrorCategory::Client => EXIT_INVALID_ARGS,
        ErrorCategory::Server => EXIT_PROVIDER,
        ErrorCategory::Network => {
            if error.info.message.contains("repository") || error.info.message.contains("Postgres")
            {
                EXIT_PERSISTENCE
            } else {
                EXIT_PROVIDER
            }
        }
        ErrorCategory::Parsing => EXIT_GENERIC,
    };
    ExitCode::from(code)
}
