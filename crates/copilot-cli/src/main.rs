//! Operator CLI for the copilot ensemble runtime.
//!
//! Wires the runtime to an OpenAI-compatible reasoning endpoint and a dry-run
//! tool executor: held drafts can be confirmed, but nothing external runs.
//!
//! # Usage
//!
//! ```bash
//! # One turn
//! copilot invoke --input "Plan the Q3 roadmap" --autonomy assisted
//!
//! # Interactive session (:confirm <draft>, :reject <draft>, :quit)
//! copilot chat
//!
//! # What may run under a mode
//! copilot capabilities --autonomy full_auto
//!
//! # Custom endpoint
//! COPILOT_REASONING_URL=http://router:8000/v1/chat/completions copilot health
//! ```

mod config;
mod executor;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use copilot::{
    AutonomyMode, CopilotError, CopilotEvent, CopilotRuntime, HealthStatus,
    HttpReasoningService, InvokeRequest, InvokeResponse, PolicyEngine, ToolCallOutcome,
    ToolCatalogue,
};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use config::CliConfig;
use executor::DryRunToolExecutor;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with optional [reasoning] and [ensemble] tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single turn and print the response
    Invoke {
        #[arg(long)]
        input: String,
        /// Autonomy mode (manual, assisted, supervised_auto, full_auto)
        #[arg(long)]
        autonomy: Option<String>,
        /// Print the full response as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Line-oriented session on stdin
    Chat {
        #[arg(long)]
        autonomy: Option<String>,
    },
    /// Print which tools are allowed, held or denied under a mode
    Capabilities {
        #[arg(long, default_value = "manual")]
        autonomy: String,
    },
    /// Check the memory store and reasoning endpoint
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = CliConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Capabilities { autonomy } => {
            let mode = parse_mode(&autonomy)?;
            let engine = PolicyEngine::new(Arc::new(ToolCatalogue::builtin()));
            let capabilities = engine.describe_autonomy_capabilities(mode);
            println!("{}", serde_json::to_string_pretty(&capabilities)?);
        }
        Command::Health => {
            let runtime = build_runtime(&config)?;
            let health = runtime.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
            if health.status == HealthStatus::Unhealthy {
                bail!("copilot is unhealthy");
            }
        }
        Command::Invoke {
            input,
            autonomy,
            json,
        } => {
            let runtime = build_runtime(&config)?;
            let mut request = InvokeRequest::new(input);
            if let Some(tag) = autonomy {
                request = request.with_autonomy(tag);
            }
            let response = runtime.invoke(request).await.map_err(describe)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                render(&response);
            }
        }
        Command::Chat { autonomy } => {
            let runtime = build_runtime(&config)?;
            let mode = match autonomy {
                Some(tag) => parse_mode(&tag)?,
                None => config.default_autonomy,
            };
            chat(&runtime, mode).await?;
        }
    }

    Ok(())
}

fn build_runtime(config: &CliConfig) -> Result<CopilotRuntime> {
    info!(
        reasoning = %config.reasoning.url,
        model = %config.reasoning.model,
        default_autonomy = %config.default_autonomy,
        config_file = ?config.source,
        "Starting copilot runtime"
    );
    let reasoning = HttpReasoningService::new(config.reasoning.clone())
        .context("Failed to create reasoning client")?;
    let runtime = CopilotRuntime::builder(Arc::new(reasoning), Arc::new(DryRunToolExecutor))
        .config(config.ensemble.clone())
        .default_autonomy(config.default_autonomy)
        .build()?;
    Ok(runtime)
}

fn parse_mode(tag: &str) -> Result<AutonomyMode> {
    tag.parse::<AutonomyMode>()
        .with_context(|| format!("Invalid --autonomy '{tag}'"))
}

fn describe(err: CopilotError) -> anyhow::Error {
    anyhow::anyhow!(
        "{err} [{}] ({})",
        err.code(),
        err.kind().suggested_action()
    )
}

async fn chat(runtime: &CopilotRuntime, mode: AutonomyMode) -> Result<()> {
    let session_id = runtime.create_session(mode).await;
    runtime
        .set_session_metadata(&session_id, "client", "copilot-cli")
        .await
        .map_err(describe)?;
    println!(
        "Session {session_id} ({mode}). \
         Commands: :confirm <draft>, :reject <draft>, :autonomy <mode>, :quit"
    );

    let mut notices =
        runtime.subscribe_session(&session_id, &["drafts_expired", "autonomy_changed"]);
    let notifier = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(CopilotEvent::DraftsExpired { draft_ids, .. }) => {
                    println!("  [expired] {}", draft_ids.join(", "));
                }
                Ok(CopilotEvent::AutonomyChanged { from, to, .. }) => {
                    println!("  [autonomy] {from} -> {to}");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Notice stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, argument) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };
        match command {
            ":quit" | ":q" => break,
            ":confirm" => match runtime.confirm_draft(&session_id, argument).await {
                Ok(record) => println!("{}", record.summary()),
                Err(e) => eprintln!("{}", describe(e)),
            },
            ":reject" => match runtime.reject_draft(&session_id, argument).await {
                Ok(draft) => println!("Draft {} {}", draft.id, draft.status),
                Err(e) => eprintln!("{}", describe(e)),
            },
            ":autonomy" => match parse_mode(argument) {
                Ok(mode) => match runtime.set_autonomy_mode(&session_id, mode).await {
                    Ok(None) => println!("Autonomy already {mode}"),
                    Ok(Some(_)) => {}
                    Err(e) => eprintln!("{}", describe(e)),
                },
                Err(e) => eprintln!("{e:#}"),
            },
            _ => {
                let request = InvokeRequest::new(line).with_session(session_id.clone());
                match runtime.invoke(request).await {
                    Ok(response) => render(&response),
                    Err(e) => eprintln!("{}", describe(e)),
                }
            }
        }
    }
    notifier.abort();
    Ok(())
}

fn render(response: &InvokeResponse) {
    println!("\n{}\n", response.text);
    for record in &response.executed {
        let status = match &record.outcome {
            ToolCallOutcome::Executed { success: true, .. } => "ran",
            _ => "failed",
        };
        println!("  [{status}] {} ({})", record.tool_name, record.reason);
    }
    for draft in &response.held {
        println!(
            "  [held] {} draft={} ({})",
            draft.action.tool_name, draft.id, draft.reason
        );
        if let Some(preview) = &draft.preview {
            for line in preview.diff.lines() {
                println!("      {line}");
            }
        }
    }
    for denied in &response.denied {
        println!("  [denied] {} ({})", denied.tool_name, denied.reason);
    }
}
