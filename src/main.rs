//! Assistant Orchestrator - command line
//!
//! Classifies shell commands the way tool calls are classified, and replays
//! chat scenarios against the in-memory backend.

use anyhow::{Context, Result};
use assistant_orchestrator::chat::safety::{classify_call, is_safe_tool, Sensitivity};
use assistant_orchestrator::chat::ToolCall;
use assistant_orchestrator::replay::{run_scenario, Scenario};
use assistant_orchestrator::Config;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "assistant-orchestrator")]
#[command(about = "Terminal assistant chat orchestration tools")]
struct Cli {
    /// YAML config file (defaults to ./config.yaml when present)
    #[arg(short, long, env = "ASSISTANT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the safety verdict for a command
    Classify {
        /// Tool the command would be run with
        #[arg(short, long, default_value = "run_in_terminal")]
        tool: String,

        /// Shell command, joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run a YAML scenario and print the resulting state as JSON
    Replay {
        /// Scenario file
        path: PathBuf,
    },
}

#[derive(Serialize)]
struct Verdict<'a> {
    tool: &'a str,
    command: &'a str,
    /// Runs without confirmation
    auto_execute: bool,
    sensitivity: Sensitivity,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    // Initialize tracing; stdout is reserved for results
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_filter.as_str().into());
    let plain = (!config.log_json)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let json = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();

    match cli.command {
        Commands::Classify { tool, command } => run_classify(&tool, &command.join(" ")),
        Commands::Replay { path } => run_replay(config, &path).await,
    }
}

fn run_classify(tool: &str, command: &str) -> Result<()> {
    let call = ToolCall::new(
        "cli",
        tool,
        serde_json::json!({ "command": command }).to_string(),
    );
    let sensitivity = classify_call(&call);
    let verdict = Verdict {
        tool,
        command,
        auto_execute: is_safe_tool(tool),
        sensitivity,
    };
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

async fn run_replay(config: Config, path: &std::path::Path) -> Result<()> {
    tracing::info!("Replaying scenario: {}", path.display());

    let scenario = Scenario::from_path(path)?;
    let report = run_scenario(&scenario, config.chat)
        .await
        .context("Scenario failed")?;

    tracing::info!(
        "Replay complete: {} sessions, {} backend calls, {} errors",
        report.sessions.len(),
        report.backend_calls.len(),
        report.errors.len()
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
