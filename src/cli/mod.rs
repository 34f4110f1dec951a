//! CLI entry point for Carnet.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Carnet CLI
#[derive(Parser, Debug)]
#[command(name = "carnet", version, about = "Carnet — streaming tool-call orchestrator")]
pub struct Cli {
    /// Path to a carnet.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one orchestrated chat session
    Chat(ChatArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// User prompt
    pub prompt: String,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Model name sent to the backend
    #[arg(short, long)]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API (e.g. http://localhost:11434/v1)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Tool rounds before the forced final answer
    #[arg(long)]
    pub max_rounds: Option<usize>,

    /// Wall-clock budget for the whole session, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Tool the backend executes natively (repeatable)
    #[arg(long = "external-tool")]
    pub external_tools: Vec<String>,

    /// Output framing
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// How events are written to stdout.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Assistant text on stdout, tool activity on stderr
    Text,
    /// `data: <json>` lines
    Sse,
    /// One JSON object per line
    Ndjson,
}
