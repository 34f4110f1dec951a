//! Carnet CLI binary entry point.

use std::io::Write;
use std::sync::Arc;

use carnet::cli::{ChatArgs, Cli, Commands, OutputFormat};
use carnet::config::CarnetConfig;
use carnet::error::CarnetError;
use carnet::orchestrator::{StreamEvent, StreamOrchestrator, StreamRequest};
use carnet::provider::OpenAiCompatibleBackend;
use carnet::tools::{ToolParameters, ToolRegistry, ToolSpec};
use carnet::types::Message;
use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Chat(args) => handle_chat(cli.config, args).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the session ended with `done`.
async fn handle_chat(
    config_path: Option<std::path::PathBuf>,
    args: ChatArgs,
) -> Result<bool, CarnetError> {
    let mut config = CarnetConfig::load(config_path.as_deref())?;
    if let Some(model) = args.model {
        config.backend.model = model;
    }
    if let Some(base_url) = args.base_url {
        config.backend.base_url = base_url;
    }
    if let Some(max_rounds) = args.max_rounds {
        config.orchestrator.max_rounds = max_rounds;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.orchestrator.timeout_ms = timeout_ms;
    }

    let registry = args
        .external_tools
        .iter()
        .fold(
            ToolRegistry::builder().tool(carnet::tools::builtin::current_datetime_tool()),
            |builder, name| {
                builder.external_tool(ToolSpec::new(
                    name.as_str(),
                    "Executed by the model backend",
                    ToolParameters::empty(),
                ))
            },
        )
        .build();
    let registry = Arc::new(registry);

    let mut conversation = Vec::new();
    if let Some(system) = args.system {
        conversation.push(Message::system(system));
    }
    conversation.push(Message::user(args.prompt));

    let backend = Arc::new(OpenAiCompatibleBackend::new(config.backend));
    let orchestrator = StreamOrchestrator::new(backend, registry.clone(), config.orchestrator);
    let mut events = orchestrator.stream(StreamRequest::from_registry(conversation, &registry));

    let mut succeeded = false;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        if let StreamEvent::Done { .. } = event {
            succeeded = true;
        }
        match args.format {
            OutputFormat::Sse => stdout.write_all(event.to_sse()?.as_bytes())?,
            OutputFormat::Ndjson => stdout.write_all(event.to_ndjson()?.as_bytes())?,
            OutputFormat::Text => render_text(&event),
        }
        stdout.flush()?;
    }
    if args.format == OutputFormat::Text {
        println!();
    }
    Ok(succeeded)
}

fn render_text(event: &StreamEvent) {
    match event {
        StreamEvent::Delta {
            content: Some(text),
            ..
        } => print!("{text}"),
        StreamEvent::ToolExecution {
            tool_count,
            external_tools,
        } => {
            eprintln!("\n⚡ {tool_count} tool call(s)");
            for name in external_tools {
                eprintln!("  ↪ {name} (external)");
            }
        }
        StreamEvent::ToolResult {
            tool_name,
            success,
            result,
            ..
        } => {
            let truncated = truncate(result, 200);
            if *success {
                eprintln!("  ✅ {tool_name}: {truncated}");
            } else {
                eprintln!("  ❌ {tool_name}: {truncated}");
            }
        }
        StreamEvent::AssistantRoundComplete {
            content,
            forced: Some(true),
            ..
        } => print!("{content}"),
        StreamEvent::Error { error } => eprintln!("\n❌ {error}"),
        _ => {}
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
