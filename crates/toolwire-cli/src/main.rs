use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use toolwire_core::config::{ConfigLoader, ToolwireConfig};
use toolwire_core::{
    detect_mode, extract, Agent, AgentConfig, Capability, CapabilityRegistry, HttpTransport,
    LogEventSink, RawResponse, ToolExecutor, ToolFactory,
};

#[derive(Parser, Debug)]
#[clap(
    name = "toolwire",
    author,
    version = "0.1.0",
    about = "Normalize tool calls across LLM providers and run the agent loop"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, global = true, default_value = "toolwire.yaml")]
    config: PathBuf,

    #[clap(long, short, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one task through the agent loop and print the final answer
    Run {
        #[clap(long, help = "Task to hand to the model")]
        task: String,
    },
    /// Show the tool-calling mode and limits a model identifier resolves to
    Resolve {
        model: String,
    },
    /// Run the extractor on a saved raw response and print the result as JSON
    Extract {
        #[clap(
            long,
            help = "Model identifier used to pick the extractor; guessed from the response when omitted"
        )]
        model: Option<String>,

        #[clap(long, help = "File holding the raw response (JSON body or plain text)")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    match cli.command {
        Commands::Run { task } => run_task(&cli.config, task).await,
        Commands::Resolve { model } => {
            let registry = load_registry(&cli.config).await?;
            let capability = registry.resolve(&model)?;
            let mut report = serde_json::to_value(capability)?;
            if let Value::Object(map) = &mut report {
                map.insert("model".to_string(), json!(model));
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Extract { model, file } => {
            extract_file(&cli.config, model.as_deref(), &file).await
        }
    }
}

async fn run_task(config_path: &Path, task: String) -> Result<()> {
    log::info!("Loading configuration from file: {}", config_path.display());
    let config = ConfigLoader::from_file(config_path).await?;

    let registry = config.capabilities.to_registry();
    let capability = registry.resolve(&config.transport.model)?;
    log::info!(
        "Model '{}' uses tool-calling mode {}",
        config.transport.model,
        capability.mode
    );

    let transport = HttpTransport::new(config.transport.clone(), capability.mode)?;
    let tools = ToolFactory::create_default_registry();

    let cancellation = CancellationToken::new();
    let mut agent = Agent::with_capability(
        Arc::new(transport),
        Arc::new(tools),
        capability,
        AgentConfig::from(&config.agent),
    )?
    .with_event_sink(Arc::new(LogEventSink))
    .with_cancellation(cancellation.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling after the current step");
            cancellation.cancel();
        }
    });

    let result = agent.run_turn(&task).await;
    let stats = agent.memory().stats();
    log::info!(
        "History: {} message(s), {} tool call(s), {} tool result(s) ({} failed)",
        stats.message_count,
        stats.tool_calls,
        stats.tool_results,
        stats.failed_tool_results
    );

    match result {
        Ok(answer) => {
            log::info!("Task finished after {} round-trip(s)", answer.turns);
            println!("{}", answer.text);
            Ok(())
        }
        Err(aborted) => {
            if !aborted.recent_fingerprints.is_empty() {
                eprintln!("Recent calls: {}", aborted.recent_fingerprints.join(", "));
            }
            Err(aborted.into())
        }
    }
}

async fn extract_file(config_path: &Path, model: Option<&str>, file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read raw response from {}", file.display()))?;
    let body = serde_json::from_str::<Value>(&content).unwrap_or(Value::String(content));

    let capability = match model {
        Some(model) => load_registry(config_path).await?.resolve(model)?,
        None => {
            let mode = detect_mode(&body);
            log::info!("No model given, response looks like {}", mode);
            Capability::new(mode)
        }
    };
    let raw = RawResponse::new(capability.mode, body);

    let tools = ToolFactory::create_default_registry().tool_specs();
    let extraction = extract(capability.mode, &raw, &tools, &capability.limits);

    let report = json!({
        "model": model,
        "mode": capability.mode,
        "extraction": extraction,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// The configured capability table, or the built-in one when no config file exists.
async fn load_registry(config_path: &Path) -> Result<CapabilityRegistry> {
    if !config_path.exists() {
        log::info!(
            "No config at {}, using built-in capability table",
            config_path.display()
        );
        return Ok(CapabilityRegistry::with_builtin_defaults());
    }
    let config: ToolwireConfig = ConfigLoader::from_file(config_path).await?;
    Ok(config.capabilities.to_registry())
}
