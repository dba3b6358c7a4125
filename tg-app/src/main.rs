//! toolgate: evaluate, confirm and run tool calls from the command line.

mod commands;
mod config;
mod prompt;
mod settings;

use clap::{Parser, Subcommand};
use config::ToolgateConfig;
use std::path::PathBuf;
use tg_orchestrator::PermissionMode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "toolgate", version, about = "Tool-use permission and execution gate")]
struct Cli {
    /// Config file (default: ~/.toolgate/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured permission mode.
    #[arg(long, global = true)]
    mode: Option<PermissionMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print loaded permission rules grouped by settings scope.
    Rules,
    /// Print the permission decision for a tool call as JSON.
    Check { tool: String, input: String },
    /// Evaluate, confirm and execute a tool call; print the turn outcome as JSON.
    Run { tool: String, input: String },
    /// POST a JSON request to a model endpoint with retry and backoff.
    Send {
        endpoint: String,
        request: PathBuf,
        /// Extra request header as NAME:VALUE; repeatable.
        #[arg(long = "header")]
        headers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let mut config = ToolgateConfig::load(cli.config).await?;
    if let Some(mode) = cli.mode {
        config.permissions.mode = mode;
    }

    match cli.command {
        Command::Rules => commands::rules(),
        Command::Check { tool, input } => commands::check(&config, &tool, &input),
        Command::Run { tool, input } => commands::run(&config, &tool, &input).await,
        Command::Send {
            endpoint,
            request,
            headers,
        } => commands::send(&config, &endpoint, &headers, &request).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,toolgate=debug,tg_orchestrator=debug,tg_tools=debug,tg_llm=debug",
        ),
    };
    let log_format = std::env::var("TOOLGATE_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    match log_format.as_str() {
        "json" => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        "pretty" => builder.pretty().init(),
        "compact" => builder.compact().init(),
        other => {
            return Err(anyhow::anyhow!(
                "unsupported TOOLGATE_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
