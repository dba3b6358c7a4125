//! Subcommand implementations.

use crate::config::ToolgateConfig;
use crate::prompt::TerminalConfirmer;
use crate::settings::SettingsRuleSource;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tg_llm::{HttpTransport, RetryPolicy, RetryingClient};
use tg_orchestrator::{
    ConfirmationChoice, Confirmer, FixedConfirmer, Orchestrator, OrchestratorContext, RuleLoader,
    ToolCallRequest,
};
use tg_tools::{BashTool, FsRoot, ProgressNotification, ReadFileTool, WriteFileTool};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn build_orchestrator(
    config: &ToolgateConfig,
    confirmer: Arc<dyn Confirmer>,
) -> anyhow::Result<Orchestrator> {
    let cwd = std::env::current_dir()?;
    let context = Arc::new(OrchestratorContext::from_loader(
        &SettingsRuleSource::discover(&cwd),
    )?);
    let mut builder = Orchestrator::builder(context, confirmer)
        .mode(config.permissions.mode)
        .max_concurrency(config.scheduler.max_concurrency);
    if config.tools.bash {
        builder = builder.tool(Arc::new(BashTool::new(
            Duration::from_secs(config.tools.bash_timeout_secs),
            &config.tools.root_dir,
        )))?;
    }
    if config.tools.filesystem {
        let root = FsRoot::new(&config.tools.root_dir)?;
        builder = builder
            .tool(Arc::new(ReadFileTool::new(root.clone())))?
            .tool(Arc::new(WriteFileTool::new(root)))?;
    }
    Ok(builder.build())
}

fn parse_request(tool: &str, input: &str) -> anyhow::Result<ToolCallRequest> {
    let input: serde_json::Value = serde_json::from_str(input)
        .map_err(|e| anyhow::anyhow!("tool input must be JSON: {e}"))?;
    let id = format!("toolu_{}", uuid::Uuid::new_v4().simple());
    Ok(ToolCallRequest::new(id, tool, input))
}

pub fn rules() -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let source = SettingsRuleSource::discover(&cwd);
    let rules = source.load_rules()?;
    for (scope, path) in source.scopes() {
        println!("{scope}\t{}", path.display());
        for rule in rules.iter().filter(|r| r.source == *scope) {
            println!("  {}\t{}", rule.behavior, rule.to_rule_string());
        }
    }
    Ok(())
}

pub fn check(config: &ToolgateConfig, tool: &str, input: &str) -> anyhow::Result<()> {
    let confirmer = Arc::new(FixedConfirmer(ConfirmationChoice::Deny));
    let orchestrator = build_orchestrator(config, confirmer)?;
    let decision = orchestrator.evaluate(&parse_request(tool, input)?);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

pub async fn run(config: &ToolgateConfig, tool: &str, input: &str) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, Arc::new(TerminalConfirmer::stdin()))?;
    let request = parse_request(tool, input)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; cancelling");
            interrupt.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressNotification>();
    let printer = tokio::spawn(async move {
        while let Some(note) = progress_rx.recv().await {
            eprintln!("[{}] {}", note.tool_call_id, note.message);
        }
    });

    let outcome = orchestrator
        .run_turn_with_progress(vec![request], &cancel, Some(progress_tx))
        .await?;
    let _ = printer.await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub async fn send(
    config: &ToolgateConfig,
    endpoint: &str,
    headers: &[String],
    request: &Path,
) -> anyhow::Result<()> {
    let body = tokio::fs::read_to_string(request)
        .await
        .map_err(|e| anyhow::anyhow!("read request {}: {e}", request.display()))?;
    let body: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| anyhow::anyhow!("parse request {}: {e}", request.display()))?;

    let mut transport = HttpTransport::new(
        endpoint,
        Duration::from_secs(config.model.request_timeout_secs),
    );
    for header in headers {
        let Some((name, value)) = header.split_once(':') else {
            return Err(anyhow::anyhow!("header {header:?} must be NAME:VALUE"));
        };
        transport = transport.with_header(name.trim(), value.trim());
    }
    let client = RetryingClient::new(Arc::new(transport), RetryPolicy::new(config.retry.clone()));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let response = client.send(body, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
