//! WebPilot CLI: run one orchestrated browser task from the terminal.
//!
//! Without an API key the run uses the deterministic rule planner, which is
//! enough to exercise the engine end to end against the demo tool registry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use url::Url;

use agent_core::{Capabilities, ProviderSettings, ReasoningProvider};
use webpilot_cli::llm::OpenAiProvider;
use webpilot_cli::{
    progress_records, FnTool, ToolOutcome, ToolRegistry, WorkflowConfig, WorkflowRunner,
};

#[derive(Debug, Parser)]
#[command(
    name = "webpilot",
    about = "Autonomous browser-task orchestration engine",
    version
)]
struct Args {
    /// Natural-language task to run.
    task: String,

    /// Model identifier for the reasoning provider.
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// API key for the reasoning provider; falls back to the
    /// WEBPILOT_API_KEY environment variable. Without one the run uses the
    /// deterministic rule planner.
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL override for OpenAI-compatible deployments.
    #[arg(long)]
    base_url: Option<String>,

    /// Maximum replanning cycles after a rejected evaluation.
    #[arg(long, default_value_t = 2)]
    max_replans: u32,

    /// Wall-clock budget for the whole run, in seconds.
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Print tool lifecycle events as they happen.
    #[arg(long)]
    events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut settings = ProviderSettings::new(&args.model);
    settings.api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("WEBPILOT_API_KEY").ok());
    settings.base_url = args.base_url.clone();
    let capabilities = Capabilities::from_settings(&settings);

    let provider: Option<Arc<dyn ReasoningProvider>> = if capabilities.llm_planning {
        Some(Arc::new(OpenAiProvider::from_settings(&settings)?))
    } else {
        eprintln!("No API key configured; using the deterministic rule planner.");
        None
    };

    let config = WorkflowConfig::new()
        .replan_cycles(args.max_replans)
        .run_timeout(Duration::from_secs(args.timeout_secs));
    let runner = WorkflowRunner::with_capabilities(
        provider,
        capabilities,
        Arc::new(demo_registry()),
        config,
    );

    let _events = args.events.then(|| {
        runner.broker().subscribe(|event| {
            println!(
                "[{}] {} {:?}{}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.tool_name,
                event.phase,
                event
                    .error
                    .as_deref()
                    .map(|err| format!(" ({err})"))
                    .unwrap_or_default()
            );
            Ok(())
        })
    });

    let (result, state) = runner.run_with_state(&args.task).await;

    println!("\nRun diary:");
    for entry in &state.diary {
        println!("  - {entry}");
    }

    println!("\nTask queue:");
    for record in progress_records(&state) {
        println!("  [{:?}] {}", record.status, record.title);
    }

    println!(
        "\nResult: {} after {} step(s)",
        if result.success { "success" } else { "failed" },
        result.steps
    );
    if let Some(url) = &result.final_url {
        println!("Final URL: {url}");
    }
    if let Some(answer) = &result.final_answer {
        println!("Answer:\n{answer}");
    }
    if let Some(report) = &state.failure_report {
        println!("Recap: {}", report.recap);
        println!("Blame: {}", report.blame);
        println!("Improvement: {}", report.improvement);
    }
    if let Some(error) = &result.error {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
    Ok(())
}

/// Inert stand-ins for the external browser driver, enough to exercise the
/// orchestration engine end to end.
fn demo_registry() -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(
            "navigate",
            FnTool::from_sync(|target| match Url::parse(target) {
                Ok(url) => ToolOutcome::ok(json!({ "url": url.to_string() })),
                Err(err) => ToolOutcome::fail(format!("invalid url '{target}': {err}")),
            }),
        )
        .with_tool("click", FnTool::from_sync(|_| ToolOutcome::ok_empty()))
        .with_tool("type_text", FnTool::from_sync(|_| ToolOutcome::ok_empty()))
        .with_tool("scroll", FnTool::from_sync(|_| ToolOutcome::ok_empty()))
        .with_tool(
            "get_page_context",
            FnTool::from_sync(|_| {
                ToolOutcome::ok(json!({ "text": "demo page content placeholder" }))
            }),
        )
        .with_tool(
            "answer",
            FnTool::from_sync(|target| ToolOutcome::ok(json!({ "answer": target }))),
        )
}
