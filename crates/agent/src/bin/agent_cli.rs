//! Interactive CLI for a single `Agent` session: reads prompts from stdin
//! one line at a time and prints the event stream as it arrives.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use stupid_agent::{Agent, AgentCliConfig};
use stupid_llm::providers::create_tool_aware_provider;
use stupid_llm::LlmConfig;
use stupid_tool_runtime::event::{Event, MessageDeltaKind};
use stupid_tool_runtime::executor::{ExecutorConfig, ExecutorPool, ToolExecutor};
use stupid_tool_runtime::loop_config::LoopConfig;
use stupid_tool_runtime::registry::ToolRegistry;
use stupid_tool_runtime::tools::{BashExecuteTool, FileReadTool, FileWriteTool};

#[derive(Parser, Debug)]
#[command(name = "agent-cli", about = "Single-session tool-using agent loop")]
struct Args {
    /// Override the system prompt configured via AGENT_SYSTEM_PROMPT.
    #[arg(long)]
    system_prompt: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let cli_config = AgentCliConfig::from_env_profiled();
    let llm_config = LlmConfig::from_env_profiled();

    let provider = create_tool_aware_provider(&llm_config)?;

    let mut registry = ToolRegistry::new();
    registry.register(BashExecuteTool)?;
    registry.register(FileReadTool)?;
    registry.register(FileWriteTool)?;
    let registry = Arc::new(registry);

    let executor_config = ExecutorConfig {
        max_concurrent_tools: cli_config.max_concurrent_tools,
        ..ExecutorConfig::default()
    };
    let executor_pool = Arc::new(ExecutorPool::with_default(Arc::new(ToolExecutor::with_config(
        registry.clone(),
        executor_config,
    ))));

    let mut loop_config = LoopConfig::new(
        llm_config.anthropic_model.clone(),
        llm_config.anthropic_api_key.clone().unwrap_or_default(),
    );
    loop_config.tool_call_cutoff = cli_config.tool_call_cutoff;
    loop_config.working_directory = cli_config.working_directory.clone();
    loop_config.temperature = llm_config.temperature;
    loop_config.max_tokens = llm_config.max_tokens;
    loop_config.executor = Some(executor_pool);

    let system_prompt = args.system_prompt.unwrap_or(cli_config.system_prompt);
    let agent = Agent::new(Arc::new(provider), system_prompt, registry, loop_config);

    let mut events = agent.events();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    info!("agent-cli ready, type a prompt and press enter (Ctrl-D to quit)");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Err(err) = agent.prompt(line).await {
            error!(%err, "prompt rejected");
        }
    }

    Ok(())
}

fn print_event(event: &Event) {
    let mut stdout = io::stdout();
    match event {
        Event::MessageUpdate { delta: MessageDeltaKind::Text { text }, .. } => {
            let _ = write!(stdout, "{text}");
            let _ = stdout.flush();
        }
        Event::AgentEnd { outcome, .. } => {
            println!("\n-- turn finished: {outcome:?} --");
        }
        Event::ToolExecutionStart { tool_name, .. } => {
            println!("\n[tool: {tool_name}]");
        }
        other => {
            tracing::debug!(?other, "event");
        }
    }
}
