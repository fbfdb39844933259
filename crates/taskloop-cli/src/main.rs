use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use taskloop_agent::{AgentRunner, ToolCallDispatcher, TurnExecutor};
use taskloop_core::{complete_task_definition, AppConfig};
use taskloop_hooks::{CompactContext, CompactContextConfig, HookPipeline};
use taskloop_llm::HttpModelClient;
use taskloop_observe::Observer;
use taskloop_tools::{register_builtin, ToolInvoker, ToolRegistry};

#[derive(Parser)]
#[command(name = "taskloop")]
#[command(about = "Autonomous agent run loop with completion interception", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task to completion and print the outcome as JSON.
    Run {
        /// The task for the agent.
        query: String,

        /// Path to a TOML config file; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Workspace root the built-in tools operate in.
        #[arg(long, default_value = ".")]
        workspace: PathBuf,

        /// Directory for the run log; logging is off when omitted.
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Echo run events to stderr.
        #[arg(long)]
        verbose: bool,

        /// Replace the default system prompt (the completion protocol
        /// section is always appended).
        #[arg(long)]
        system_prompt: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            query,
            config,
            workspace,
            log_dir,
            verbose,
            system_prompt,
        } => match run(query, config, workspace, log_dir, verbose, system_prompt) {
            Ok(goal) => {
                if goal {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(e) => {
                eprintln!("taskloop: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn run(
    query: String,
    config: Option<PathBuf>,
    workspace: PathBuf,
    log_dir: Option<PathBuf>,
    verbose: bool,
    system_prompt: Option<String>,
) -> Result<bool> {
    let cfg = match config {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };

    let mut observer = match &log_dir {
        Some(dir) => Observer::new(dir)?,
        None => Observer::disabled(),
    };
    observer.set_verbose(verbose);

    let model = Arc::new(HttpModelClient::new(cfg.llm.clone())?);

    let mut registry = ToolRegistry::new();
    register_builtin(&mut registry, &workspace);
    let mut tools = registry.definitions();
    tools.push(complete_task_definition());

    let mut hooks = HookPipeline::new();
    hooks.add_before_model(Arc::new(CompactContext::new(CompactContextConfig::default())));
    let hooks = Arc::new(hooks);

    let dispatcher = ToolCallDispatcher::new(ToolInvoker::new(Arc::new(registry)), hooks.clone());
    let executor = TurnExecutor::new(model, hooks.clone(), dispatcher, tools);
    let mut runner = AgentRunner::new(executor, cfg.agent_loop.clone(), hooks, Arc::new(observer));
    if let Some(prompt) = system_prompt {
        runner = runner.with_system_prompt(prompt);
    }

    let outcome = runner.run(&query);
    let goal = outcome.reason.is_goal();
    if !goal {
        eprintln!("taskloop: run did not reach goal: {}", outcome.reason.detail());
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(goal)
}
