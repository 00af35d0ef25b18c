use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::agent::Agent;
use crate::agent::approval::{
    ApprovalCallback, ApprovalEngine, ApprovalRequest, ApprovalResult,
};
use crate::agent::events::AgentEvent;
use crate::config::load_config;
use crate::errors::AgentError;
use crate::providers::registry::ProviderRegistry;
use crate::sandbox::{Policy, Sandbox};
use crate::utils::cancel::CancelToken;

#[derive(Parser)]
#[command(name = "rustle", version, about = "Terminal AI coding agent")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one conversational turn against the configured provider.
    Chat {
        /// The prompt to send.
        prompt: Vec<String>,
    },
    /// Report sandbox capabilities and validate the configured policy.
    Doctor,
}

/// Routes approval requests to the terminal: shows the preview, reads y/n.
struct TerminalApprovalCallback;

#[async_trait]
impl ApprovalCallback for TerminalApprovalCallback {
    async fn confirm(
        &self,
        request: &ApprovalRequest,
        cancel: &CancelToken,
    ) -> Result<ApprovalResult, AgentError> {
        let mut stdout = tokio::io::stdout();
        let banner = format!(
            "\n[approval required] {} (risk: {:?})\n{}\nApprove? [y/N] ",
            request.tool_name, request.risk, request.preview
        );
        stdout
            .write_all(banner.as_bytes())
            .await
            .map_err(|e| AgentError::Internal(e.into()))?;
        stdout
            .flush()
            .await
            .map_err(|e| AgentError::Internal(e.into()))?;

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        tokio::select! {
            read = reader.read_line(&mut line) => {
                read.map_err(|e| AgentError::Internal(e.into()))?;
            }
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
        }

        let answer = line.trim().to_lowercase();
        if answer == "y" || answer == "yes" {
            Ok(ApprovalResult::approved("approved at terminal"))
        } else {
            Ok(ApprovalResult::denied("denied at terminal"))
        }
    }
}

/// Parse arguments, dispatch, and return the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e:#}");
            return 1;
        }
    };

    let workspace = cli
        .workspace
        .or(config.workspace.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Chat { prompt } => {
            let prompt = prompt.join(" ");
            if prompt.trim().is_empty() {
                eprintln!("usage: rustle chat \"<prompt>\"");
                return 1;
            }
            run_chat(&config, workspace, &prompt).await
        }
        Commands::Doctor => run_doctor(&config),
    }
}

async fn run_chat(config: &crate::config::Config, workspace: PathBuf, prompt: &str) -> i32 {
    let registry = ProviderRegistry::builtin();
    let provider = match registry.resolve(&config.provider) {
        Ok(provider) => provider,
        Err(e @ AgentError::Provider { .. }) => {
            eprintln!("{e}");
            return 2;
        }
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    let approval = Arc::new(ApprovalEngine::new(
        config.agent.clone(),
        Some(Arc::new(TerminalApprovalCallback) as Arc<dyn ApprovalCallback>),
    ));
    let agent = match Agent::new(
        config.agent.clone(),
        provider,
        Sandbox::new(),
        approval,
        workspace,
    ) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("{e:#}");
            return 1;
        }
    };

    let (mut events, cancel) = agent.stream_events(prompt);
    let mut exit_code = 0;

    loop {
        tokio::select! {
            event = events.next() => match event {
                None => break,
                Some(event) => {
                    if let Some(code) = render_event(&event) {
                        exit_code = code;
                    }
                    if matches!(event, AgentEvent::Done { .. }) {
                        break;
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\ninterrupted, cancelling turn");
                cancel.cancel();
            }
        }
    }

    exit_code
}

/// Print one event; returns an exit code when the event is turn-fatal.
fn render_event(event: &AgentEvent) -> Option<i32> {
    match event {
        AgentEvent::TokenChunk { token } => {
            print!("{token}");
            use std::io::Write;
            let _ = std::io::stdout().flush();
            None
        }
        AgentEvent::ToolCallProposed { call } => {
            eprintln!("\n[tool] {} {}", call.name, call.arguments);
            None
        }
        AgentEvent::ApprovalPending { request } => {
            eprintln!("[waiting for approval: {}]", request.tool_name);
            None
        }
        AgentEvent::ToolResult { output, error, .. } => {
            if *error {
                eprintln!("[tool error]\n{output}");
            } else {
                eprintln!("[tool output]\n{output}");
            }
            None
        }
        AgentEvent::Error { kind, message } => {
            eprintln!("[{kind}] {message}");
            match kind.as_str() {
                "provider" => Some(2),
                "sandbox" => Some(3),
                "cancelled" => Some(130),
                _ => None,
            }
        }
        AgentEvent::Done { usage } => {
            eprintln!(
                "\n[done] tokens: {} in / {} out",
                usage.input_tokens, usage.output_tokens
            );
            None
        }
    }
}

fn run_doctor(config: &crate::config::Config) -> i32 {
    let sandbox = Sandbox::new();
    let caps = sandbox.capabilities();
    println!("platform:           {}", caps.platform);
    println!("fs isolation:       {}", caps.fs_isolation);
    println!("network isolation:  {}", caps.net_isolation);
    println!("process isolation:  {}", caps.process_isolation);
    println!("memory limits:      {}", caps.memory_limits);
    println!("cpu limits:         {}", caps.cpu_limits);
    println!("command filtering:  {}", caps.command_filtering);

    let policy = Policy::from_config(&config.agent.sandbox);
    match Sandbox::validate_policy(&policy) {
        Ok(()) => {
            println!("policy:             ok");
            0
        }
        Err(e) => {
            println!("policy:             INVALID ({e})");
            3
        }
    }
}
