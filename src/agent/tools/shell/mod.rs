use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agent::tools::{ExecutionContext, Tool, ToolResult};
use crate::errors::AgentError;
use crate::sandbox::{ExecutionResult, Policy, Sandbox};
use crate::utils::paths::resolve_within_base;
use crate::utils::subprocess::scrubbed_command;

/// Default per-command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Substrings that disqualify a command before it can reach the sandbox.
/// Checked in order as plain substrings over the whole command line; the
/// bare `.` entry intentionally matches any dotted token.
const DANGEROUS_PATTERNS: &[&str] = &[
    "&&", "||", ";", "|", ">", "<", ">>", "<<", "2>", "&>", "$((", "`", "eval", "exec", "source",
    ".",
];

/// Maximum combined stdout+stderr size before truncation.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Single-command shell execution, dispatched through the platform sandbox
/// when one is available.
pub struct ShellExecuteTool {
    sandbox: Sandbox,
    policy: Policy,
    blocked_cmds: Vec<String>,
}

impl ShellExecuteTool {
    pub fn new(sandbox: Sandbox, policy: Policy, extra_blocked: Vec<String>) -> Self {
        let mut blocked_cmds = policy.blocked_commands.clone();
        for cmd in extra_blocked {
            if !blocked_cmds.contains(&cmd) {
                blocked_cmds.push(cmd);
            }
        }
        Self {
            sandbox,
            policy,
            blocked_cmds,
        }
    }

    /// Reject the command before anything is spawned: blocked program
    /// basename, any dangerous substring, or a trailing background `&`.
    fn pre_validate(&self, command: &str) -> Result<(), AgentError> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(AgentError::InvalidArgs("empty command".into()));
        }

        let tokens = shlex::split(trimmed)
            .unwrap_or_else(|| trimmed.split_whitespace().map(String::from).collect());
        let program = tokens
            .first()
            .ok_or_else(|| AgentError::InvalidArgs("empty command".into()))?;
        let basename = program.rsplit('/').next().unwrap_or(program);

        if self.blocked_cmds.iter().any(|b| b == basename) {
            return Err(AgentError::PolicyViolation(format!(
                "blocked command '{}'",
                basename
            )));
        }

        for pattern in DANGEROUS_PATTERNS {
            if trimmed.contains(pattern) {
                return Err(AgentError::PolicyViolation(format!(
                    "dangerous pattern '{}'",
                    pattern
                )));
            }
        }

        if trimmed.ends_with('&') {
            return Err(AgentError::PolicyViolation(
                "background execution ('&') is not permitted".into(),
            ));
        }

        Ok(())
    }

    fn resolve_working_dir(
        &self,
        ctx: &ExecutionContext,
        working_dir: Option<&str>,
    ) -> Result<PathBuf, AgentError> {
        match working_dir {
            None => Ok(ctx.base_path.clone()),
            Some(dir) => {
                if std::path::Path::new(dir).is_absolute() {
                    return Err(AgentError::PolicyViolation(
                        "working_dir must be relative to the workspace".into(),
                    ));
                }
                resolve_within_base(&ctx.base_path, dir)
            }
        }
    }

    async fn run_sandboxed(
        &self,
        ctx: &ExecutionContext,
        command: &str,
        cwd: &PathBuf,
        timeout: Duration,
    ) -> Result<ExecutionResult, AgentError> {
        let tokens = shlex::split(command)
            .ok_or_else(|| AgentError::InvalidArgs("unparseable command quoting".into()))?;
        let (program, args) = tokens
            .split_first()
            .ok_or_else(|| AgentError::InvalidArgs("empty command".into()))?;

        let policy = self
            .policy
            .clone()
            .with_workspace(&ctx.base_path, true)
            .with_workspace(cwd, false);

        self.sandbox
            .execute(&ctx.cancel, program, args, &policy, Some(cwd.as_path()), Some(timeout))
            .await
    }

    /// Fallback for hosts without OS isolation: plain `sh -c` with a
    /// scrubbed environment and the same timeout.
    async fn run_unsandboxed(
        &self,
        ctx: &ExecutionContext,
        command: &str,
        cwd: &PathBuf,
        timeout: Duration,
    ) -> Result<ExecutionResult, AgentError> {
        let tokens = shlex::split(command).unwrap_or_default();
        if let Some(program) = tokens.first() {
            Sandbox::validate_command(program, &self.policy)?;
        }

        let start = std::time::Instant::now();
        let mut cmd = scrubbed_command(
            "sh",
            &self.policy.allowed_env_vars,
            &self.policy.blocked_env_vars,
        );
        cmd.arg("-c").arg(command);
        cmd.current_dir(cwd);
        cmd.kill_on_drop(true);

        let output = tokio::select! {
            output = cmd.output() => output.map_err(|e| AgentError::Tool {
                tool: "shell_execute".into(),
                message: format!("error executing command: {}", e),
            })?,
            () = tokio::time::sleep(timeout) => {
                return Ok(ExecutionResult {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: start.elapsed(),
                    memory_used: None,
                    error: Some(AgentError::Timeout(timeout)),
                });
            }
            () = ctx.cancel.cancelled() => {
                return Ok(ExecutionResult {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: start.elapsed(),
                    memory_used: None,
                    error: Some(AgentError::Cancelled),
                });
            }
        };

        Ok(ExecutionResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
            memory_used: None,
            error: None,
        })
    }

    fn render_result(
        command: &str,
        cwd_display: &str,
        result: &ExecutionResult,
    ) -> ToolResult {
        let stdout = truncate_at_utf8_boundary(&result.stdout, MAX_OUTPUT_BYTES * 3 / 4);
        let remaining = MAX_OUTPUT_BYTES.saturating_sub(stdout.len());
        let stderr = truncate_at_utf8_boundary(&result.stderr, remaining);

        let mut block = format!(
            "Command: {}\nWorking Directory: {}\nExit Code: {}\nDuration: {:.2}s\n\nSTDOUT:\n{}\n\nSTDERR:\n{}",
            command,
            cwd_display,
            result.exit_code,
            result.duration.as_secs_f64(),
            stdout,
            stderr,
        );

        match &result.error {
            Some(AgentError::Timeout(budget)) => {
                block.push_str(&format!(
                    "\n\n[command killed after {}s timeout]",
                    budget.as_secs()
                ));
                ToolResult::error(block)
            }
            Some(AgentError::Cancelled) => {
                block.push_str("\n\n[command cancelled]");
                ToolResult::error(block)
            }
            Some(other) => {
                block.push_str(&format!("\n\n[{}]", other));
                ToolResult::error(block)
            }
            None if result.exit_code != 0 => ToolResult::error(block),
            None => ToolResult::new(block),
        }
    }
}

fn truncate_at_utf8_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[async_trait]
impl Tool for ShellExecuteTool {
    fn name(&self) -> &str {
        "shell_execute"
    }

    fn description(&self) -> &str {
        "Execute a single shell command in the workspace. Shell operators \
         (pipes, redirection, chaining) are not permitted."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds",
                    "default": 30
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory relative to the workspace"
                }
            },
            "required": ["command"]
        })
    }

    fn execution_timeout(&self) -> Duration {
        // Per-command timeouts govern; this is only the outer guard.
        Duration::from_secs(600)
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let command = params["command"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'command' parameter"))?;
        let timeout = Duration::from_secs(
            params["timeout"].as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        if let Err(e) = self.pre_validate(command) {
            return Ok(ToolResult::error(format!("Error: {}", e)));
        }

        let cwd = match self.resolve_working_dir(ctx, params["working_dir"].as_str()) {
            Ok(cwd) => cwd,
            Err(e) => return Ok(ToolResult::error(format!("Error: {}", e))),
        };
        let cwd_display = cwd.display().to_string();

        let result = if self.sandbox.capabilities().fs_isolation {
            self.run_sandboxed(ctx, command, &cwd, timeout).await
        } else {
            self.run_unsandboxed(ctx, command, &cwd, timeout).await
        };

        match result {
            Ok(exec) => Ok(Self::render_result(command, &cwd_display, &exec)),
            Err(e @ (AgentError::Cancelled | AgentError::Sandbox(_))) => Err(e.into()),
            Err(e) => Ok(ToolResult::error(format!("Error: {}", e))),
        }
    }
}
