use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agent::tools::{ExecutionContext, Tool, ToolResult};
use crate::errors::AgentError;
use crate::sandbox::{Policy, Sandbox};

const DEFAULT_MAX_LINES: usize = 100;

/// Version-control operations as a thin wrapper around the system `git`
/// client, executed through the sandbox with the workspace admitted.
pub struct GitOperationsTool {
    sandbox: Sandbox,
    policy: Policy,
}

impl GitOperationsTool {
    pub fn new(sandbox: Sandbox, policy: Policy) -> Self {
        Self { sandbox, policy }
    }

    /// Map the operation (plus optional sub-arguments) onto a git argv.
    fn build_argv(
        operation: &str,
        args: Option<&str>,
        file: Option<&str>,
    ) -> Result<Vec<String>, AgentError> {
        let argv: Vec<String> = match operation {
            "status" => vec!["status".into()],
            "diff" => {
                let mut v = vec!["diff".into()];
                if let Some(file) = file {
                    v.push(file.into());
                }
                v
            }
            "commit" => {
                let message = args.map(str::trim).unwrap_or_default();
                if message.is_empty() {
                    return Err(AgentError::InvalidArgs(
                        "commit requires a non-empty message in 'args'".into(),
                    ));
                }
                vec!["commit".into(), "-m".into(), message.into()]
            }
            "branch" => Self::build_branch_argv(args)?,
            "log" => vec!["log".into(), "--oneline".into()],
            "remote" => vec!["remote".into(), "-v".into()],
            other => {
                return Err(AgentError::InvalidArgs(format!(
                    "unknown git operation '{}'",
                    other
                )));
            }
        };
        Ok(argv)
    }

    /// `branch` takes a sub-verb: `create|new <name>`, `switch|checkout
    /// <name>`, `delete <name>`; bare `branch` lists.
    fn build_branch_argv(args: Option<&str>) -> Result<Vec<String>, AgentError> {
        let args = args.map(str::trim).unwrap_or_default();
        if args.is_empty() {
            return Ok(vec!["branch".into(), "--list".into()]);
        }
        let mut parts = args.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let name = parts.next().map(str::to_string);

        let require_name = |name: Option<String>| {
            name.ok_or_else(|| {
                AgentError::InvalidArgs(format!("branch {} requires a branch name", verb))
            })
        };

        match verb {
            "create" | "new" => Ok(vec!["branch".into(), require_name(name)?]),
            "switch" | "checkout" => Ok(vec!["checkout".into(), require_name(name)?]),
            "delete" => Ok(vec!["branch".into(), "-d".into(), require_name(name)?]),
            other => Err(AgentError::InvalidArgs(format!(
                "unknown branch verb '{}' (expected create, switch or delete)",
                other
            ))),
        }
    }

    fn truncate_lines(output: &str, max_lines: usize) -> String {
        let lines: Vec<&str> = output.lines().collect();
        if lines.len() <= max_lines {
            return output.to_string();
        }
        let mut truncated = lines[..max_lines].join("\n");
        truncated.push_str(&format!(
            "\n… (truncated to {} of {} lines)",
            max_lines,
            lines.len()
        ));
        truncated
    }
}

#[async_trait]
impl Tool for GitOperationsTool {
    fn name(&self) -> &str {
        "git_operations"
    }

    fn description(&self) -> &str {
        "Run version-control operations in the workspace repository: \
         status, diff, commit, branch, log, remote."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["status", "diff", "commit", "branch", "log", "remote"],
                    "description": "The git operation to perform"
                },
                "args": {
                    "type": "string",
                    "description": "Operation arguments (commit message, branch verb and name)"
                },
                "file": {
                    "type": "string",
                    "description": "Restrict diff to one file"
                },
                "max_lines": {
                    "type": "integer",
                    "description": "Output line cap for diff and log",
                    "default": 100
                }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let operation = params["operation"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'operation' parameter"))?;
        let max_lines = params["max_lines"]
            .as_u64()
            .map_or(DEFAULT_MAX_LINES, |n| n as usize);

        let argv = match Self::build_argv(
            operation,
            params["args"].as_str(),
            params["file"].as_str(),
        ) {
            Ok(argv) => argv,
            Err(e) => return Ok(ToolResult::error(format!("Error: {}", e))),
        };

        let policy = self.policy.clone().with_workspace(&ctx.base_path, true);
        let result = self
            .sandbox
            .execute(
                &ctx.cancel,
                "git",
                &argv,
                &policy,
                Some(&ctx.base_path),
                None,
            )
            .await;

        let exec = match result {
            Ok(exec) => exec,
            Err(e @ (AgentError::Cancelled | AgentError::Sandbox(_))) => {
                return Err(e.into());
            }
            Err(e) => return Ok(ToolResult::error(format!("Error: {}", e))),
        };

        if let Some(error) = &exec.error {
            return Ok(ToolResult::error(format!(
                "Error: git {} failed: {}",
                operation, error
            )));
        }
        if exec.exit_code != 0 {
            let detail = if exec.stderr.trim().is_empty() {
                exec.stdout.trim().to_string()
            } else {
                exec.stderr.trim().to_string()
            };
            return Ok(ToolResult::error(format!(
                "Error: git {} exited with {}: {}",
                operation, exec.exit_code, detail
            )));
        }

        let output = match operation {
            "diff" | "log" => Self::truncate_lines(&exec.stdout, max_lines),
            _ => exec.stdout.clone(),
        };
        if output.trim().is_empty() {
            return Ok(ToolResult::new(format!("git {}: (no output)", operation)));
        }
        Ok(ToolResult::new(output))
    }
}

#[cfg(test)]
mod tests;
