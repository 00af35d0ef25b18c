use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{AgentConfig, ApprovalMode};
use crate::errors::AgentError;
use crate::utils::cancel::CancelToken;

/// Ordered risk classification attached to every proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// What kind of operation a tool call amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    FileRead,
    FileWrite,
    FileList,
    FileSearch,
    ShellCommand,
    GitOperation,
    ProjectAnalyze,
    Other,
}

impl OpType {
    /// File-scoped operations, auto-approved under `auto-edit` mode.
    fn is_file_op(self) -> bool {
        matches!(
            self,
            OpType::FileRead
                | OpType::FileWrite
                | OpType::FileList
                | OpType::FileSearch
                | OpType::ProjectAnalyze
        )
    }
}

/// A proposed action awaiting arbitration.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tool_name: String,
    pub op_type: OpType,
    pub risk: RiskLevel,
    pub preview: String,
    pub raw_args: Value,
    pub created_at: DateTime<Utc>,
}

/// Scope a user may ask the engine to remember a decision for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RememberScope {
    Tool(String),
    Command(String),
    PathPrefix(String),
}

#[derive(Debug, Clone)]
pub struct RememberRule {
    pub scope: RememberScope,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ApprovalResult {
    pub approved: bool,
    pub reason: String,
    pub remember: Option<RememberRule>,
}

impl ApprovalResult {
    pub fn approved(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
            remember: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            remember: None,
        }
    }
}

/// Outcome of policy arbitration before any human is involved.
#[derive(Debug)]
pub enum Decision {
    AutoApproved { reason: String },
    Blocked { reason: String },
    NeedsConfirmation(Box<ApprovalRequest>),
}

/// The suspension point for human interaction. Production wiring routes this
/// through the UI; tests supply a deterministic stub.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn confirm(
        &self,
        request: &ApprovalRequest,
        cancel: &CancelToken,
    ) -> Result<ApprovalResult, AgentError>;
}

struct RememberedDecision {
    scope: RememberScope,
    expires_at: Option<Instant>,
}

/// Classifies every side-effecting action by risk and arbitrates it against
/// the configured policy: block, auto-approve, or defer to the user.
pub struct ApprovalEngine {
    config: AgentConfig,
    callback: Option<Arc<dyn ApprovalCallback>>,
    remembered: Mutex<Vec<RememberedDecision>>,
}

impl ApprovalEngine {
    pub fn new(config: AgentConfig, callback: Option<Arc<dyn ApprovalCallback>>) -> Self {
        Self {
            config,
            callback,
            remembered: Mutex::new(Vec::new()),
        }
    }

    /// Analyse a tool call into (operation type, risk, human preview).
    pub fn analyze(
        &self,
        tool_name: &str,
        args: &Value,
    ) -> Result<(OpType, RiskLevel, String), AgentError> {
        match tool_name {
            "file_operations" => {
                let op = args["type"].as_str().ok_or_else(|| {
                    AgentError::InvalidArgs("file_operations requires 'type'".into())
                })?;
                let path = args["path"].as_str().unwrap_or("");
                match op {
                    "read" => Ok((OpType::FileRead, RiskLevel::Low, format!("Read file: {}", path))),
                    "list" => Ok((
                        OpType::FileList,
                        RiskLevel::Low,
                        format!("List directory: {}", path),
                    )),
                    "search" => Ok((
                        OpType::FileSearch,
                        RiskLevel::Low,
                        format!(
                            "Search files: '{}' under {}",
                            args["pattern"].as_str().unwrap_or(""),
                            path
                        ),
                    )),
                    "write" | "append" => {
                        let content = args["content"].as_str().unwrap_or("");
                        let risk = assess_file_write_risk(path, content);
                        Ok((OpType::FileWrite, risk, write_preview(path, content)))
                    }
                    other => Err(AgentError::InvalidArgs(format!(
                        "unknown file operation '{}'",
                        other
                    ))),
                }
            }
            "shell_execute" => {
                let command = args["command"].as_str().ok_or_else(|| {
                    AgentError::InvalidArgs("shell_execute requires 'command'".into())
                })?;
                let mut preview = format!("Command: {}", command);
                if let Some(dir) = args["working_dir"].as_str() {
                    preview.push_str(&format!("\nWorking dir: {}", dir));
                }
                Ok((OpType::ShellCommand, assess_shell_command_risk(command), preview))
            }
            "git_operations" => {
                let operation = args["operation"].as_str().ok_or_else(|| {
                    AgentError::InvalidArgs("git_operations requires 'operation'".into())
                })?;
                let extra = args["args"].as_str().unwrap_or("");
                let preview = if extra.is_empty() {
                    format!("Git: {}", operation)
                } else {
                    format!("Git: {} {}", operation, extra)
                };
                Ok((
                    OpType::GitOperation,
                    assess_git_operation_risk(operation, extra),
                    preview,
                ))
            }
            "project_analyze" => Ok((
                OpType::ProjectAnalyze,
                RiskLevel::Low,
                "Analyze project structure".to_string(),
            )),
            other => Ok((
                OpType::Other,
                RiskLevel::Medium,
                format!("Tool: {}", other),
            )),
        }
    }

    /// Policy arbitration without the human in the loop.
    pub async fn evaluate(&self, tool_name: &str, args: &Value) -> Result<Decision, AgentError> {
        let (op_type, risk, preview) = self.analyze(tool_name, args)?;

        if let Some(detail) = self.block_reason(tool_name, args) {
            info!("blocked {} call: {}", tool_name, detail);
            return Ok(Decision::Blocked {
                reason: format!("Operation blocked by policy ({})", detail),
            });
        }

        if let Some(reason) = self.auto_approve_reason(tool_name, args, op_type, risk).await {
            debug!("auto-approved {} ({})", tool_name, reason);
            return Ok(Decision::AutoApproved { reason });
        }

        Ok(Decision::NeedsConfirmation(Box::new(ApprovalRequest {
            id: Uuid::new_v4(),
            tool_name: tool_name.to_string(),
            op_type,
            risk,
            preview,
            raw_args: args.clone(),
            created_at: Utc::now(),
        })))
    }

    /// Run the user callback for a request that needs confirmation.
    pub async fn confirm(
        &self,
        request: &ApprovalRequest,
        cancel: &CancelToken,
    ) -> Result<ApprovalResult, AgentError> {
        let Some(callback) = &self.callback else {
            return Ok(ApprovalResult::denied(
                "no approval callback configured; denying by default",
            ));
        };
        let result = callback.confirm(request, cancel).await?;
        if result.approved
            && let Some(rule) = &result.remember
        {
            let mut remembered = self.remembered.lock().await;
            remembered.push(RememberedDecision {
                scope: rule.scope.clone(),
                expires_at: rule.duration.map(|d| Instant::now() + d),
            });
        }
        Ok(result)
    }

    /// Full arbitration for one call: evaluate, then confirm if needed.
    pub async fn request(
        &self,
        cancel: &CancelToken,
        tool_name: &str,
        args: &Value,
    ) -> Result<ApprovalResult, AgentError> {
        match self.evaluate(tool_name, args).await? {
            Decision::AutoApproved { reason } => Ok(ApprovalResult::approved(reason)),
            Decision::Blocked { reason } => Ok(ApprovalResult::denied(reason)),
            Decision::NeedsConfirmation(request) => self.confirm(&request, cancel).await,
        }
    }

    /// Atomic arbitration of a batch: the whole batch is approved or denied
    /// as one unit, judged at the worst member's risk.
    pub async fn request_batch(
        &self,
        cancel: &CancelToken,
        calls: &[(String, Value)],
    ) -> Result<ApprovalResult, AgentError> {
        if calls.is_empty() {
            return Ok(ApprovalResult::approved("empty batch"));
        }
        if calls.len() > self.config.max_batch_size {
            return Ok(ApprovalResult::denied(format!(
                "batch of {} exceeds the {}-call limit",
                calls.len(),
                self.config.max_batch_size
            )));
        }

        let mut worst = RiskLevel::Low;
        let mut previews = Vec::new();
        let mut all_auto = true;
        for (tool_name, args) in calls {
            let (op_type, risk, preview) = self.analyze(tool_name, args)?;
            if self.block_reason(tool_name, args).is_some() {
                return Ok(ApprovalResult::denied("Operation blocked by policy"));
            }
            if self
                .auto_approve_reason(tool_name, args, op_type, risk)
                .await
                .is_none()
            {
                all_auto = false;
            }
            worst = worst.max(risk);
            previews.push(preview);
        }

        if all_auto {
            return Ok(ApprovalResult::approved("all batch members auto-approved"));
        }

        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            tool_name: format!("batch of {}", calls.len()),
            op_type: OpType::Other,
            risk: worst,
            preview: previews.join("\n---\n"),
            raw_args: Value::Array(calls.iter().map(|(_, a)| a.clone()).collect()),
            created_at: Utc::now(),
        };
        self.confirm(&request, cancel).await
    }

    /// Worst-member risk of a batch; empty batches are Low.
    pub fn batch_risk(&self, calls: &[(String, Value)]) -> RiskLevel {
        calls
            .iter()
            .filter_map(|(name, args)| self.analyze(name, args).ok())
            .map(|(_, risk, _)| risk)
            .max()
            .unwrap_or(RiskLevel::Low)
    }

    fn block_reason(&self, tool_name: &str, args: &Value) -> Option<String> {
        match tool_name {
            "shell_execute" => {
                let command = args["command"].as_str()?;
                let program = first_program(command)?;
                if self.config.blocked_commands.iter().any(|b| *b == program) {
                    return Some(format!("command '{}' is blocked", program));
                }
                None
            }
            "file_operations" => {
                let path = args["path"].as_str()?;
                for prefix in &self.config.blocked_paths {
                    if path.starts_with(prefix.as_str()) {
                        return Some(format!("path '{}' is blocked", path));
                    }
                }
                None
            }
            _ => None,
        }
    }

    async fn auto_approve_reason(
        &self,
        tool_name: &str,
        args: &Value,
        op_type: OpType,
        risk: RiskLevel,
    ) -> Option<String> {
        if self.config.approval_mode == ApprovalMode::FullAuto {
            return Some("full-auto mode".into());
        }
        if self.config.approval_mode == ApprovalMode::AutoEdit && op_type.is_file_op() {
            return Some("auto-edit mode".into());
        }
        if risk == RiskLevel::Low && self.config.auto_approve_low_risk {
            return Some("low risk".into());
        }
        if tool_name == "shell_execute"
            && let Some(command) = args["command"].as_str()
            && let Some(program) = first_program(command)
            && self
                .config
                .auto_approve_safe_commands
                .iter()
                .any(|c| *c == program)
        {
            return Some(format!("'{}' is a safe command", program));
        }
        if tool_name == "file_operations"
            && let Some(path) = args["path"].as_str()
            && self
                .config
                .auto_approve_safe_paths
                .iter()
                .any(|p| path.starts_with(p.as_str()))
        {
            return Some(format!("'{}' is under a safe path", path));
        }
        if self.matches_remembered(tool_name, args).await {
            return Some("remembered decision".into());
        }
        None
    }

    async fn matches_remembered(&self, tool_name: &str, args: &Value) -> bool {
        let mut remembered = self.remembered.lock().await;
        let now = Instant::now();
        remembered.retain(|d| d.expires_at.is_none_or(|t| t > now));
        remembered.iter().any(|d| match &d.scope {
            RememberScope::Tool(name) => name == tool_name,
            RememberScope::Command(cmd) => {
                args["command"].as_str().and_then(first_program).as_deref() == Some(cmd.as_str())
            }
            RememberScope::PathPrefix(prefix) => args["path"]
                .as_str()
                .is_some_and(|p| p.starts_with(prefix.as_str())),
        })
    }
}

/// Basename of the first token of a command line.
fn first_program(command: &str) -> Option<String> {
    let tokens = shlex::split(command.trim())
        .unwrap_or_else(|| command.split_whitespace().map(String::from).collect());
    let first = tokens.first()?;
    Some(first.rsplit('/').next().unwrap_or(first).to_string())
}

const SYSTEM_DIRS: &[&str] = &["/etc", "/usr", "/bin", "/sbin", "/System", "/var", "/boot"];

const EXECUTABLE_EXTENSIONS: &[&str] = &["sh", "bash", "py", "pl", "rb", "js", "exe"];

const SECRET_TOKENS: &[&str] = &[
    "api_key",
    "password",
    "secret",
    "token",
    "private_key",
    "ssh_key",
];

/// Risk of writing `content` to `path`.
pub fn assess_file_write_risk(path: &str, content: &str) -> RiskLevel {
    let as_path = Path::new(path);
    if as_path.is_absolute()
        && SYSTEM_DIRS
            .iter()
            .any(|dir| as_path.starts_with(dir))
    {
        return RiskLevel::Critical;
    }

    if let Some(ext) = as_path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_lowercase();
        if EXECUTABLE_EXTENSIONS.iter().any(|e| *e == ext) {
            return RiskLevel::High;
        }
    }

    let lowered = content.to_lowercase();
    if SECRET_TOKENS.iter().any(|t| lowered.contains(t)) {
        return RiskLevel::High;
    }

    if content.len() > 1024 * 1024 {
        return RiskLevel::Medium;
    }

    RiskLevel::Low
}

const CRITICAL_SHELL_TOKENS: &[&str] =
    &["eval", "exec", "`", "$(", "&&", "||", ";", "|", ">", "<"];

const DANGEROUS_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "del", "sudo", "su", "chmod", "chown", "wget", "curl", "nc", "ssh", "scp",
];

/// Risk of running a shell command line.
pub fn assess_shell_command_risk(command: &str) -> RiskLevel {
    if CRITICAL_SHELL_TOKENS.iter().any(|t| command.contains(t)) {
        return RiskLevel::Critical;
    }
    if let Some(program) = first_program(command)
        && DANGEROUS_PROGRAMS.iter().any(|p| *p == program)
    {
        return RiskLevel::High;
    }
    RiskLevel::Low
}

/// Risk of a git operation, substring-matched on the verb and arguments.
pub fn assess_git_operation_risk(operation: &str, args: &str) -> RiskLevel {
    let haystack = format!("{} {}", operation, args);
    for token in ["force", "delete", "prune"] {
        if haystack.contains(token) {
            return RiskLevel::Critical;
        }
    }
    for token in ["reset", "checkout", "rebase"] {
        if haystack.contains(token) {
            return RiskLevel::High;
        }
    }
    for token in ["push", "pull", "fetch", "merge"] {
        if haystack.contains(token) {
            return RiskLevel::Medium;
        }
    }
    RiskLevel::Low
}

/// Number of leading content lines included in write previews.
const PREVIEW_LINES: usize = 5;

fn write_preview(path: &str, content: &str) -> String {
    let mut preview = format!("File: {}\nSize: {} bytes", path, content.len());
    let lines: Vec<&str> = content.lines().take(PREVIEW_LINES).collect();
    if !lines.is_empty() {
        preview.push_str("\nContent:");
        for line in lines {
            preview.push('\n');
            preview.push_str(line);
        }
        if content.lines().count() > PREVIEW_LINES {
            preview.push_str("\n…");
        }
    }
    preview
}
