use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Workspace root. Defaults to the current directory at startup.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry key of the provider implementation.
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    /// Override for OpenAI-compatible gateways.
    #[serde(default, rename = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_key: String::new(),
            base_url: None,
            model: None,
        }
    }
}

fn default_provider_name() -> String {
    "openai".to_string()
}

/// How the approval engine arbitrates side-effecting tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Every non-auto-approved action is surfaced to the user.
    Suggest,
    /// File edits proceed without prompting; shell and git still prompt.
    AutoEdit,
    /// Everything is approved without prompting.
    FullAuto,
}

impl Default for ApprovalMode {
    fn default() -> Self {
        ApprovalMode::Suggest
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, rename = "approvalMode")]
    pub approval_mode: ApprovalMode,
    #[serde(default = "default_true", rename = "autoApproveLowRisk")]
    pub auto_approve_low_risk: bool,
    #[serde(default, rename = "autoApproveSafeCommands")]
    pub auto_approve_safe_commands: Vec<String>,
    #[serde(default, rename = "autoApproveSafePaths")]
    pub auto_approve_safe_paths: Vec<String>,
    #[serde(default, rename = "blockedCommands")]
    pub blocked_commands: Vec<String>,
    #[serde(default, rename = "blockedPaths")]
    pub blocked_paths: Vec<String>,
    /// Upper bound on tool calls accepted in one batch approval.
    #[serde(default = "default_max_batch_size", rename = "maxBatchSize")]
    pub max_batch_size: usize,
    /// Per-turn wall-clock budget in seconds.
    #[serde(default = "default_turn_timeout", rename = "timeout")]
    pub timeout_secs: u64,
    /// Upper bound on model→tool rounds within one user turn.
    #[serde(default = "default_max_tool_rounds", rename = "maxToolRounds")]
    pub max_tool_rounds: usize,
    /// File extensions `project_analyze` treats as source code.
    #[serde(default = "default_code_extensions", rename = "codeExtensions")]
    pub code_extensions: Vec<String>,
    #[serde(default)]
    pub sandbox: SandboxPolicyConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::default(),
            auto_approve_low_risk: true,
            auto_approve_safe_commands: Vec::new(),
            auto_approve_safe_paths: Vec::new(),
            blocked_commands: Vec::new(),
            blocked_paths: Vec::new(),
            max_batch_size: default_max_batch_size(),
            timeout_secs: default_turn_timeout(),
            max_tool_rounds: default_max_tool_rounds(),
            code_extensions: default_code_extensions(),
            sandbox: SandboxPolicyConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    8
}

fn default_turn_timeout() -> u64 {
    300
}

fn default_max_tool_rounds() -> usize {
    16
}

pub fn default_code_extensions() -> Vec<String> {
    [
        "rs", "go", "py", "js", "ts", "tsx", "jsx", "java", "kt", "c", "h", "cc", "cpp", "hpp",
        "rb", "php", "swift", "scala", "sh", "sql", "toml", "yaml", "yml", "json", "md",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Serde mirror of [`crate::sandbox::Policy`]. Empty path lists mean the
/// sandbox derives workspace-scoped defaults at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxPolicyConfig {
    #[serde(default, rename = "allowReadPaths")]
    pub allow_read_paths: Vec<String>,
    #[serde(default, rename = "allowWritePaths")]
    pub allow_write_paths: Vec<String>,
    #[serde(default = "default_block_paths", rename = "blockPaths")]
    pub block_paths: Vec<String>,
    #[serde(default, rename = "allowNetwork")]
    pub allow_network: bool,
    #[serde(default, rename = "allowedHosts")]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "default_max_processes", rename = "maxProcesses")]
    pub max_processes: u32,
    #[serde(default = "default_max_memory_mb", rename = "maxMemoryMb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_max_cpu_secs", rename = "maxCpuTime")]
    pub max_cpu_time_secs: u64,
    #[serde(default = "default_allowed_commands", rename = "allowedCommands")]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_blocked_commands", rename = "blockedCommands")]
    pub blocked_commands: Vec<String>,
    #[serde(default, rename = "allowedEnvVars")]
    pub allowed_env_vars: Vec<String>,
    #[serde(default, rename = "blockedEnvVars")]
    pub blocked_env_vars: Vec<String>,
}

impl Default for SandboxPolicyConfig {
    fn default() -> Self {
        Self {
            allow_read_paths: Vec::new(),
            allow_write_paths: Vec::new(),
            block_paths: default_block_paths(),
            allow_network: false,
            allowed_hosts: Vec::new(),
            max_processes: default_max_processes(),
            max_memory_mb: default_max_memory_mb(),
            max_cpu_time_secs: default_max_cpu_secs(),
            allowed_commands: default_allowed_commands(),
            blocked_commands: default_blocked_commands(),
            allowed_env_vars: Vec::new(),
            blocked_env_vars: Vec::new(),
        }
    }
}

fn default_block_paths() -> Vec<String> {
    ["/etc", "/var", "/usr", "/bin", "/sbin", "/System"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_max_processes() -> u32 {
    32
}

fn default_max_memory_mb() -> u64 {
    512
}

fn default_max_cpu_secs() -> u64 {
    30
}

pub(crate) fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "grep", "find", "wc", "sort", "uniq", "echo", "pwd",
        "whoami", "date", "ps", "git", "go", "npm", "yarn", "python", "node", "make",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

pub(crate) fn default_blocked_commands() -> Vec<String> {
    [
        "rm", "rmdir", "del", "format", "mkfs", "dd", "shred", "sudo", "su", "chmod", "chown",
        "passwd", "useradd", "wget", "curl", "nc", "netcat", "ssh", "scp", "rsync",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}
