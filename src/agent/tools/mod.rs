pub mod file_ops;
pub mod git;
pub mod project;
mod registry;
pub mod shell;

pub use registry::ToolRegistry;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::utils::cancel::CancelToken;

/// Outcome of one tool execution. The content string is what the model sees
/// as the tool message; errors are flagged, not propagated, so the model can
/// react to them.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

impl std::fmt::Display for ToolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.content)
    }
}

/// Context passed to every tool execution: the workspace root all paths are
/// confined to, and the turn's cancellation token.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub base_path: PathBuf,
    pub cancel: CancelToken,
}

impl ExecutionContext {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            cancel: CancelToken::never(),
        }
    }

    pub fn with_cancel(base_path: PathBuf, cancel: CancelToken) -> Self {
        Self { base_path, cancel }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value; // JSON Schema

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolResult>;

    /// Per-tool execution timeout. Overrides the registry-level default.
    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(120)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::ExecutionContext;
    use std::path::Path;

    /// Execution context rooted at a temp dir for tool tests.
    pub fn ctx_for(dir: &Path) -> ExecutionContext {
        ExecutionContext::new(dir.to_path_buf())
    }
}
