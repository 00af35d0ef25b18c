use thiserror::Error;

/// Typed error hierarchy for rustle.
///
/// Use at module boundaries (provider calls, sandbox execution, tool dispatch,
/// approval decisions). Internal/leaf functions can continue using
/// `anyhow::Result` — the `Internal` variant allows seamless conversion via
/// the `?` operator.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Tool error: {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("Approval denied: {0}")]
    ApprovalDenied(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using AgentError.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Whether this error is retryable (transient provider errors).
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Whether the agent loop recovers from this error by surfacing it to
    /// the model as a tool message. Non-recoverable errors terminate the turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidArgs(_)
                | AgentError::PolicyViolation(_)
                | AgentError::ApprovalDenied(_)
                | AgentError::Tool { .. }
                | AgentError::Timeout(_)
        )
    }

    /// Short stable kind tag, used in UI events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::InvalidArgs(_) => "invalid_args",
            AgentError::PolicyViolation(_) => "policy_violation",
            AgentError::Sandbox(_) => "sandbox",
            AgentError::Timeout(_) => "timeout",
            AgentError::Cancelled => "cancelled",
            AgentError::Provider { .. } => "provider",
            AgentError::Tool { .. } => "tool",
            AgentError::ApprovalDenied(_) => "approval_denied",
            AgentError::Internal(_) => "internal",
        }
    }

    /// Process exit code when the error escapes the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Provider { .. } => 2,
            AgentError::Sandbox(_) | AgentError::PolicyViolation(_) => 3,
            AgentError::Cancelled => 130,
            _ => 1,
        }
    }
}
