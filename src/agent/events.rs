use serde::Serialize;

use crate::agent::approval::ApprovalRequest;
use crate::providers::base::{TokenUsage, ToolCallRequest};

/// One entry of the strictly-ordered event stream a turn publishes to the
/// UI. `Done` is terminal; nothing follows it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A fragment of assistant-visible text, for live rendering.
    TokenChunk { token: String },
    /// A fully-merged tool call about to enter approval.
    ToolCallProposed { call: ToolCallRequest },
    /// Surfaced when the approval callback suspends awaiting user input.
    ApprovalPending { request: ApprovalRequest },
    /// Result string from a tool.
    ToolResult {
        call_id: String,
        output: String,
        error: bool,
    },
    /// Non-fatal issue in the loop.
    Error { kind: String, message: String },
    /// End of turn; no pending tool calls.
    Done { usage: TokenUsage },
}
