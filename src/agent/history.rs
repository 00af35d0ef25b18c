use crate::errors::AgentError;
use crate::providers::base::{Message, ToolCallRequest};

/// Append-only dialogue history owned by the agent.
///
/// Two invariants hold at all times: a provider request is only issued when
/// the history ends in a `user` or `tool` message, and every `tool` message
/// references a tool call of the immediately preceding assistant message.
#[derive(Debug)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(
        &mut self,
        content: impl Into<String>,
        tool_calls: Option<Vec<ToolCallRequest>>,
    ) {
        self.messages.push(Message::assistant(content, tool_calls));
    }

    /// Append a tool result. The `tool_call_id` must belong to the last
    /// assistant message's tool calls.
    pub fn push_tool_result(
        &mut self,
        tool_call_id: &str,
        content: impl Into<String>,
        is_error: bool,
    ) -> Result<(), AgentError> {
        let valid = self
            .last_assistant_tool_calls()
            .is_some_and(|calls| calls.iter().any(|c| c.id == tool_call_id));
        if !valid {
            return Err(AgentError::Internal(anyhow::anyhow!(
                "tool result '{}' does not match the pending assistant message",
                tool_call_id
            )));
        }
        self.messages
            .push(Message::tool_result(tool_call_id, content, is_error));
        Ok(())
    }

    /// Tool calls of the most recent assistant message, if the messages
    /// after it are all tool results.
    fn last_assistant_tool_calls(&self) -> Option<&[ToolCallRequest]> {
        for msg in self.messages.iter().rev() {
            match msg.role.as_str() {
                "tool" => continue,
                "assistant" => return msg.tool_calls.as_deref(),
                _ => return None,
            }
        }
        None
    }

    /// Whether a provider request may be issued now.
    pub fn ready_for_request(&self) -> bool {
        matches!(
            self.messages.last().map(|m| m.role.as_str()),
            Some("user" | "tool")
        )
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: "file_operations".into(),
            arguments: json!({}),
        }
    }

    #[test]
    fn starts_with_system_message() {
        let history = History::new("you are a coding agent");
        assert_eq!(history.len(), 1);
        assert_eq!(history.last().unwrap().role, "system");
        assert!(!history.ready_for_request());
    }

    #[test]
    fn user_message_makes_request_ready() {
        let mut history = History::new("sys");
        history.push_user("hello");
        assert!(history.ready_for_request());
    }

    #[test]
    fn tool_result_requires_matching_call() {
        let mut history = History::new("sys");
        history.push_user("do it");
        history.push_assistant("", Some(vec![call("call-1")]));
        assert!(!history.ready_for_request());

        assert!(history.push_tool_result("call-1", "ok", false).is_ok());
        assert!(history.ready_for_request());

        // Unknown id is rejected
        assert!(history.push_tool_result("call-9", "ok", false).is_err());
    }

    #[test]
    fn tool_result_without_assistant_is_rejected() {
        let mut history = History::new("sys");
        history.push_user("hi");
        assert!(history.push_tool_result("call-1", "ok", false).is_err());
    }

    #[test]
    fn multiple_tool_results_in_one_round() {
        let mut history = History::new("sys");
        history.push_user("go");
        history.push_assistant("", Some(vec![call("a"), call("b")]));
        assert!(history.push_tool_result("a", "one", false).is_ok());
        assert!(history.push_tool_result("b", "two", true).is_ok());
        assert!(history.ready_for_request());
    }

    #[test]
    fn assistant_without_calls_ends_turn() {
        let mut history = History::new("sys");
        history.push_user("go");
        history.push_assistant("done", None);
        assert!(!history.ready_for_request());
        assert!(history.push_tool_result("x", "out", false).is_err());
    }
}
