mod common;

use common::{
    MockProvider, create_agent, full_auto_config, suggest_config, text_script, tool_call_script,
};
use rustle::agent::events::AgentEvent;
use serde_json::json;
use tempfile::TempDir;

fn done(events: &[AgentEvent]) -> bool {
    matches!(events.last(), Some(AgentEvent::Done { .. }))
}

#[tokio::test]
async fn tool_round_then_final_answer() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("notes.txt"), "remember the milk").unwrap();

    let provider = MockProvider::with_scripts(vec![
        tool_call_script(
            "tc1",
            "file_operations",
            &json!({"type": "read", "path": "notes.txt"}),
        ),
        text_script("Your notes say: remember the milk."),
    ]);
    let requests = provider.requests.clone();
    let agent = create_agent(tmp.path(), provider, full_auto_config(), None);

    let (events, _cancel) = agent.stream_events("what do my notes say?");
    let events = events.collect_all().await;
    assert!(done(&events));

    // The second request must carry the assistant tool-call message and the
    // matching tool result, in that order.
    let recorded = requests.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    let second = &recorded[1];
    let assistant_idx = second
        .iter()
        .position(|m| m.role == "assistant" && m.tool_calls.is_some())
        .expect("assistant tool-call message");
    let tool_idx = second
        .iter()
        .position(|m| m.role == "tool")
        .expect("tool result message");
    assert!(tool_idx > assistant_idx);
    assert_eq!(second[tool_idx].content, "remember the milk");
    assert_eq!(second[tool_idx].tool_call_id.as_deref(), Some("tc1"));
}

#[tokio::test]
async fn history_persists_across_turns() {
    let tmp = TempDir::new().unwrap();
    let provider = MockProvider::with_scripts(vec![
        text_script("Hello! I can help."),
        text_script("As I said, I can help."),
    ]);
    let requests = provider.requests.clone();
    let agent = create_agent(tmp.path(), provider, full_auto_config(), None);

    let (events, _c) = agent.stream_events("hi");
    events.collect_all().await;
    let (events, _c) = agent.stream_events("what did you say?");
    events.collect_all().await;

    let recorded = requests.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    // Second request sees the whole first exchange
    let second = &recorded[1];
    assert!(second.iter().any(|m| m.role == "user" && m.content == "hi"));
    assert!(
        second
            .iter()
            .any(|m| m.role == "assistant" && m.content == "Hello! I can help.")
    );
    assert!(
        second
            .iter()
            .any(|m| m.role == "user" && m.content == "what did you say?")
    );
}

#[tokio::test]
async fn denied_approval_becomes_tool_message() {
    let tmp = TempDir::new().unwrap();
    let provider = MockProvider::with_scripts(vec![
        tool_call_script(
            "tc1",
            "file_operations",
            &json!({"type": "write", "path": "x.txt", "content": "data"}),
        ),
        text_script("Understood, I will not write the file."),
    ]);
    let requests = provider.requests.clone();
    let agent = create_agent(tmp.path(), provider, suggest_config(), Some(false));

    let (events, _cancel) = agent.stream_events("write x.txt");
    let events = events.collect_all().await;
    assert!(done(&events));

    // Nothing was written
    assert!(!tmp.path().join("x.txt").exists());

    // The model saw a denial and could react to it
    let recorded = requests.lock().unwrap();
    let second = &recorded[1];
    let tool_msg = second.iter().find(|m| m.role == "tool").unwrap();
    assert!(tool_msg.is_error);
    assert!(tool_msg.content.contains("denied"));
}

#[tokio::test]
async fn approved_flow_reaches_the_filesystem() {
    let tmp = TempDir::new().unwrap();
    let provider = MockProvider::with_scripts(vec![
        tool_call_script(
            "tc1",
            "file_operations",
            &json!({"type": "write", "path": "out/result.txt", "content": "42"}),
        ),
        text_script("Saved."),
    ]);
    let agent = create_agent(tmp.path(), provider, suggest_config(), Some(true));

    let (events, _cancel) = agent.stream_events("save the answer");
    let events = events.collect_all().await;
    assert!(done(&events));

    assert_eq!(
        std::fs::read_to_string(tmp.path().join("out/result.txt")).unwrap(),
        "42"
    );
    // Approval surfaced before the result
    let pending_idx = events
        .iter()
        .position(|e| matches!(e, AgentEvent::ApprovalPending { .. }))
        .expect("approval pending event");
    let result_idx = events
        .iter()
        .position(|e| matches!(e, AgentEvent::ToolResult { .. }))
        .expect("tool result event");
    assert!(pending_idx < result_idx);
}

#[tokio::test]
async fn sequential_tool_calls_execute_in_model_order() {
    let tmp = TempDir::new().unwrap();
    let script = vec![
        common::chunk(json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "tc1",
                 "function": {"name": "file_operations",
                              "arguments": "{\"type\":\"write\",\"path\":\"a.txt\",\"content\":\"first\"}"}},
                {"index": 1, "id": "tc2",
                 "function": {"name": "file_operations",
                              "arguments": "{\"type\":\"append\",\"path\":\"a.txt\",\"content\":\" second\"}"}}
            ]}, "finish_reason": null}]
        })),
        common::finish_chunk("tool_calls"),
    ];
    let provider = MockProvider::with_scripts(vec![script, text_script("Both done.")]);
    let agent = create_agent(tmp.path(), provider, full_auto_config(), None);

    let (events, _cancel) = agent.stream_events("write then append");
    let events = events.collect_all().await;
    assert!(done(&events));

    // Append ran after write, so both fragments are present in order
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("a.txt")).unwrap(),
        "first second"
    );

    let result_ids: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolResult { call_id, .. } => Some(call_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(result_ids, vec!["tc1", "tc2"]);
}
