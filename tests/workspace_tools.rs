mod common;

use common::{MockProvider, create_agent, full_auto_config, text_script, tool_call_script};
use rustle::agent::events::AgentEvent;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn shell_command_output_reaches_the_model() {
    let tmp = TempDir::new().unwrap();
    let provider = MockProvider::with_scripts(vec![
        tool_call_script("tc1", "shell_execute", &json!({"command": "echo workspace"})),
        text_script("The command printed 'workspace'."),
    ]);
    let requests = provider.requests.clone();
    let agent = create_agent(tmp.path(), provider, full_auto_config(), None);

    let (events, _cancel) = agent.stream_events("run echo");
    let events = events.collect_all().await;
    assert!(matches!(events.last(), Some(AgentEvent::Done { .. })));

    let recorded = requests.lock().unwrap();
    let tool_msg = recorded[1].iter().find(|m| m.role == "tool").unwrap();
    assert!(!tool_msg.is_error, "{}", tool_msg.content);
    assert!(tool_msg.content.contains("Exit Code: 0"));
    assert!(tool_msg.content.contains("workspace"));
}

#[tokio::test]
async fn project_analyze_reports_the_workspace() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir(tmp.path().join("src")).unwrap();
    std::fs::write(tmp.path().join("src/lib.rs"), "pub fn x() {}").unwrap();
    std::fs::write(tmp.path().join("Cargo.toml"), "[package]").unwrap();

    let provider = MockProvider::with_scripts(vec![
        tool_call_script("tc1", "project_analyze", &json!({})),
        text_script("This is a Rust project."),
    ]);
    let requests = provider.requests.clone();
    let agent = create_agent(tmp.path(), provider, full_auto_config(), None);

    let (events, _cancel) = agent.stream_events("what kind of project is this?");
    events.collect_all().await;

    let recorded = requests.lock().unwrap();
    let tool_msg = recorded[1].iter().find(|m| m.role == "tool").unwrap();
    let report: serde_json::Value = serde_json::from_str(&tool_msg.content).unwrap();
    assert_eq!(report["languages"]["rs"], 1);
    assert!(
        report["salient_files"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f == "Cargo.toml")
    );
}

#[tokio::test]
async fn chained_shell_command_is_rejected_before_spawning() {
    let tmp = TempDir::new().unwrap();
    let provider = MockProvider::with_scripts(vec![
        tool_call_script(
            "tc1",
            "shell_execute",
            &json!({"command": "echo a; echo b"}),
        ),
        text_script("Chaining is not allowed."),
    ]);
    let requests = provider.requests.clone();
    let agent = create_agent(tmp.path(), provider, full_auto_config(), None);

    let (events, _cancel) = agent.stream_events("run both");
    events.collect_all().await;

    let recorded = requests.lock().unwrap();
    let tool_msg = recorded[1].iter().find(|m| m.role == "tool").unwrap();
    assert!(tool_msg.is_error);
    assert!(tool_msg.content.contains("dangerous pattern"));
}
