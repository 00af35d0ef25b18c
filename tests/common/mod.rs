//! Shared harness for integration tests: a scripted provider and agent
//! construction helpers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use rustle::CancelToken;
use rustle::agent::Agent;
use rustle::agent::approval::{ApprovalCallback, ApprovalEngine, ApprovalRequest, ApprovalResult};
use rustle::config::{AgentConfig, ApprovalMode};
use rustle::errors::AgentError;
use rustle::providers::base::{ChatRequest, ChunkStream, LLMResponse, Message, Provider, StreamChunk};
use rustle::sandbox::Sandbox;

pub type Script = Vec<StreamChunk>;

/// Replays one scripted chunk stream per request and records the messages
/// of every request it received.
pub struct MockProvider {
    scripts: Mutex<VecDeque<Script>>,
    pub requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    pub fn with_scripts(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn chat(&self, _req: ChatRequest<'_>) -> Result<LLMResponse, AgentError> {
        Err(AgentError::Provider {
            message: "mock provider only streams".into(),
            retryable: false,
        })
    }

    async fn stream_chat(&self, req: ChatRequest<'_>) -> Result<ChunkStream, AgentError> {
        self.requests.lock().unwrap().push(req.messages);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::pin(futures_util::stream::iter(
            script.into_iter().map(Ok),
        )))
    }

    fn default_model(&self) -> &str {
        "mock"
    }
}

pub fn chunk(value: Value) -> StreamChunk {
    serde_json::from_value(value).expect("test chunk must parse")
}

pub fn text_chunk(text: &str) -> StreamChunk {
    chunk(json!({
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    }))
}

pub fn finish_chunk(reason: &str) -> StreamChunk {
    chunk(json!({
        "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
    }))
}

/// One whole tool call in a single delta, terminated by tool_calls.
pub fn tool_call_script(id: &str, name: &str, arguments: &Value) -> Script {
    vec![
        chunk(json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": id,
                 "function": {"name": name, "arguments": arguments.to_string()}}
            ]}, "finish_reason": null}]
        })),
        finish_chunk("tool_calls"),
    ]
}

pub fn text_script(text: &str) -> Script {
    vec![text_chunk(text), finish_chunk("stop")]
}

/// Callback that always answers the same way.
pub struct FixedCallback {
    approve: bool,
}

#[async_trait]
impl ApprovalCallback for FixedCallback {
    async fn confirm(
        &self,
        _request: &ApprovalRequest,
        _cancel: &CancelToken,
    ) -> Result<ApprovalResult, AgentError> {
        if self.approve {
            Ok(ApprovalResult::approved("approved by harness"))
        } else {
            Ok(ApprovalResult::denied("denied by harness"))
        }
    }
}

pub fn full_auto_config() -> AgentConfig {
    AgentConfig {
        approval_mode: ApprovalMode::FullAuto,
        ..AgentConfig::default()
    }
}

pub fn suggest_config() -> AgentConfig {
    AgentConfig {
        approval_mode: ApprovalMode::Suggest,
        auto_approve_low_risk: false,
        ..AgentConfig::default()
    }
}

pub fn create_agent(
    workspace: &std::path::Path,
    provider: Arc<dyn Provider>,
    config: AgentConfig,
    approve: Option<bool>,
) -> Agent {
    let callback = approve
        .map(|approve| Arc::new(FixedCallback { approve }) as Arc<dyn ApprovalCallback>);
    let approval = Arc::new(ApprovalEngine::new(config.clone(), callback));
    Agent::new(
        config,
        provider,
        Sandbox::new(),
        approval,
        workspace.to_path_buf(),
    )
    .expect("agent construction")
}
