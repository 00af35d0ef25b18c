use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};

use crate::errors::AgentError;
use crate::providers::base::{
    ChatRequest, ChunkStream, FinishReason, LLMResponse, Provider, StreamChunk, TokenUsage,
    ToolCallRequest,
};
use crate::providers::sse::SseDecoder;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Reference adapter for OpenAI-compatible chat-completions endpoints.
/// Anything speaking this wire protocol (many local gateways do) works by
/// overriding `base_url`.
pub struct OpenAIProvider {
    api_key: String,
    default_model: String,
    base_url: String,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(api_key: String, default_model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            default_model: default_model.unwrap_or_else(|| "gpt-4o".to_string()),
            base_url: base_url.unwrap_or_else(|| API_URL.to_string()),
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn build_payload(&self, req: &ChatRequest<'_>, stream: bool) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|msg| {
                let mut m = json!({
                    "role": msg.role,
                    "content": msg.content,
                });

                if let Some(name) = &msg.name {
                    m["name"] = json!(name);
                }

                if let Some(tool_calls) = &msg.tool_calls {
                    m["tool_calls"] = json!(
                        tool_calls
                            .iter()
                            .map(|tc| {
                                let args_str = serde_json::to_string(&tc.arguments)
                                    .unwrap_or_else(|_| "{}".to_string());
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": args_str
                                    }
                                })
                            })
                            .collect::<Vec<_>>()
                    );
                }

                if let Some(tool_call_id) = &msg.tool_call_id {
                    m["tool_call_id"] = json!(tool_call_id);
                }

                m
            })
            .collect();

        let mut payload = json!({
            "model": req.model.unwrap_or(&self.default_model),
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });

        if let Some(tools) = &req.tools {
            payload["tools"] = json!(
                tools
                    .iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        }
                    }))
                    .collect::<Vec<_>>()
            );
        }

        if stream {
            payload["stream"] = json!(true);
            payload["stream_options"] = json!({"include_usage": true});
        }

        payload
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, AgentError> {
        let resp = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| AgentError::Provider {
                message: format!("transport error: {}", e),
                retryable: true,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Provider {
                message: api_error_message(status.as_u16(), &body),
                retryable,
            });
        }
        Ok(resp)
    }

    fn parse_response(json: &Value) -> Result<LLMResponse, AgentError> {
        let choice = json["choices"]
            .as_array()
            .and_then(|arr| arr.first())
            .ok_or_else(|| AgentError::Provider {
                message: "no choices in response".into(),
                retryable: false,
            })?;

        let message = &choice["message"];
        let content = message["content"]
            .as_str()
            .map(std::string::ToString::to_string);

        let mut tool_calls = Vec::new();
        if let Some(tool_calls_array) = message["tool_calls"].as_array() {
            for tc in tool_calls_array {
                if let Some(function) = tc["function"].as_object() {
                    let arguments = function["arguments"]
                        .as_str()
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or_else(|| json!({}));

                    tool_calls.push(ToolCallRequest {
                        id: tc["id"].as_str().unwrap_or("").to_string(),
                        name: function["name"].as_str().unwrap_or("").to_string(),
                        arguments,
                    });
                }
            }
        }

        let finish_reason = choice["finish_reason"]
            .as_str()
            .and_then(|s| serde_json::from_value::<FinishReason>(json!(s)).ok());

        let usage = json
            .get("usage")
            .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());

        Ok(LLMResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

fn api_error_message(status: u16, body: &str) -> String {
    if let Ok(error_json) = serde_json::from_str::<Value>(body)
        && let Some(error) = error_json.get("error")
    {
        let error_type = error
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let error_msg = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown error");
        return format!("API error {} ({}): {}", status, error_type, error_msg);
    }
    format!("API error {}: {}", status, body)
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(&self, req: ChatRequest<'_>) -> Result<LLMResponse, AgentError> {
        let payload = self.build_payload(&req, false);
        let resp = self.send(&payload).await?;
        let json: Value = resp.json().await.map_err(|e| AgentError::Provider {
            message: format!("malformed response body: {}", e),
            retryable: false,
        })?;
        Self::parse_response(&json)
    }

    async fn stream_chat(&self, req: ChatRequest<'_>) -> Result<ChunkStream, AgentError> {
        let payload = self.build_payload(&req, true);
        let resp = self.send(&payload).await?;

        struct StreamState {
            decoder: SseDecoder,
            pending: std::collections::VecDeque<StreamChunk>,
            done: bool,
        }

        let state = StreamState {
            decoder: SseDecoder::new(),
            pending: std::collections::VecDeque::new(),
            done: false,
        };

        let stream = futures_util::stream::try_unfold(
            (Box::pin(resp.bytes_stream()), state),
            |(mut bytes, mut state)| async move {
                loop {
                    if let Some(chunk) = state.pending.pop_front() {
                        return Ok(Some((chunk, (bytes, state))));
                    }
                    if state.done {
                        return Ok(None);
                    }
                    match bytes.next().await {
                        Some(Ok(buf)) => {
                            let text = String::from_utf8_lossy(&buf);
                            for event in state.decoder.push(&text) {
                                if event.is_done {
                                    state.done = true;
                                    break;
                                }
                                let Some(data) = event.data else {
                                    return Err(AgentError::Provider {
                                        message: "malformed stream chunk".into(),
                                        retryable: false,
                                    });
                                };
                                match serde_json::from_value::<StreamChunk>(data) {
                                    Ok(chunk) => state.pending.push_back(chunk),
                                    Err(e) => {
                                        return Err(AgentError::Provider {
                                            message: format!("malformed stream chunk: {}", e),
                                            retryable: false,
                                        });
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            return Err(AgentError::Provider {
                                message: format!("stream transport error: {}", e),
                                retryable: true,
                            });
                        }
                        None => return Ok(None),
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests;
