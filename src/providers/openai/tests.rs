use super::*;
use crate::providers::base::Message;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn simple_chat_request(content: &str) -> ChatRequest<'_> {
    ChatRequest {
        messages: vec![Message::user(content)],
        tools: None,
        model: None,
        max_tokens: 1024,
        temperature: 0.7,
    }
}

fn provider_for(server: &MockServer) -> OpenAIProvider {
    OpenAIProvider::new("test_key".to_string(), None, Some(server.uri()))
}

#[tokio::test]
async fn chat_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("Authorization", "Bearer test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Hello! How can I help?"
                },
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 8, "total_tokens": 18}
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let result = provider.chat(simple_chat_request("Hi")).await.unwrap();

    assert_eq!(result.content.unwrap(), "Hello! How can I help?");
    assert!(result.tool_calls.is_empty());
    assert_eq!(result.finish_reason, Some(FinishReason::Stop));
    assert_eq!(result.usage.unwrap().input_tokens, 10);
}

#[tokio::test]
async fn chat_with_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "file_operations",
                            "arguments": "{\"type\": \"read\", \"path\": \"a.txt\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let result = provider
        .chat(simple_chat_request("read a.txt"))
        .await
        .unwrap();

    assert!(result.has_tool_calls());
    assert_eq!(result.tool_calls[0].name, "file_operations");
    assert_eq!(result.tool_calls[0].id, "call_123");
    assert_eq!(result.tool_calls[0].arguments["path"], "a.txt");
    assert_eq!(result.finish_reason, Some(FinishReason::ToolCalls));
}

#[tokio::test]
async fn chat_error_status_maps_to_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"type": "authentication_error", "message": "Invalid API key"}
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider.chat(simple_chat_request("Hi")).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Provider {
            retryable: false,
            ..
        }
    ));
    assert!(err.to_string().contains("authentication_error"));
}

#[tokio::test]
async fn chat_rate_limit_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"type": "rate_limit", "message": "Too many requests"}
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider.chat(simple_chat_request("Hi")).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn stream_chat_yields_chunks_until_done() {
    let body = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream_chat(simple_chat_request("Hi"))
        .await
        .unwrap();

    let mut text = String::new();
    let mut finish = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                text.push_str(content);
            }
            if let Some(fr) = choice.finish_reason {
                finish = Some(fr);
            }
        }
    }
    assert_eq!(text, "Hello");
    assert_eq!(finish, Some(FinishReason::Stop));
}

#[tokio::test]
async fn stream_chat_tool_call_deltas() {
    let body = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_9\",\"function\":{\"name\":\"shell_execute\",\"arguments\":\"\"}}]},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"command\\\":\"}}]},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"ls\\\"}\"}}]},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream_chat(simple_chat_request("run ls"))
        .await
        .unwrap();

    let mut arguments = String::new();
    let mut name = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        for choice in &chunk.choices {
            for tc in choice.delta.tool_calls.as_deref().unwrap_or_default() {
                if let Some(n) = &tc.function.name {
                    name = Some(n.clone());
                }
                if let Some(args) = &tc.function.arguments {
                    arguments.push_str(args);
                }
            }
        }
    }
    assert_eq!(name.as_deref(), Some("shell_execute"));
    assert_eq!(arguments, "{\"command\":\"ls\"}");
}

#[tokio::test]
async fn stream_chat_malformed_chunk_is_error() {
    let body = "data: {not json}\n\n";
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream_chat(simple_chat_request("Hi"))
        .await
        .unwrap();
    let first = stream.next().await.unwrap();
    assert!(matches!(first, Err(AgentError::Provider { .. })));
}
