//! Shared fixtures for the integration tests in this directory: a `Config`
//! wired to a `wiremock` server standing in for the upstream provider, plus
//! the request/response JSON bodies the tests assert against.

use std::time::Duration;

use routeforge_gateway::config::{ApiKeyConfig, Config, ProviderEntry};

pub const API_KEY: &str = "sk-test-0123456789abcdef";
pub const USER_ID: &str = "test-user";

pub fn test_config(provider_slug: &str, base_url: &str) -> Config {
    let mut config = Config::default();
    config.auth.enabled = true;
    config.auth.api_keys = vec![ApiKeyConfig {
        key: API_KEY.to_string(),
        user_id: USER_ID.to_string(),
        enabled: true,
    }];
    config.providers.insert(
        provider_slug.to_string(),
        ProviderEntry {
            enabled: true,
            api_key: "upstream-test-key".to_string(),
            base_url: Some(base_url.to_string()),
            timeout: Duration::from_secs(5),
        },
    );
    config
}

pub fn chat_request_body(model: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": content}],
    })
}

pub fn mock_chat_response(model: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
    })
}

pub fn sse_stream_body(model: &str, deltas: &[&str]) -> String {
    let mut body = String::new();
    for (i, delta) in deltas.iter().enumerate() {
        let chunk = serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{
                "index": 0,
                "delta": {"content": delta},
                "finish_reason": if i == deltas.len() - 1 { Some("stop") } else { None },
            }],
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}
