//! End-to-end coverage of `POST /v1/chat/completions` against a real axum
//! `Router` built by `create_server`, with the upstream provider replaced by
//! a `wiremock` server.

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server_with_mock(provider_slug: &str, mock_server: &MockServer) -> TestServer {
    let config = common::test_config(provider_slug, &mock_server.uri());
    let app = routeforge_gateway::create_server(config).await.unwrap();
    TestServer::new(app).unwrap()
}

#[tokio::test]
async fn happy_path_chat_completion_routes_to_the_bound_provider() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::mock_chat_response("gpt-4o", "hello there")))
        .mount(&mock_server)
        .await;

    let server = server_with_mock("openai", &mock_server).await;

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {}", common::API_KEY))
        .json(&common::chat_request_body("gpt-4o", "hi there"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "hello there");
    assert_eq!(body["usage"]["total_tokens"], 15);
}

#[tokio::test]
async fn legacy_provider_slash_model_input_bypasses_the_registry() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::mock_chat_response("echo-v1", "echoed")))
        .mount(&mock_server)
        .await;

    let server = server_with_mock("customprovider", &mock_server).await;

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {}", common::API_KEY))
        .json(&common::chat_request_body("customprovider/echo-v1", "hi"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "echoed");
}

#[tokio::test]
async fn streaming_request_yields_sse_frames_terminated_by_done() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(common::sse_stream_body("gpt-4o", &["Hel", "lo"]).into_bytes(), "text/event-stream"),
        )
        .mount(&mock_server)
        .await;

    let server = server_with_mock("openai", &mock_server).await;

    let mut body = common::chat_request_body("gpt-4o", "hi");
    body["stream"] = serde_json::json!(true);

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {}", common::API_KEY))
        .json(&body)
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let text = response.text();
    assert!(text.contains("Hel"));
    assert!(text.contains("lo"));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn missing_bearer_token_is_unauthorized() {
    let mock_server = MockServer::start().await;
    let server = server_with_mock("openai", &mock_server).await;

    let response = server
        .post("/v1/chat/completions")
        .json(&common::chat_request_body("gpt-4o", "hi"))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_model_is_not_found() {
    let mock_server = MockServer::start().await;
    let server = server_with_mock("openai", &mock_server).await;

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {}", common::API_KEY))
        .json(&common::chat_request_body("totally-unknown-model", "hi"))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_messages_is_a_validation_error() {
    let mock_server = MockServer::start().await;
    let server = server_with_mock("openai", &mock_server).await;

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {}", common::API_KEY))
        .json(&serde_json::json!({"model": "gpt-4o", "messages": []}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn a_request_priced_beyond_the_balance_is_rejected_with_a_deficit() {
    // No mock mounted: the provider must never be called once the
    // reservation fails.
    let mock_server = MockServer::start().await;
    let server = server_with_mock("openai", &mock_server).await;

    let mut body = common::chat_request_body("gpt-4o", "hi");
    body["max_tokens"] = serde_json::json!(500_000_000u64);

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {}", common::API_KEY))
        .json(&body)
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let json: Value = response.json();
    assert!(json["error"]["suggestions"].is_array());
    assert!(json["error"]["credit_deficit"].is_string());
}
