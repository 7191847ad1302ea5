//! Covers the provider chain walking `gpt-4o`/`llama-3.3-70b-instruct`
//! candidates in priority order: a failing higher-priority binding must not
//! surface to the caller as long as a lower-priority one still answers.

mod common;

use axum_test::TestServer;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use routeforge_gateway::config::{ApiKeyConfig, Config, ProviderEntry};

#[tokio::test]
async fn a_failing_primary_provider_fails_over_to_the_secondary_binding() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&failing)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::mock_chat_response("meta-llama/Llama-3.3-70B-Instruct-Turbo", "served by the backup")),
        )
        .mount(&healthy)
        .await;

    // `llama-3.3-70b-instruct`'s seeded catalog binds `fireworks` at
    // priority 1 and `together` at priority 2 — point the former at the
    // failing mock and the latter at the healthy one.
    let mut config = Config::default();
    config.auth.enabled = true;
    config.auth.api_keys = vec![ApiKeyConfig {
        key: common::API_KEY.to_string(),
        user_id: common::USER_ID.to_string(),
        enabled: true,
    }];
    config.providers.insert(
        "fireworks".to_string(),
        ProviderEntry {
            enabled: true,
            api_key: "key".to_string(),
            base_url: Some(failing.uri()),
            timeout: std::time::Duration::from_secs(5),
        },
    );
    config.providers.insert(
        "together".to_string(),
        ProviderEntry {
            enabled: true,
            api_key: "key".to_string(),
            base_url: Some(healthy.uri()),
            timeout: std::time::Duration::from_secs(5),
        },
    );

    let app = routeforge_gateway::create_server(config).await.unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {}", common::API_KEY))
        .json(&common::chat_request_body("llama-3.3-70b-instruct", "hi"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "served by the backup");
}

#[tokio::test]
async fn models_endpoint_serves_the_seeded_catalog() {
    let mock_server = MockServer::start().await;
    let config = common::test_config("openai", &mock_server.uri());
    let app = routeforge_gateway::create_server(config).await.unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server.get("/v1/models").await;
    response.assert_status_ok();
    let body: Value = response.json();
    let ids: Vec<&str> = body["data"].as_array().unwrap().iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"gpt-4o"));
    assert!(ids.contains(&"claude-3-5-sonnet"));
}

#[tokio::test]
async fn health_endpoint_reports_configured_providers() {
    let mock_server = MockServer::start().await;
    let config = common::test_config("openai", &mock_server.uri());
    let app = routeforge_gateway::create_server(config).await.unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert!(body["providers"].as_array().unwrap().iter().any(|p| p["provider"] == "openai"));
}

#[tokio::test]
async fn circuit_breaker_admin_endpoint_is_empty_before_any_traffic() {
    let mock_server = MockServer::start().await;
    let config = common::test_config("openai", &mock_server.uri());
    let app = routeforge_gateway::create_server(config).await.unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server.get("/admin/circuit-breakers").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["pairs"].as_array().unwrap().is_empty());
}
