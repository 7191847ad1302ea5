//! `ProviderAdapter` — the uniform call interface over heterogeneous
//! upstreams, plus a small static registry of concrete adapters
//! keyed by `provider_slug`. No dynamic dispatch beyond the trait object
//! itself; adapters are instantiated once at startup from configuration.

pub mod anthropic;
pub mod generic;
pub mod http_client;
pub mod openai;

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, StreamChunk};

pub type StreamResult = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub model_mapping: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: None,
            timeout: Duration::from_secs(120),
            model_mapping: HashMap::new(),
            headers: HashMap::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.model_mapping.insert(from.into(), to.into());
        self
    }
}

/// Uniform contract every upstream adapter implements. `binding`-to-wire
/// translation, HTTP issuance, and outcome classification are each
/// adapter's responsibility; the gateway's request pipeline only ever sees
/// this trait.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
    async fn stream_chat_completion(&self, request: ChatRequest) -> Result<StreamResult, ProviderError>;

    /// Cheap synthetic call used by `HealthTracker`'s probes.
    async fn health_check(&self) -> Result<Duration, ProviderError> {
        let started = std::time::Instant::now();
        self.chat_completion(ChatRequest {
            model: "health-check".to_string(),
            messages: vec![crate::models::Message::user("ping")],
            max_tokens: Some(1),
            ..Default::default()
        })
        .await?;
        Ok(started.elapsed())
    }
}

/// Static registry of the representative adapter set this engine ships.
/// A real deployment plugs in more providers by adding another arm here
/// and another `ProviderEntry` in configuration.
pub fn create_provider(config: ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    match config.name.clone().as_str() {
        "openai" => Ok(Box::new(openai::OpenAiProvider::new(config)?)),
        "anthropic" => Ok(Box::new(anthropic::AnthropicProvider::new(config)?)),
        other => Ok(Box::new(generic::GenericProvider::new(config, other.to_string())?)),
    }
}
