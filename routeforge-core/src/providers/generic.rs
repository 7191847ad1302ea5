//! Generic adapter for any upstream that speaks the OpenAI chat-completions
//! wire format with bearer-token auth — the common case for the long tail
//! of OpenAI-compatible providers (`fireworks`, `together`, `openrouter`,
//! `groq`, and similar) that this engine doesn't need a bespoke adapter
//! for. A provider with its own non-conforming wire format gets its own
//! module instead, as `anthropic` and `openai` do.

use async_stream::stream;

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, StreamChunk};
use crate::providers::http_client::{AuthStrategy, HttpProviderClient};
use crate::providers::{Provider, ProviderConfig, StreamResult};

pub struct GenericProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
    slug: String,
}

impl GenericProvider {
    pub fn new(config: ProviderConfig, slug: String) -> Result<Self, ProviderError> {
        let base_url = config.base_url.clone().ok_or_else(|| ProviderError::Configuration {
            message: format!("provider '{slug}' requires an explicit base_url"),
        })?;
        let http = HttpProviderClient::new(
            config.timeout,
            Some(base_url.clone()),
            &base_url,
            &config.headers,
            AuthStrategy::Bearer {
                token: config.api_key.clone(),
            },
        )?;
        Ok(Self { http, config, slug })
    }

    fn map_model(&self, model: &str) -> String {
        self.config
            .model_mapping
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }
}

#[async_trait::async_trait]
impl Provider for GenericProvider {
    fn name(&self) -> &str {
        &self.slug
    }

    async fn chat_completion(&self, mut request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        request.model = self.map_model(&request.model);
        request.stream = Some(false);
        self.http.post_json("/v1/chat/completions", &request).await
    }

    async fn stream_chat_completion(&self, mut request: ChatRequest) -> Result<StreamResult, ProviderError> {
        request.model = self.map_model(&request.model);
        request.stream = Some(true);

        let response = self.http.post_json_raw("/v1/chat/completions", &request).await?;
        let mut byte_stream = response.bytes_stream();

        let sse_stream = stream! {
            use futures::StreamExt;
            let mut buffer = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(ProviderError::NetworkError { message: e.to_string() });
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer.drain(..=newline_pos);
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => yield Ok(parsed),
                        Err(e) => yield Err(ProviderError::Serialization(e)),
                    }
                }
            }
        };

        Ok(Box::pin(sse_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_an_explicit_base_url() {
        let config = ProviderConfig::new("fireworks", "key");
        assert!(GenericProvider::new(config, "fireworks".to_string()).is_err());
    }

    #[test]
    fn name_reflects_the_configured_slug() {
        let config = ProviderConfig::new("fireworks", "key").with_base_url("https://api.fireworks.ai");
        let provider = GenericProvider::new(config, "fireworks".to_string()).unwrap();
        assert_eq!(provider.name(), "fireworks");
    }
}
