//! OpenAI (and OpenAI-wire-compatible) adapter. The wire format here is
//! already this crate's canonical `ChatRequest`/`ChatResponse`/`StreamChunk`
//! shape, so this adapter is mostly a thin pass-through plus SSE framing.

use async_stream::stream;

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, StreamChunk};
use crate::providers::http_client::{AuthStrategy, HttpProviderClient};
use crate::providers::{Provider, ProviderConfig, StreamResult};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = HttpProviderClient::new(
            config.timeout,
            config.base_url.clone(),
            DEFAULT_BASE_URL,
            &config.headers,
            AuthStrategy::Bearer {
                token: config.api_key.clone(),
            },
        )?;
        Ok(Self { http, config })
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
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
    fn model_mapping_falls_back_to_the_requested_name() {
        let provider = OpenAiProvider::new(ProviderConfig::new("openai", "sk-test")).unwrap();
        assert_eq!(provider.map_model("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn model_mapping_honors_configured_overrides() {
        let config =
            ProviderConfig::new("openai", "sk-test").with_model_mapping("gpt-4o", "gpt-4o-2024-08-06");
        let provider = OpenAiProvider::new(config).unwrap();
        assert_eq!(provider.map_model("gpt-4o"), "gpt-4o-2024-08-06");
    }
}
