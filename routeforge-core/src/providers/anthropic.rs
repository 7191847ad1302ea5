//! Anthropic adapter: translates the canonical chat shape to/from
//! Anthropic's Messages API wire format.

use async_stream::stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, Choice, Delta, Message, Role, StreamChoice, StreamChunk, Usage};
use crate::providers::http_client::{AuthStrategy, HttpProviderClient};
use crate::providers::{Provider, ProviderConfig, StreamResult};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let mut headers = config.headers.clone();
        headers.insert("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string());
        let http = HttpProviderClient::new(
            config.timeout,
            config.base_url.clone(),
            DEFAULT_BASE_URL,
            &headers,
            AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: config.api_key.clone(),
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

    /// Anthropic has no "system" role message; fold any leading system
    /// messages into the top-level `system` field instead.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts = Vec::new();
        let mut converted = Vec::new();
        for message in messages {
            match message.role {
                Role::System => system_parts.push(message.content.clone()),
                Role::User | Role::Tool => converted.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: message.content.clone(),
                }),
                Role::Assistant => converted.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: message.content.clone(),
                }),
            }
        }
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        };
        (system, converted)
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> AnthropicRequest {
        let (system, messages) = Self::convert_messages(&request.messages);
        AnthropicRequest {
            model: self.map_model(&request.model),
            max_tokens: request.max_tokens.unwrap_or(1024),
            messages,
            system,
            temperature: request.temperature,
            stream,
        }
    }

    fn convert_response(response: AnthropicResponse) -> ChatResponse {
        let content = response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");
        ChatResponse {
            id: response.id,
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: response.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: response.stop_reason,
                logprobs: None,
            }],
            usage: Some(Usage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response.usage.input_tokens + response.usage.output_tokens,
            }),
            system_fingerprint: None,
        }
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let anthropic_request = self.build_request(&request, false);
        let response: AnthropicResponse = self.http.post_json("/v1/messages", &anthropic_request).await?;
        Ok(Self::convert_response(response))
    }

    async fn stream_chat_completion(&self, request: ChatRequest) -> Result<StreamResult, ProviderError> {
        let model = self.map_model(&request.model);
        let anthropic_request = self.build_request(&request, true);
        let response = self.http.post_json_raw("/v1/messages", &anthropic_request).await?;
        let mut byte_stream = response.bytes_stream();

        let sse_stream = stream! {
            use futures::StreamExt;
            let mut buffer = String::new();
            let mut usage_so_far: Option<AnthropicUsage> = None;
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
                    let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(data) else { continue };
                    if let Some(usage) = event.usage {
                        usage_so_far = Some(usage);
                    }
                    let text = event.delta.and_then(|d| d.text);
                    let is_final = event.event_type == "message_stop";
                    if text.is_some() || is_final {
                        yield Ok(StreamChunk {
                            id: "anthropic-stream".to_string(),
                            object: "chat.completion.chunk".to_string(),
                            created: chrono::Utc::now().timestamp() as u64,
                            model: model.clone(),
                            choices: vec![StreamChoice {
                                index: 0,
                                delta: Delta {
                                    content: text,
                                    ..Default::default()
                                },
                                finish_reason: if is_final { Some("stop".to_string()) } else { None },
                            }],
                            usage: if is_final {
                                usage_so_far.as_ref().map(|u| Usage {
                                    prompt_tokens: u.input_tokens,
                                    completion_tokens: u.output_tokens,
                                    total_tokens: u.input_tokens + u.output_tokens,
                                })
                            } else {
                                None
                            },
                        });
                    }
                    if is_final {
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(sse_stream))
    }
}
