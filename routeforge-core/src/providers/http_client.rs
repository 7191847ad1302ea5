//! Shared HTTP plumbing for provider adapters: auth header strategy,
//! request/response JSON (de)serialization, and upstream error
//! classification.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Response;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub enum AuthStrategy {
    Bearer { token: String },
    Header { name: String, value: String },
    None,
}

pub struct HttpProviderClient {
    http: reqwest::Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl HttpProviderClient {
    pub fn new(
        timeout: Duration,
        base_url: Option<String>,
        default_base_url: &str,
        extra_headers: &HashMap<String, String>,
        auth: AuthStrategy,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let mut default_headers = Self::build_headers(extra_headers, &auth)?;
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| default_base_url.to_string()),
            default_headers,
        })
    }

    fn build_headers(
        extra_headers: &HashMap<String, String>,
        auth: &AuthStrategy,
    ) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        match auth {
            AuthStrategy::Bearer { token } => {
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                    ProviderError::Configuration {
                        message: format!("invalid bearer token: {e}"),
                    }
                })?;
                headers.insert("Authorization", value);
            }
            AuthStrategy::Header { name, value } => {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    ProviderError::Configuration {
                        message: format!("invalid header name '{name}': {e}"),
                    }
                })?;
                let header_value = HeaderValue::from_str(value).map_err(|e| {
                    ProviderError::Configuration {
                        message: format!("invalid header value for '{name}': {e}"),
                    }
                })?;
                headers.insert(header_name, header_value);
            }
            AuthStrategy::None => {}
        }
        for (key, value) in extra_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        Ok(headers)
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub async fn post_json<TReq, TResp>(&self, path: &str, body: &TReq) -> Result<TResp, ProviderError>
    where
        TReq: Serialize + ?Sized,
        TResp: DeserializeOwned,
    {
        let response = self.post_json_raw(path, body).await?;
        Ok(response.json::<TResp>().await?)
    }

    pub async fn post_json_raw<TReq>(&self, path: &str, body: &TReq) -> Result<Response, ProviderError>
    where
        TReq: Serialize + ?Sized,
    {
        let response = self
            .http
            .post(self.build_url(path))
            .headers(self.default_headers.clone())
            .json(body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(map_error_response(response).await)
        }
    }

    pub async fn get_json<TResp>(&self, path: &str) -> Result<TResp, ProviderError>
    where
        TResp: DeserializeOwned,
    {
        let response = self
            .http
            .get(self.build_url(path))
            .headers(self.default_headers.clone())
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json::<TResp>().await?)
        } else {
            Err(map_error_response(response).await)
        }
    }
}

/// Maps a non-2xx upstream response into a `ProviderError`, preserving the
/// status code so `ProviderError::is_provider_side` can classify it.
pub async fn map_error_response(response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or(body);

    match status {
        401 => ProviderError::InvalidApiKey,
        404 => ProviderError::ModelNotFound {
            model: "unknown".to_string(),
        },
        429 => ProviderError::RateLimit,
        _ => ProviderError::Api {
            code: status,
            message,
        },
    }
}
