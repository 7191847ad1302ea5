//! Error types for the routing/catalog/provider layer.
//!
//! `CoreError` is the crate-level error surface returned by the registry,
//! selector, pricing resolver and catalog cache. `ProviderError` is specific
//! to upstream adapter calls and is classified by
//! `ProviderError::is_provider_side` into breaker-affecting vs. client-side
//! failures (see `circuit_breaker`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("routing error: {message}")]
    Routing { message: String },

    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("model not found: {input}")]
    ModelNotFound { input: String },

    #[error("no provider available for {canonical_id}")]
    NoProviderAvailable { canonical_id: String },

    #[error("pricing anomaly for ({canonical_id}, {provider_slug}): {message}")]
    PricingAnomaly {
        canonical_id: String,
        provider_slug: String,
        message: String,
    },

    #[error("timeout")]
    Timeout,
}

/// Outcome of one upstream adapter call, used to decide whether a failure
/// should count against a `(provider_slug, canonical_id)` circuit breaker.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {code} - {message}")]
    Api { code: u16, message: String },

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("timeout")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response format")]
    InvalidResponse,

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("provider not supported: {provider}")]
    ProviderNotSupported { provider: String },

    #[error("feature not supported: {feature}")]
    FeatureNotSupported { feature: String },

    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("request validation failed: {field} - {message}")]
    ValidationError { field: String, message: String },

    #[error("content filtered by upstream: {message}")]
    ContentFilter { message: String },

    #[error("network error: {message}")]
    NetworkError { message: String },
}

impl ProviderError {
    /// Classification: provider-side failures count toward a
    /// circuit breaker; client/request-side failures never do.
    pub fn is_provider_side(&self) -> bool {
        match self {
            ProviderError::Http(_)
            | ProviderError::ServiceUnavailable
            | ProviderError::Timeout
            | ProviderError::RateLimit
            | ProviderError::NetworkError { .. } => true,
            ProviderError::Api { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }

    /// Whether the caller should retry against the next binding in the
    /// chain, as opposed to short-circuiting with the error verbatim.
    pub fn is_retryable(&self) -> bool {
        self.is_provider_side()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_unavailable_is_provider_side() {
        assert!(ProviderError::ServiceUnavailable.is_provider_side());
    }

    #[test]
    fn invalid_api_key_is_not_provider_side() {
        assert!(!ProviderError::InvalidApiKey.is_provider_side());
    }

    #[test]
    fn api_5xx_is_provider_side_but_4xx_is_not() {
        assert!(ProviderError::Api {
            code: 503,
            message: "x".into()
        }
        .is_provider_side());
        assert!(!ProviderError::Api {
            code: 400,
            message: "x".into()
        }
        .is_provider_side());
        assert!(ProviderError::Api {
            code: 429,
            message: "x".into()
        }
        .is_provider_side());
    }
}
