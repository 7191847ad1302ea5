//! HTTP-facing error taxonomy for the gateway.
//!
//! `GatewayError` wraps the lower-level `CoreError`/`ProviderError` types
//! from `routeforge_core` plus the gateway's own request-lifecycle failures
//! (auth, rate limiting, credits, settlement) and converts all of them into
//! the OpenAI error envelope at the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use routeforge_core::{CoreError, ProviderError};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("core error: {0}")]
    Core(CoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_seconds: u64,
    },

    #[error("insufficient credits")]
    InsufficientCredits {
        current_credits: String,
        required_credits: String,
        credit_deficit: String,
        suggested_max_tokens: Option<u32>,
        requested_model: String,
        request_id: String,
        suggestions: Vec<String>,
    },

    #[error("model unknown: {requested}")]
    ModelUnknown { requested: String },

    #[error("no provider available for {canonical_id}")]
    NoProviderAvailable { canonical_id: String },

    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("validation error: {field} - {message}")]
    ValidationError { field: String, message: String },

    #[error("content filtered: {message}")]
    ContentFilter { message: String },

    #[error("pricing anomaly for ({canonical_id}, {provider_slug}): {message}")]
    PricingAnomaly {
        canonical_id: String,
        provider_slug: String,
        message: String,
    },

    #[error("settlement journaled for request {request_id}")]
    DeductionFailed { request_id: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// `CoreError::PricingAnomaly` gets its own client-facing type and a
/// critical alert logged at the point of conversion; every other `CoreError`
/// variant maps to the generic `internal_error` bucket.
impl From<CoreError> for GatewayError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::PricingAnomaly {
                canonical_id,
                provider_slug,
                message,
            } => {
                error!(
                    alert = true,
                    canonical_id = %canonical_id,
                    provider_slug = %provider_slug,
                    message = %message,
                    "pricing anomaly detected"
                );
                GatewayError::PricingAnomaly {
                    canonical_id,
                    provider_slug,
                    message,
                }
            }
            other => GatewayError::Core(other),
        }
    }
}

impl GatewayError {
    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Core(_) => "internal_error",
            GatewayError::Provider(_) => "provider_error",
            GatewayError::Unauthorized { .. } => "unauthorized",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::InsufficientCredits { .. } => "insufficient_credits",
            GatewayError::ModelUnknown { .. } => "model_unknown",
            GatewayError::NoProviderAvailable { .. } => "no_provider_available",
            GatewayError::ProviderUnavailable { .. } => "provider_unavailable",
            GatewayError::ValidationError { .. } => "validation_error",
            GatewayError::ContentFilter { .. } => "content_filter",
            GatewayError::PricingAnomaly { .. } => "pricing_anomaly",
            GatewayError::DeductionFailed { .. } => "deduction_failed",
            GatewayError::Internal { .. } => "internal_error",
            GatewayError::Serialization(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Provider(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            GatewayError::ModelUnknown { .. } => StatusCode::NOT_FOUND,
            GatewayError::NoProviderAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ProviderUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            GatewayError::ContentFilter { .. } => StatusCode::BAD_REQUEST,
            GatewayError::PricingAnomaly { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::DeductionFailed { .. } => StatusCode::OK,
            GatewayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_type = self.error_type();

        let body = match &self {
            GatewayError::RateLimited {
                message,
                retry_after_seconds,
            } => json!({
                "error": {
                    "message": message,
                    "type": error_type,
                    "code": status.as_u16(),
                    "retry_after_seconds": retry_after_seconds,
                }
            }),
            GatewayError::InsufficientCredits {
                current_credits,
                required_credits,
                credit_deficit,
                suggested_max_tokens,
                requested_model,
                request_id,
                suggestions,
            } => json!({
                "error": {
                    "message": "insufficient credits for this request",
                    "type": error_type,
                    "code": status.as_u16(),
                    "current_credits": current_credits,
                    "required_credits": required_credits,
                    "credit_deficit": credit_deficit,
                    "suggested_max_tokens": suggested_max_tokens,
                    "requested_model": requested_model,
                    "request_id": request_id,
                    "suggestions": suggestions,
                }
            }),
            GatewayError::ContentFilter { message } => json!({
                "error": {
                    "message": message,
                    "type": error_type,
                    "code": status.as_u16(),
                }
            }),
            _ => json!({
                "error": {
                    "message": self.to_string(),
                    "type": error_type,
                    "code": status.as_u16(),
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_credits_maps_to_402() {
        let err = GatewayError::InsufficientCredits {
            current_credits: "0.05".into(),
            required_credits: "0.20".into(),
            credit_deficit: "0.15".into(),
            suggested_max_tokens: Some(1024),
            requested_model: "gpt-4o".into(),
            request_id: "req_1".into(),
            suggestions: vec!["reduce max_tokens".into()],
        };
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn deduction_failed_does_not_change_the_already_sent_response_status() {
        let err = GatewayError::DeductionFailed {
            request_id: "req_2".into(),
        };
        assert_eq!(err.status(), StatusCode::OK);
    }

    #[test]
    fn no_provider_available_is_503() {
        let err = GatewayError::NoProviderAvailable {
            canonical_id: "llama-3.3-70b-instruct".into(),
        };
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn content_filter_maps_to_400_with_the_upstream_message() {
        let err = GatewayError::ContentFilter {
            message: "flagged for self-harm content".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "content_filter");
    }

    #[test]
    fn core_pricing_anomaly_converts_to_the_dedicated_variant() {
        let core_err = CoreError::PricingAnomaly {
            canonical_id: "gpt-4o".into(),
            provider_slug: "openai".into(),
            message: "high-value model has no explicit pricing".into(),
        };
        let err: GatewayError = core_err.into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_type(), "pricing_anomaly");
        assert!(matches!(err, GatewayError::PricingAnomaly { .. }));
    }

    #[test]
    fn other_core_errors_fall_back_to_the_generic_internal_error() {
        let core_err = CoreError::Routing {
            message: "no binding".into(),
        };
        let err: GatewayError = core_err.into();
        assert_eq!(err.error_type(), "internal_error");
        assert!(matches!(err, GatewayError::Core(_)));
    }
}
