//! Per-request context threaded through the chat completion handler: what
//! the caller asked for, who they are, and timing for tracing/metrics.

use std::time::Instant;

use routeforge_core::models::Message;
use uuid::Uuid;

use crate::store::User;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub user: User,
    pub model_input: String,
    pub canonical_id: Option<String>,
    pub messages: Vec<Message>,
    pub max_output_tokens: u32,
    pub stream: bool,
    pub preferred_provider: Option<String>,
    #[cfg_attr(not(test), allow(dead_code))]
    start_time: Instant,
}

impl RequestContext {
    pub fn new(
        user: User,
        model_input: String,
        messages: Vec<Message>,
        max_output_tokens: u32,
        stream: bool,
        preferred_provider: Option<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user,
            model_input,
            canonical_id: None,
            messages,
            max_output_tokens,
            stream,
            preferred_provider,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "inference_request",
            request_id = %self.request_id,
            user_id = %self.user.user_id,
            canonical_id = self.canonical_id.as_deref().unwrap_or("unresolved"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn user() -> User {
        User {
            user_id: "u1".into(),
            api_key_id: "key".into(),
            credits: Decimal::new(10, 0),
            lock_version: 0,
            is_trial: false,
            subscription_indicators: vec![],
        }
    }

    #[test]
    fn new_context_generates_a_unique_request_id() {
        let a = RequestContext::new(user(), "gpt-4o".into(), vec![], 100, false, None);
        let b = RequestContext::new(user(), "gpt-4o".into(), vec![], 100, false, None);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn elapsed_is_nonzero_after_construction() {
        let ctx = RequestContext::new(user(), "gpt-4o".into(), vec![], 100, false, None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(ctx.elapsed().as_millis() >= 5);
    }
}
