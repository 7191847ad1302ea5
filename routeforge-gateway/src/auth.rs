//! Bearer-token authentication: maps an `Authorization: Bearer <api_key>`
//! header to a `User` via the `Store` trait. No sessions, no JWTs — a
//! deployment that needs those layers them on top of this lookup.

use std::sync::Arc;

use crate::gateway_error::GatewayError;
use crate::store::{Store, User};

pub struct AuthService {
    store: Arc<dyn Store>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn authenticate(&self, authorization_header: Option<&str>) -> Result<User, GatewayError> {
        let api_key = extract_bearer_token(authorization_header).ok_or_else(|| GatewayError::Unauthorized {
            message: "missing or malformed Authorization header".to_string(),
        })?;

        let user = self
            .store
            .get_user_by_api_key(api_key)
            .await
            .map_err(|e| GatewayError::Internal {
                message: e.to_string(),
            })?
            .ok_or_else(|| GatewayError::Unauthorized {
                message: "invalid API key".to_string(),
            })?;

        Ok(user)
    }
}

fn extract_bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?;
    header.strip_prefix("Bearer ").map(str::trim).filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use rust_decimal::Decimal;

    fn sample_user() -> User {
        User {
            user_id: "u1".into(),
            api_key_id: "sk-test-0123456789abcdef".into(),
            credits: Decimal::new(10, 0),
            lock_version: 0,
            is_trial: false,
            subscription_indicators: vec![],
        }
    }

    #[test]
    fn extracts_token_from_bearer_header() {
        assert_eq!(extract_bearer_token(Some("Bearer sk-abc")), Some("sk-abc"));
    }

    #[test]
    fn rejects_non_bearer_schemes() {
        assert_eq!(extract_bearer_token(Some("Basic sk-abc")), None);
    }

    #[test]
    fn rejects_missing_header() {
        assert_eq!(extract_bearer_token(None), None);
    }

    #[tokio::test]
    async fn authenticate_resolves_a_known_key() {
        let store = InMemoryStore::new();
        store.seed_user(sample_user());
        let service = AuthService::new(store);
        let user = service
            .authenticate(Some("Bearer sk-test-0123456789abcdef"))
            .await
            .unwrap();
        assert_eq!(user.user_id, "u1");
    }

    #[tokio::test]
    async fn authenticate_rejects_an_unknown_key() {
        let store = InMemoryStore::new();
        let service = AuthService::new(store);
        let result = service.authenticate(Some("Bearer sk-unknown")).await;
        assert!(matches!(result, Err(GatewayError::Unauthorized { .. })));
    }
}
