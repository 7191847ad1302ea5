//! Pre-flight credit reservation and post-completion settlement.
//!
//! This is the subsystem that must never double-charge and must never
//! silently drop revenue: `reserve` does pure arithmetic against the
//! caller-visible balance with no database write, and `settle` performs an
//! optimistic-locking decrement with bounded retries, falling back to a
//! durable failure journal rather than losing the charge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use routeforge_core::catalog::Pricing;
use routeforge_core::models::Usage;

use crate::store::{CreditDeductionFailure, CreditTransaction, Store, StoreError, User};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsufficientCredits {
    pub current_credits: Decimal,
    pub required_credits: Decimal,
    pub credit_deficit: Decimal,
    pub suggested_max_tokens: Option<u32>,
    pub requested_model: String,
    pub request_id: String,
    pub suggestions: Vec<String>,
}

pub enum ReserveOutcome {
    Ok,
    Insufficient(InsufficientCredits),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled { amount: Decimal },
    Journaled { reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct CreditGuardConfig {
    pub inner_retries: u32,
    pub inner_backoff: [Duration; 3],
    pub outer_retries: u32,
    pub outer_backoff: Duration,
}

impl Default for CreditGuardConfig {
    fn default() -> Self {
        Self {
            inner_retries: 3,
            inner_backoff: [
                Duration::from_millis(10),
                Duration::from_millis(25),
                Duration::from_millis(60),
            ],
            outer_retries: 2,
            outer_backoff: Duration::from_secs(1),
        }
    }
}

pub struct CreditGuard {
    store: Arc<dyn Store>,
    config: CreditGuardConfig,
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp(2)
}

fn compute_cost(
    pricing: &Pricing,
    prompt_tokens: u64,
    completion_tokens: u64,
    request_count: u64,
    image_count: u64,
) -> Decimal {
    Decimal::from(prompt_tokens) * pricing.prompt
        + Decimal::from(completion_tokens) * pricing.completion
        + Decimal::from(request_count) * pricing.request
        + Decimal::from(image_count) * pricing.image
}

impl CreditGuard {
    pub fn new(store: Arc<dyn Store>, config: CreditGuardConfig) -> Self {
        Self { store, config }
    }

    /// `subscription_indicator_count` drives the trial
    /// override: three or more indicators on a trial account signals a
    /// probable webhook-delivery failure upstream (the billing system
    /// thinks the trial ended but never told us), so we charge anyway and
    /// alert rather than silently giving away paid usage.
    pub fn reserve(
        &self,
        user: &User,
        request_id: &str,
        requested_model: &str,
        pricing: &Pricing,
        input_tokens_estimate: u64,
        max_output_tokens: u32,
        image_count: u64,
    ) -> ReserveOutcome {
        let mut is_trial = user.is_trial;
        if is_trial && !user.subscription_indicators.is_empty() {
            is_trial = false;
            if user.subscription_indicators.len() >= 3 {
                tracing::error!(
                    alert = true,
                    alert_kind = "trial_override_webhook_failure",
                    user_id = %user.user_id,
                    indicator_count = user.subscription_indicators.len(),
                    "trial user has >=3 subscription indicators; charging as paid"
                );
            }
        }

        if is_trial {
            return ReserveOutcome::Ok;
        }

        let max_cost = compute_cost(pricing, input_tokens_estimate, max_output_tokens as u64, 1, image_count);

        if user.credits < max_cost {
            let deficit = round2(max_cost - user.credits);
            let suggested_max_tokens = if max_cost > Decimal::ZERO {
                let scaled = (Decimal::from(max_output_tokens) * user.credits / max_cost)
                    .floor()
                    .to_string()
                    .parse::<u32>()
                    .unwrap_or(0);
                (scaled >= 100).then_some(scaled)
            } else {
                None
            };

            let mut suggestions = vec![format!(
                "your balance is short by ${deficit} for this request"
            )];
            if let Some(tokens) = suggested_max_tokens {
                suggestions.push(format!("retry with max_tokens={tokens} to fit your balance"));
            }

            return ReserveOutcome::Insufficient(InsufficientCredits {
                current_credits: round2(user.credits),
                required_credits: round2(max_cost),
                credit_deficit: deficit,
                suggested_max_tokens,
                requested_model: requested_model.to_string(),
                request_id: request_id.to_string(),
                suggestions,
            });
        }

        ReserveOutcome::Ok
    }

    /// Settlement: optimistic-locking decrement with bounded retries.
    /// `estimated` tags the transaction metadata when `actual_usage` was
    /// derived from a byte-length heuristic rather than a provider usage
    /// frame (see the streaming fallback in the chat completion handler).
    pub async fn settle(
        &self,
        user_id: &str,
        request_id: &str,
        pricing: &Pricing,
        actual_usage: &Usage,
        image_count: u64,
        estimated: bool,
    ) -> SettlementOutcome {
        let actual_cost = compute_cost(
            pricing,
            actual_usage.prompt_tokens as u64,
            actual_usage.completion_tokens as u64,
            1,
            image_count,
        );

        let mut last_error = String::new();
        for attempt in 0..self.config.inner_retries {
            let user = match self.store.get_user(user_id).await {
                Ok(u) => u,
                Err(e) => {
                    last_error = e.to_string();
                    break;
                }
            };

            match self
                .store
                .decrement_credits(user_id, user.lock_version, actual_cost)
                .await
            {
                Ok(balance_after) => {
                    let mut metadata = HashMap::new();
                    if estimated {
                        metadata.insert("estimated".to_string(), "true".to_string());
                    }
                    let _ = self
                        .store
                        .record_transaction(CreditTransaction {
                            id: uuid::Uuid::new_v4().to_string(),
                            user_id: user_id.to_string(),
                            request_id: request_id.to_string(),
                            amount: actual_cost,
                            balance_after,
                            created_at: chrono::Utc::now(),
                            metadata,
                        })
                        .await;
                    return SettlementOutcome::Settled { amount: actual_cost };
                }
                Err(StoreError::LockConflict { .. }) => {
                    if let Some(backoff) = self.config.inner_backoff.get(attempt as usize) {
                        tokio::time::sleep(*backoff).await;
                    }
                    continue;
                }
                Err(e) => {
                    last_error = e.to_string();
                    break;
                }
            }
        }

        self.journal_failure(user_id, request_id, actual_cost, &last_error).await
    }

    /// Streaming wrapper around `settle`: an outer retry loop on top of
    /// `settle`'s own inner retries, since usage only arrives once the
    /// stream has fully drained and a transient store blip at that moment
    /// should not cost real revenue.
    pub async fn settle_streaming(
        &self,
        user_id: &str,
        request_id: &str,
        pricing: &Pricing,
        actual_usage: &Usage,
        image_count: u64,
        estimated: bool,
    ) -> SettlementOutcome {
        let mut outcome = self
            .settle(user_id, request_id, pricing, actual_usage, image_count, estimated)
            .await;

        let mut attempt = 0;
        while matches!(outcome, SettlementOutcome::Journaled { .. }) && attempt < self.config.outer_retries {
            tokio::time::sleep(self.config.outer_backoff * (attempt + 1)).await;
            outcome = self
                .settle(user_id, request_id, pricing, actual_usage, image_count, estimated)
                .await;
            attempt += 1;
        }

        if let SettlementOutcome::Journaled { reason } = &outcome {
            tracing::error!(
                alert = true,
                alert_kind = "settlement_exhausted",
                request_id,
                user_id,
                reason,
                "streaming settlement exhausted all retries, journaled for reconciliation"
            );
        }

        outcome
    }

    async fn journal_failure(
        &self,
        user_id: &str,
        request_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> SettlementOutcome {
        let reason = if reason.is_empty() {
            "optimistic lock retries exhausted".to_string()
        } else {
            reason.to_string()
        };
        let _ = self
            .store
            .record_deduction_failure(CreditDeductionFailure {
                request_id: request_id.to_string(),
                user_id: user_id.to_string(),
                amount,
                reason: reason.clone(),
                created_at: chrono::Utc::now(),
            })
            .await;
        tracing::error!(
            alert = true,
            alert_kind = "deduction_failed",
            request_id,
            user_id,
            reason = %reason,
            "credit deduction failed and was journaled"
        );
        SettlementOutcome::Journaled { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::str::FromStr;

    fn pricing() -> Pricing {
        Pricing {
            prompt: Decimal::from_str("0.0000009").unwrap(),
            completion: Decimal::from_str("0.0000009").unwrap(),
            request: Decimal::ZERO,
            image: Decimal::ZERO,
            web_search: Decimal::ZERO,
            reasoning: Decimal::ZERO,
        }
    }

    fn user(credits: &str, is_trial: bool, indicators: Vec<String>) -> User {
        User {
            user_id: "u1".into(),
            api_key_id: "key".into(),
            credits: Decimal::from_str(credits).unwrap(),
            lock_version: 0,
            is_trial,
            subscription_indicators: indicators,
        }
    }

    #[test]
    fn happy_path_reservation_succeeds() {
        let store = InMemoryStore::new();
        let guard = CreditGuard::new(store, CreditGuardConfig::default());
        let outcome = guard.reserve(
            &user("10.000000000", false, vec![]),
            "req_1",
            "llama-3.3-70b-instruct",
            &pricing(),
            100,
            50,
            0,
        );
        assert!(matches!(outcome, ReserveOutcome::Ok));
    }

    #[test]
    fn insufficient_credits_carries_deficit_and_suggestion() {
        let store = InMemoryStore::new();
        let guard = CreditGuard::new(store, CreditGuardConfig::default());
        let pricing = Pricing {
            prompt: Decimal::from_str("0.00001").unwrap(),
            completion: Decimal::from_str("0.00005").unwrap(),
            request: Decimal::ZERO,
            image: Decimal::ZERO,
            web_search: Decimal::ZERO,
            reasoning: Decimal::ZERO,
        };
        let outcome = guard.reserve(
            &user("0.05", false, vec![]),
            "req_2",
            "gpt-4o",
            &pricing,
            100,
            4096,
            0,
        );
        match outcome {
            ReserveOutcome::Insufficient(detail) => {
                assert_eq!(detail.credit_deficit, Decimal::from_str("0.16").unwrap());
                assert!(detail.suggested_max_tokens.is_some());
            }
            ReserveOutcome::Ok => panic!("expected insufficient"),
        }
    }

    #[test]
    fn trial_user_skips_cost_math() {
        let store = InMemoryStore::new();
        let guard = CreditGuard::new(store, CreditGuardConfig::default());
        let outcome = guard.reserve(
            &user("0.00", true, vec![]),
            "req_3",
            "gpt-4o",
            &pricing(),
            1_000_000,
            1_000_000,
            0,
        );
        assert!(matches!(outcome, ReserveOutcome::Ok));
    }

    #[test]
    fn trial_with_three_indicators_is_charged_as_paid() {
        let store = InMemoryStore::new();
        let guard = CreditGuard::new(store, CreditGuardConfig::default());
        let outcome = guard.reserve(
            &user("0.00", true, vec!["a".into(), "b".into(), "c".into()]),
            "req_4",
            "gpt-4o",
            &pricing(),
            1_000_000,
            1_000_000,
            0,
        );
        assert!(matches!(outcome, ReserveOutcome::Insufficient(_)));
    }

    #[tokio::test]
    async fn settle_decrements_and_records_a_transaction() {
        let store = InMemoryStore::new();
        store.seed_user(user("10.000000000", false, vec![]));
        let guard = CreditGuard::new(store.clone(), CreditGuardConfig::default());
        let usage = Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        };
        let outcome = guard
            .settle("u1", "req_5", &pricing(), &usage, 0, false)
            .await;
        assert!(matches!(outcome, SettlementOutcome::Settled { .. }));
        let after = store.get_user("u1").await.unwrap();
        assert_eq!(after.credits, Decimal::from_str("9.999865").unwrap());
    }

    #[tokio::test]
    async fn settle_journals_when_user_is_missing() {
        let store = InMemoryStore::new();
        let guard = CreditGuard::new(store, CreditGuardConfig::default());
        let usage = Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        };
        let outcome = guard
            .settle("ghost", "req_6", &pricing(), &usage, 0, false)
            .await;
        assert!(matches!(outcome, SettlementOutcome::Journaled { .. }));
    }
}
