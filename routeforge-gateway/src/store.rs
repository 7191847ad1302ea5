//! Persistence trait over the table shapes this gateway needs, plus an
//! in-memory reference implementation sufficient for tests and for running
//! the gateway standalone without an external database. A production
//! deployment supplies its own `Store` against Postgres/MySQL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("user not found: {user_id}")]
    UserNotFound { user_id: String },

    #[error("optimistic lock conflict on user {user_id}")]
    LockConflict { user_id: String },

    #[error("backend error: {message}")]
    Backend { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub api_key_id: String,
    pub credits: Decimal,
    pub lock_version: i64,
    pub is_trial: bool,
    pub subscription_indicators: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: String,
    pub user_id: String,
    pub request_id: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditDeductionFailure {
    pub request_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub reason: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequestRecord {
    pub request_id: String,
    pub user_id: String,
    pub provider: String,
    pub canonical_id: String,
    pub upstream_model_id: String,
    pub status: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: Decimal,
    pub is_anonymous: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealthRow {
    pub provider: String,
    pub canonical_id: String,
    pub monitoring_tier: String,
    pub consecutive_failures: u32,
    pub breaker_state: String,
    pub next_check_at: chrono::DateTime<chrono::Utc>,
}

/// Conditional update: succeeds only if the row's current `lock_version`
/// matches `expected_lock_version`, in which case `credits` is decremented
/// by `amount` and `lock_version` is incremented. Returns the post-update
/// balance on success.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>, StoreError>;
    async fn get_user(&self, user_id: &str) -> Result<User, StoreError>;

    async fn decrement_credits(
        &self,
        user_id: &str,
        expected_lock_version: i64,
        amount: Decimal,
    ) -> Result<Decimal, StoreError>;

    async fn record_transaction(&self, transaction: CreditTransaction) -> Result<(), StoreError>;
    async fn record_deduction_failure(&self, failure: CreditDeductionFailure) -> Result<(), StoreError>;
    async fn record_chat_completion_request(
        &self,
        record: ChatCompletionRequestRecord,
    ) -> Result<(), StoreError>;

    async fn upsert_model_health(&self, row: ModelHealthRow) -> Result<(), StoreError>;
    async fn due_health_probes(&self, limit: usize) -> Result<Vec<ModelHealthRow>, StoreError>;
}

pub struct InMemoryStore {
    users: DashMap<String, User>,
    api_key_index: DashMap<String, String>,
    transactions: DashMap<String, Vec<CreditTransaction>>,
    deduction_failures: DashMap<String, CreditDeductionFailure>,
    chat_requests: DashMap<String, ChatCompletionRequestRecord>,
    health: DashMap<(String, String), ModelHealthRow>,
    transaction_seq: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            users: DashMap::new(),
            api_key_index: DashMap::new(),
            transactions: DashMap::new(),
            deduction_failures: DashMap::new(),
            chat_requests: DashMap::new(),
            health: DashMap::new(),
            transaction_seq: AtomicI64::new(0),
        })
    }

    pub fn seed_user(&self, user: User) {
        self.api_key_index
            .insert(user.api_key_id.clone(), user.user_id.clone());
        self.users.insert(user.user_id.clone(), user);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            users: DashMap::new(),
            api_key_index: DashMap::new(),
            transactions: DashMap::new(),
            deduction_failures: DashMap::new(),
            chat_requests: DashMap::new(),
            health: DashMap::new(),
            transaction_seq: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>, StoreError> {
        let Some(user_id) = self.api_key_index.get(api_key).map(|v| v.clone()) else {
            return Ok(None);
        };
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn get_user(&self, user_id: &str) -> Result<User, StoreError> {
        self.users
            .get(user_id)
            .map(|u| u.clone())
            .ok_or_else(|| StoreError::UserNotFound {
                user_id: user_id.to_string(),
            })
    }

    async fn decrement_credits(
        &self,
        user_id: &str,
        expected_lock_version: i64,
        amount: Decimal,
    ) -> Result<Decimal, StoreError> {
        let mut entry = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::UserNotFound {
                user_id: user_id.to_string(),
            })?;
        if entry.lock_version != expected_lock_version {
            return Err(StoreError::LockConflict {
                user_id: user_id.to_string(),
            });
        }
        if entry.credits < amount {
            return Err(StoreError::Backend {
                message: "insufficient_after_the_fact".to_string(),
            });
        }
        entry.credits -= amount;
        entry.lock_version += 1;
        Ok(entry.credits)
    }

    async fn record_transaction(&self, transaction: CreditTransaction) -> Result<(), StoreError> {
        self.transaction_seq.fetch_add(1, Ordering::Relaxed);
        self.transactions
            .entry(transaction.user_id.clone())
            .or_default()
            .push(transaction);
        Ok(())
    }

    async fn record_deduction_failure(&self, failure: CreditDeductionFailure) -> Result<(), StoreError> {
        self.deduction_failures.insert(failure.request_id.clone(), failure);
        Ok(())
    }

    async fn record_chat_completion_request(
        &self,
        record: ChatCompletionRequestRecord,
    ) -> Result<(), StoreError> {
        self.chat_requests.insert(record.request_id.clone(), record);
        Ok(())
    }

    async fn upsert_model_health(&self, row: ModelHealthRow) -> Result<(), StoreError> {
        self.health.insert((row.provider.clone(), row.canonical_id.clone()), row);
        Ok(())
    }

    async fn due_health_probes(&self, limit: usize) -> Result<Vec<ModelHealthRow>, StoreError> {
        let now = chrono::Utc::now();
        Ok(self
            .health
            .iter()
            .filter(|entry| entry.next_check_at <= now)
            .take(limit)
            .map(|entry| entry.clone())
            .collect())
    }
}
