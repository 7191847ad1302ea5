//! Per-`(provider_slug, canonical_id)` circuit breaker, plus an
//! aggregate provider-level breaker that opens once enough of a provider's
//! individual pairs are open.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Minimum number of tripped pairs for a provider before the aggregate
    /// breaker for that provider also opens.
    pub aggregate_trip_count: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(5 * 60),
            aggregate_trip_count: 3,
        }
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Atomic state for one `(provider_slug, canonical_id)` pair. Lives inside
/// a `dashmap` shard so unrelated pairs never contend on the same lock.
struct PairState {
    state: std::sync::Mutex<BreakerState>,
    consecutive_failures: AtomicU32,
    opened_at: AtomicU64,
}

impl PairState {
    fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
        }
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    pairs: DashMap<(String, String), PairState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            pairs: DashMap::new(),
        }
    }

    fn entry(&self, provider_slug: &str, canonical_id: &str) -> dashmap::mapref::one::Ref<'_, (String, String), PairState> {
        let key = (provider_slug.to_string(), canonical_id.to_string());
        self.pairs.entry(key.clone()).or_insert_with(PairState::new);
        self.pairs.get(&key).expect("just inserted")
    }

    /// Whether a call against this pair is currently allowed. Transitions
    /// `open` → `half_open` once the cooldown has elapsed, as a side
    /// effect of the check itself.
    pub fn allow(&self, provider_slug: &str, canonical_id: &str) -> bool {
        let pair = self.entry(provider_slug, canonical_id);
        let mut state = pair.state.lock().expect("breaker mutex poisoned");
        match *state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = pair.opened_at.load(Ordering::Acquire);
                if now_unix_secs().saturating_sub(opened_at) >= self.config.cooldown.as_secs() {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, provider_slug: &str, canonical_id: &str) {
        let pair = self.entry(provider_slug, canonical_id);
        let mut state = pair.state.lock().expect("breaker mutex poisoned");
        pair.consecutive_failures.store(0, Ordering::Release);
        *state = BreakerState::Closed;
    }

    /// Only provider-side failures should ever reach this — the caller is
    /// responsible for classifying via `ProviderError::is_provider_side`
    /// before calling.
    pub fn record_failure(&self, provider_slug: &str, canonical_id: &str) {
        let pair = self.entry(provider_slug, canonical_id);
        let mut state = pair.state.lock().expect("breaker mutex poisoned");
        match *state {
            BreakerState::HalfOpen => {
                *state = BreakerState::Open;
                pair.opened_at.store(now_unix_secs(), Ordering::Release);
            }
            BreakerState::Closed => {
                let failures = pair.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    *state = BreakerState::Open;
                    pair.opened_at.store(now_unix_secs(), Ordering::Release);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self, provider_slug: &str, canonical_id: &str) -> BreakerState {
        let pair = self.entry(provider_slug, canonical_id);
        let state = *pair.state.lock().expect("breaker mutex poisoned");
        state
    }

    /// Aggregate breaker: true once at least `aggregate_trip_count`
    /// distinct canonical ids are open for this provider.
    pub fn provider_is_degraded(&self, provider_slug: &str) -> bool {
        let open_count = self
            .pairs
            .iter()
            .filter(|entry| entry.key().0 == provider_slug)
            .filter(|entry| {
                *entry.value().state.lock().expect("breaker mutex poisoned") == BreakerState::Open
            })
            .count();
        open_count >= self.config.aggregate_trip_count
    }

    /// Snapshot for the `/admin/circuit-breakers` surface.
    pub fn dump(&self) -> Vec<((String, String), BreakerState)> {
        self.pairs
            .iter()
            .map(|entry| {
                let state = *entry.value().state.lock().expect("breaker mutex poisoned");
                (entry.key().clone(), state)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
            aggregate_trip_count: 2,
        })
    }

    #[test]
    fn five_consecutive_failures_open_the_breaker() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure("fireworks", "llama-3.3-70b");
            assert_eq!(cb.state("fireworks", "llama-3.3-70b"), BreakerState::Closed);
        }
        cb.record_failure("fireworks", "llama-3.3-70b");
        assert_eq!(cb.state("fireworks", "llama-3.3-70b"), BreakerState::Open);
        assert!(!cb.allow("fireworks", "llama-3.3-70b"));
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure("p", "m");
        }
        cb.record_success("p", "m");
        cb.record_failure("p", "m");
        assert_eq!(cb.state("p", "m"), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_the_breaker() {
        let cb = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(0),
            aggregate_trip_count: 2,
        });
        cb.record_failure("p", "m");
        assert_eq!(cb.state("p", "m"), BreakerState::Open);
        assert!(cb.allow("p", "m"));
        assert_eq!(cb.state("p", "m"), BreakerState::HalfOpen);
        cb.record_failure("p", "m");
        assert_eq!(cb.state("p", "m"), BreakerState::Open);
    }

    #[test]
    fn aggregate_breaker_trips_once_enough_pairs_are_open() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure("p", "model-a");
        }
        assert!(!cb.provider_is_degraded("p"));
        for _ in 0..5 {
            cb.record_failure("p", "model-b");
        }
        assert!(cb.provider_is_degraded("p"));
    }
}
