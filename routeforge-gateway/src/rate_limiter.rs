//! Token-bucket rate limiting per `api_key_id`, computed on read against
//! Redis-hosted counters (`rl:<key_id>:<window>`). Three windows — 1s,
//! 1min, 1day — all must pass. On Redis outage this fails open rather than
//! blocking every request, but flags the decision as `degraded` so the
//! caller can surface and count it instead of the failure being silent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use redis::AsyncCommands;

#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
}

impl RateLimits {
    pub fn new(requests_per_second: u32, requests_per_minute: u32, requests_per_day: u32) -> Self {
        Self {
            requests_per_second,
            requests_per_minute,
            requests_per_day,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_seconds: Option<u64>,
    pub degraded: bool,
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// In-process fallback counters, used only while Redis is unreachable.
#[derive(Default)]
struct LocalWindow {
    window_start: AtomicU64,
    count: AtomicU64,
}

pub struct RateLimiter {
    redis: Option<redis::Client>,
    local: DashMap<(String, &'static str), LocalWindow>,
    degraded_decisions: AtomicU64,
}

impl RateLimiter {
    pub fn new(redis_url: Option<&str>) -> Self {
        let redis = redis_url.and_then(|url| redis::Client::open(url).ok());
        Self {
            redis,
            local: DashMap::new(),
            degraded_decisions: AtomicU64::new(0),
        }
    }

    pub fn degraded_decision_count(&self) -> u64 {
        self.degraded_decisions.load(Ordering::Relaxed)
    }

    pub async fn check(&self, api_key_id: &str, limits: RateLimits) -> RateLimitDecision {
        match &self.redis {
            Some(client) => match self.check_redis(client, api_key_id, limits).await {
                Ok(decision) => decision,
                Err(_) => {
                    self.degraded_decisions.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(api_key_id, "rate limiter redis unreachable, failing open");
                    RateLimitDecision {
                        allowed: true,
                        retry_after_seconds: None,
                        degraded: true,
                    }
                }
            },
            None => self.check_local(api_key_id, limits),
        }
    }

    async fn check_redis(
        &self,
        client: &redis::Client,
        api_key_id: &str,
        limits: RateLimits,
    ) -> redis::RedisResult<RateLimitDecision> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let now = now_unix_secs();

        let windows: [(&str, u64, u32); 3] = [
            ("s", now, limits.requests_per_second),
            ("m", now / 60, limits.requests_per_minute),
            ("d", now / 86400, limits.requests_per_day),
        ];
        let ttls: [u64; 3] = [1, 60, 86400];

        for (i, (label, bucket, limit)) in windows.iter().enumerate() {
            let key = format!("rl:{api_key_id}:{label}:{bucket}");
            let count: u64 = conn.incr(&key, 1).await?;
            if count == 1 {
                let _: () = conn.expire(&key, ttls[i] as i64).await?;
            }
            if count as u32 > *limit {
                return Ok(RateLimitDecision {
                    allowed: false,
                    retry_after_seconds: Some(ttls[i]),
                    degraded: false,
                });
            }
        }

        Ok(RateLimitDecision {
            allowed: true,
            retry_after_seconds: None,
            degraded: false,
        })
    }

    fn check_local(&self, api_key_id: &str, limits: RateLimits) -> RateLimitDecision {
        let now = now_unix_secs();
        let windows: [(&'static str, u64, u64, u32); 3] = [
            ("s", now, 1, limits.requests_per_second),
            ("m", now / 60, 60, limits.requests_per_minute),
            ("d", now / 86400, 86400, limits.requests_per_day),
        ];

        for (label, bucket, period, limit) in windows {
            let entry = self
                .local
                .entry((api_key_id.to_string(), label))
                .or_default();
            let window_start = entry.window_start.load(Ordering::Relaxed);
            if window_start != bucket {
                entry.window_start.store(bucket, Ordering::Relaxed);
                entry.count.store(0, Ordering::Relaxed);
            }
            let count = entry.count.fetch_add(1, Ordering::Relaxed) + 1;
            if count as u32 > limit {
                return RateLimitDecision {
                    allowed: false,
                    retry_after_seconds: Some(period),
                    degraded: false,
                };
            }
        }

        RateLimitDecision {
            allowed: true,
            retry_after_seconds: None,
            degraded: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_fallback_allows_within_limits() {
        let limiter = RateLimiter::new(None);
        let limits = RateLimits::new(2, 100, 10_000);
        let decision = limiter.check("key-1", limits).await;
        assert!(decision.allowed);
        assert!(!decision.degraded);
    }

    #[tokio::test]
    async fn local_fallback_denies_once_per_second_limit_hit() {
        let limiter = RateLimiter::new(None);
        let limits = RateLimits::new(1, 100, 10_000);
        assert!(limiter.check("key-2", limits).await.allowed);
        let second = limiter.check("key-2", limits).await;
        assert!(!second.allowed);
        assert_eq!(second.retry_after_seconds, Some(1));
    }

    #[tokio::test]
    async fn unreachable_redis_fails_open_and_counts_as_degraded() {
        let limiter = RateLimiter::new(Some("redis://127.0.0.1:1"));
        let decision = limiter.check("key-3", RateLimits::new(1, 1, 1)).await;
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(limiter.degraded_decision_count(), 1);
    }
}
