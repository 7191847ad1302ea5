//! `CatalogCache` — two-tier, stale-while-revalidate cache with
//! single-flight fills.
//!
//! This is the single coherent caching policy for the whole repository
//! (see `DESIGN.md`): any component needing cached data goes through here
//! with its own namespaced key and TTL pair, rather than standing up a
//! second ad-hoc cache.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Miss,
}

#[derive(Clone)]
struct Entry {
    payload: Arc<str>,
    stored_at: Instant,
    fresh_ttl: Duration,
    stale_ttl: Duration,
}

impl Entry {
    fn freshness(&self) -> Freshness {
        let age = self.stored_at.elapsed();
        if age <= self.fresh_ttl {
            Freshness::Fresh
        } else if age <= self.stale_ttl {
            Freshness::Stale
        } else {
            Freshness::Miss
        }
    }
}

/// Remote (Redis) tier. `routeforge-gateway` supplies the real
/// implementation; a missing or erroring remote tier degrades to
/// process-local only.
#[async_trait::async_trait]
pub trait RemoteCacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, payload: &str, ttl: Duration);
}

pub struct CatalogCache {
    local: DashMap<String, Entry>,
    remote: Option<Arc<dyn RemoteCacheBackend>>,
    in_flight: DashMap<String, Arc<OnceCell<Result<String, String>>>>,
}

impl CatalogCache {
    pub fn new(remote: Option<Arc<dyn RemoteCacheBackend>>) -> Arc<Self> {
        Arc::new(Self {
            local: DashMap::new(),
            remote,
            in_flight: DashMap::new(),
        })
    }

    /// Two-tier read: process-local, then the remote tier on a local miss.
    /// A remote hit is promoted into the local tier. Freshness is computed
    /// purely from `stored_at`, so a promoted remote entry inherits
    /// whatever age the remote side recorded.
    pub async fn get(&self, key: &str) -> (Option<String>, Freshness) {
        if let Some(entry) = self.local.get(key) {
            let freshness = entry.freshness();
            if freshness != Freshness::Miss {
                return (Some(entry.payload.to_string()), freshness);
            }
        }

        if let Some(remote) = &self.remote {
            if let Some(payload) = remote.get(key).await {
                // Remote doesn't carry TTL metadata in this reference
                // implementation; treat a remote hit as fresh-on-arrival
                // and let the caller's next `set` re-establish real TTLs.
                self.local.insert(
                    key.to_string(),
                    Entry {
                        payload: Arc::from(payload.as_str()),
                        stored_at: Instant::now(),
                        fresh_ttl: Duration::from_secs(900),
                        stale_ttl: Duration::from_secs(900),
                    },
                );
                return (Some(payload), Freshness::Fresh);
            }
        }

        (None, Freshness::Miss)
    }

    pub async fn set(&self, key: &str, payload: String, fresh_ttl: Duration, stale_ttl: Duration) {
        self.local.insert(
            key.to_string(),
            Entry {
                payload: Arc::from(payload.as_str()),
                stored_at: Instant::now(),
                fresh_ttl,
                stale_ttl,
            },
        );
        if let Some(remote) = &self.remote {
            remote.set(key, &payload, stale_ttl.max(fresh_ttl)).await;
        }
    }

    /// Fetches `key`, filling it with `fill` on a miss. Concurrent callers
    /// on the same missing key share one in-flight fill. On a stale hit,
    /// returns the stale payload immediately and spawns exactly one
    /// background refresh per key; refresh failures are swallowed (the
    /// stale entry is left intact until `stale_ttl` is exceeded).
    pub async fn get_or_fill<F, Fut>(
        self: &Arc<Self>,
        key: &str,
        fresh_ttl: Duration,
        stale_ttl: Duration,
        fill: F,
    ) -> Result<String, String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let (payload, freshness) = self.get(key).await;
        match freshness {
            Freshness::Fresh => return Ok(payload.expect("fresh implies present")),
            Freshness::Stale => {
                self.spawn_background_refresh(key, fresh_ttl, stale_ttl, fill);
                return Ok(payload.expect("stale implies present"));
            }
            Freshness::Miss => {}
        }

        self.single_flight_fill(key, fresh_ttl, stale_ttl, fill).await
    }

    fn spawn_background_refresh<F, Fut>(
        self: &Arc<Self>,
        key: &str,
        fresh_ttl: Duration,
        stale_ttl: Duration,
        fill: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        if self.in_flight.contains_key(key) {
            return;
        }
        let this = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let cell = this
                .in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();
            let result = cell.get_or_init(|| fill()).await.clone();
            this.in_flight.remove(&key);
            if let Ok(payload) = result {
                this.set(&key, payload, fresh_ttl, stale_ttl).await;
            }
        });
    }

    async fn single_flight_fill<F, Fut>(
        &self,
        key: &str,
        fresh_ttl: Duration,
        stale_ttl: Duration,
        fill: F,
    ) -> Result<String, String>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String, String>> + Send,
    {
        let cell = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_init(|| fill()).await.clone();
        self.in_flight.remove(key);

        if let Ok(payload) = &result {
            self.set(key, payload.clone(), fresh_ttl, stale_ttl).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fresh_set_then_get_returns_exact_payload() {
        let cache = CatalogCache::new(None);
        cache
            .set("k", "v".to_string(), Duration::from_secs(60), Duration::from_secs(120))
            .await;
        let (payload, freshness) = cache.get("k").await;
        assert_eq!(payload.as_deref(), Some("v"));
        assert_eq!(freshness, Freshness::Fresh);
    }

    #[tokio::test]
    async fn entry_past_fresh_ttl_is_stale() {
        let cache = CatalogCache::new(None);
        cache
            .set("k", "v".to_string(), Duration::from_millis(0), Duration::from_secs(60))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (payload, freshness) = cache.get("k").await;
        assert_eq!(payload.as_deref(), Some("v"));
        assert_eq!(freshness, Freshness::Stale);
    }

    #[tokio::test]
    async fn entry_past_stale_ttl_is_a_miss() {
        let cache = CatalogCache::new(None);
        cache
            .set("k", "v".to_string(), Duration::from_millis(0), Duration::from_millis(0))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (payload, freshness) = cache.get("k").await;
        assert_eq!(payload, None);
        assert_eq!(freshness, Freshness::Miss);
    }

    #[tokio::test]
    async fn single_flight_fill_runs_the_fill_function_once() {
        let cache = CatalogCache::new(None);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fill("k", Duration::from_secs(60), Duration::from_secs(120), move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok("filled".to_string())
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "filled");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_hit_returns_immediately_and_refreshes_in_background() {
        let cache = CatalogCache::new(None);
        cache
            .set("k", "old".to_string(), Duration::from_millis(0), Duration::from_secs(60))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = cache
            .get_or_fill("k", Duration::from_secs(60), Duration::from_secs(120), || async {
                Ok("new".to_string())
            })
            .await
            .unwrap();
        assert_eq!(result, "old");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (payload, freshness) = cache.get("k").await;
        assert_eq!(payload.as_deref(), Some("new"));
        assert_eq!(freshness, Freshness::Fresh);
    }
}
