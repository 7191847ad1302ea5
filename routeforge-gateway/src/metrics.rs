//! In-process counter registry exposed as JSON (`/metrics`) and Prometheus
//! text (`/metrics/prometheus`). A hand-rolled module, not a metrics crate,
//! matching the ambient pattern this gateway is built from — the counters
//! tracked here are exactly the ones the rest of the crate actually emits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Default)]
struct ProviderCounters {
    successes: AtomicU64,
    failures: AtomicU64,
}

pub struct MetricsRegistry {
    start_time: Instant,
    successes: AtomicU64,
    failures: AtomicU64,
    breaker_trips: AtomicU64,
    cache_hits_fresh: AtomicU64,
    cache_hits_stale: AtomicU64,
    cache_misses: AtomicU64,
    settlement_retries: AtomicU64,
    settlement_journaled: AtomicU64,
    rate_limit_degraded: AtomicU64,
    per_provider: DashMap<String, ProviderCounters>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            breaker_trips: AtomicU64::new(0),
            cache_hits_fresh: AtomicU64::new(0),
            cache_hits_stale: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            settlement_retries: AtomicU64::new(0),
            settlement_journaled: AtomicU64::new(0),
            rate_limit_degraded: AtomicU64::new(0),
            per_provider: DashMap::new(),
        }
    }

    pub fn record_attempt(&self, provider_slug: &str, success: bool) {
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let entry = self.per_provider.entry(provider_slug.to_string()).or_default();
        if success {
            entry.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            entry.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_breaker_trip(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_outcome(&self, freshness: routeforge_core::catalog_cache::Freshness) {
        use routeforge_core::catalog_cache::Freshness;
        match freshness {
            Freshness::Fresh => self.cache_hits_fresh.fetch_add(1, Ordering::Relaxed),
            Freshness::Stale => self.cache_hits_stale.fetch_add(1, Ordering::Relaxed),
            Freshness::Miss => self.cache_misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_settlement_retry(&self) {
        self.settlement_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_settlement_journaled(&self) {
        self.settlement_journaled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_degraded(&self) {
        self.rate_limit_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            breaker_trips: self.breaker_trips.load(Ordering::Relaxed),
            cache_hits_fresh: self.cache_hits_fresh.load(Ordering::Relaxed),
            cache_hits_stale: self.cache_hits_stale.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            settlement_retries: self.settlement_retries.load(Ordering::Relaxed),
            settlement_journaled: self.settlement_journaled.load(Ordering::Relaxed),
            rate_limit_degraded: self.rate_limit_degraded.load(Ordering::Relaxed),
        }
    }

    pub fn prometheus_text(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        out.push_str(&format!("gateway_uptime_seconds {}\n", snapshot.uptime_seconds));
        out.push_str(&format!("gateway_requests_successful {}\n", snapshot.successes));
        out.push_str(&format!("gateway_requests_failed {}\n", snapshot.failures));
        out.push_str(&format!("gateway_breaker_trips_total {}\n", snapshot.breaker_trips));
        out.push_str(&format!("gateway_cache_hits_fresh_total {}\n", snapshot.cache_hits_fresh));
        out.push_str(&format!("gateway_cache_hits_stale_total {}\n", snapshot.cache_hits_stale));
        out.push_str(&format!("gateway_cache_misses_total {}\n", snapshot.cache_misses));
        out.push_str(&format!(
            "gateway_settlement_retries_total {}\n",
            snapshot.settlement_retries
        ));
        out.push_str(&format!(
            "gateway_settlement_journaled_total {}\n",
            snapshot.settlement_journaled
        ));
        out.push_str(&format!(
            "gateway_rate_limit_degraded_total {}\n",
            snapshot.rate_limit_degraded
        ));
        for entry in self.per_provider.iter() {
            let (provider, counters) = entry.pair();
            out.push_str(&format!(
                "gateway_provider_requests_successful{{provider=\"{provider}\"}} {}\n",
                counters.successes.load(Ordering::Relaxed)
            ));
            out.push_str(&format!(
                "gateway_provider_requests_failed{{provider=\"{provider}\"}} {}\n",
                counters.failures.load(Ordering::Relaxed)
            ));
        }
        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub successes: u64,
    pub failures: u64,
    pub breaker_trips: u64,
    pub cache_hits_fresh: u64,
    pub cache_hits_stale: u64,
    pub cache_misses: u64,
    pub settlement_retries: u64,
    pub settlement_journaled: u64,
    pub rate_limit_degraded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_attempt_updates_both_global_and_per_provider_counters() {
        let registry = MetricsRegistry::new();
        registry.record_attempt("fireworks", true);
        registry.record_attempt("fireworks", false);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.failures, 1);
        assert!(registry.prometheus_text().contains("provider=\"fireworks\""));
    }

    #[test]
    fn prometheus_text_includes_every_counter_name() {
        let registry = MetricsRegistry::new();
        let text = registry.prometheus_text();
        assert!(text.contains("gateway_requests_successful"));
        assert!(text.contains("gateway_breaker_trips_total"));
        assert!(text.contains("gateway_cache_misses_total"));
    }
}
