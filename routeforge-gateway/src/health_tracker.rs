//! Per-`(provider, canonical_id)` health tracking and the tiered probe
//! scheduler. Rolling counters feed a usage tier (critical/popular/standard/
//! on_demand); a priority queue orders due probes by tier, then staleness,
//! so hot models get probed far more often than cold ones.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    OnDemand,
    Standard,
    Popular,
    Critical,
}

impl Tier {
    pub fn probe_interval(self) -> Duration {
        match self {
            Tier::Critical => Duration::from_secs(5 * 60),
            Tier::Popular => Duration::from_secs(30 * 60),
            Tier::Standard => Duration::from_secs(2 * 60 * 60),
            Tier::OnDemand => Duration::from_secs(4 * 60 * 60),
        }
    }

    /// Tier assignment from 24h request-count rank, expressed as the
    /// requesting key's percentile among all tracked keys (0.0 = coldest).
    pub fn from_usage_percentile(percentile: f64, request_count_24h: u64) -> Tier {
        if request_count_24h == 0 {
            Tier::OnDemand
        } else if percentile >= 0.95 {
            Tier::Critical
        } else if percentile >= 0.75 {
            Tier::Popular
        } else {
            Tier::Standard
        }
    }
}

#[derive(Debug, Clone)]
pub struct RollingCounters {
    pub success_1h: u64,
    pub error_1h: u64,
    pub success_24h: u64,
    pub error_24h: u64,
    pub success_7d: u64,
    pub error_7d: u64,
    pub avg_latency_ms: f64,
}

impl Default for RollingCounters {
    fn default() -> Self {
        Self {
            success_1h: 0,
            error_1h: 0,
            success_24h: 0,
            error_24h: 0,
            success_7d: 0,
            error_7d: 0,
            avg_latency_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub provider_slug: String,
    pub canonical_id: String,
    pub tier: Tier,
    pub counters: RollingCounters,
    pub consecutive_failures: u32,
    pub next_check_at: u64,
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DueProbe {
    tier: Tier,
    due_since: u64,
    provider_slug: String,
    canonical_id: String,
}

impl Ord for DueProbe {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| self.due_since.cmp(&other.due_since))
    }
}

impl PartialOrd for DueProbe {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

pub struct HealthTracker {
    records: DashMap<(String, String), HealthRecord>,
    /// SETNX-style lease map: key -> lease-expiry unix seconds. Coordinates
    /// probing across instances without a real Redis dependency in tests;
    /// the gateway binary backs this with Redis SETNX for multi-instance use.
    leases: DashMap<(String, String), u64>,
    max_concurrent_probes: usize,
    in_flight: Mutex<usize>,
}

impl HealthTracker {
    pub fn new(max_concurrent_probes: usize) -> Self {
        Self {
            records: DashMap::new(),
            leases: DashMap::new(),
            max_concurrent_probes,
            in_flight: Mutex::new(0),
        }
    }

    pub fn record_outcome(&self, provider_slug: &str, canonical_id: &str, success: bool, latency_ms: f64) {
        let mut entry = self
            .records
            .entry((provider_slug.to_string(), canonical_id.to_string()))
            .or_insert_with(|| HealthRecord {
                provider_slug: provider_slug.to_string(),
                canonical_id: canonical_id.to_string(),
                tier: Tier::OnDemand,
                counters: RollingCounters::default(),
                consecutive_failures: 0,
                next_check_at: now_unix_secs(),
            });

        if success {
            entry.counters.success_1h += 1;
            entry.counters.success_24h += 1;
            entry.counters.success_7d += 1;
            entry.consecutive_failures = 0;
        } else {
            entry.counters.error_1h += 1;
            entry.counters.error_24h += 1;
            entry.counters.error_7d += 1;
            entry.consecutive_failures += 1;
        }
        entry.counters.avg_latency_ms = (entry.counters.avg_latency_ms + latency_ms) / 2.0;
        entry.next_check_at = now_unix_secs() + entry.tier.probe_interval().as_secs();
    }

    /// Recomputes every tracked key's tier from its share of total 24h
    /// traffic. Called periodically by the probe scheduler, not per-request.
    pub fn rebalance_tiers(&self) {
        let total: u64 = self
            .records
            .iter()
            .map(|e| e.counters.success_24h + e.counters.error_24h)
            .sum();
        if total == 0 {
            return;
        }
        let mut counts: Vec<u64> = self
            .records
            .iter()
            .map(|e| e.counters.success_24h + e.counters.error_24h)
            .collect();
        counts.sort_unstable();

        for mut entry in self.records.iter_mut() {
            let count = entry.counters.success_24h + entry.counters.error_24h;
            let rank = counts.partition_point(|&c| c <= count);
            let percentile = rank as f64 / counts.len() as f64;
            entry.tier = Tier::from_usage_percentile(percentile, count);
        }
    }

    pub fn get(&self, provider_slug: &str, canonical_id: &str) -> Option<HealthRecord> {
        self.records
            .get(&(provider_slug.to_string(), canonical_id.to_string()))
            .map(|e| e.clone())
    }

    /// Pops up to `limit` due probes, highest tier and staleness first,
    /// skipping any key whose lease is still held by another instance.
    pub fn due_probes(&self, limit: usize) -> Vec<(String, String)> {
        let now = now_unix_secs();
        let mut heap = BinaryHeap::new();
        for entry in self.records.iter() {
            if entry.next_check_at <= now {
                heap.push(DueProbe {
                    tier: entry.tier,
                    due_since: now.saturating_sub(entry.next_check_at),
                    provider_slug: entry.provider_slug.clone(),
                    canonical_id: entry.canonical_id.clone(),
                });
            }
        }

        let mut selected = Vec::new();
        while let Some(probe) = heap.pop() {
            if selected.len() >= limit {
                break;
            }
            let key = (probe.provider_slug.clone(), probe.canonical_id.clone());
            if self.try_acquire_lease(&key, 60) {
                selected.push(key);
            }
        }
        selected
    }

    fn try_acquire_lease(&self, key: &(String, String), ttl_secs: u64) -> bool {
        let now = now_unix_secs();
        let mut guard = self.in_flight.lock().expect("health tracker lease mutex poisoned");
        if *guard >= self.max_concurrent_probes {
            return false;
        }
        match self.leases.get(key) {
            Some(expiry) if *expiry > now => false,
            _ => {
                self.leases.insert(key.clone(), now + ttl_secs);
                *guard += 1;
                true
            }
        }
    }

    pub fn release_lease(&self, key: &(String, String)) {
        self.leases.remove(key);
        let mut guard = self.in_flight.lock().expect("health tracker lease mutex poisoned");
        *guard = guard.saturating_sub(1);
    }
}
