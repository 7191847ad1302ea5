//! Configuration loading, environment overrides, and validation.
//!
//! Layering mirrors the ambient convention this gateway follows throughout:
//! TOML file defaults, environment-variable overrides, then a validation
//! pass that rejects the config outright rather than silently falling back
//! to a hardcoded value for anything security- or money-relevant.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub providers: HashMap<String, ProviderEntry>,
    pub routing: RoutingConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub credit: CreditConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
}

/// One upstream provider's connection settings. `ProviderBinding` pricing
/// and priority live in the catalog, not here — this is purely "how do we
/// talk to this provider" (key, base url, timeout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_seconds: u64,
    pub breaker_aggregate_trip_count: usize,
    pub sync_enabled: bool,
    pub sync_interval_hours: u64,
    pub sync_providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_keys: Vec<ApiKeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub user_id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    pub fresh_ttl_full_catalog_secs: u64,
    pub fresh_ttl_provider_catalog_secs: u64,
    pub fresh_ttl_legacy_local_secs: u64,
    pub stale_ttl_legacy_local_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditConfig {
    pub settlement_inner_retries: u32,
    pub settlement_outer_retries: u32,
    #[serde(with = "duration_secs")]
    pub settlement_outer_backoff: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("GATEWAY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port_str) = env::var("GATEWAY_PORT") {
            self.server.port = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid GATEWAY_PORT: {port_str}"))?;
        }
        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            let valid = ["trace", "debug", "info", "warn", "error"];
            if !valid.contains(&level.as_str()) {
                return Err(anyhow::anyhow!("invalid GATEWAY_LOG_LEVEL: {level}"));
            }
            self.logging.level = level;
        }
        if let Ok(url) = env::var("GATEWAY_REDIS_URL") {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(anyhow::anyhow!("invalid redis url: {url}"));
            }
            self.cache.redis_url = Some(url);
        }

        for (name, provider) in &mut self.providers {
            let env_key = format!("{}_API_KEY", name.to_uppercase().replace('-', "_"));
            if let Ok(api_key) = env::var(&env_key) {
                if !api_key.is_empty() {
                    provider.api_key = api_key;
                }
            } else if provider.api_key.is_empty() && provider.enabled {
                tracing::warn!(provider = %name, "no API key configured for enabled provider (set {env_key})");
            }

            let threshold_key = format!("{}_CB_FAILURE_THRESHOLD", name.to_uppercase().replace('-', "_"));
            if let Ok(v) = env::var(&threshold_key) {
                if let Ok(v) = v.parse::<u32>() {
                    self.routing.breaker_failure_threshold = v;
                }
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server.host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be nonzero"));
        }
        if self.auth.enabled && self.auth.api_keys.is_empty() {
            return Err(anyhow::anyhow!("auth.enabled but no api_keys configured"));
        }
        for key in &self.auth.api_keys {
            if key.key.len() < 16 {
                return Err(anyhow::anyhow!(
                    "api key for user {} is too short (minimum 16 characters)",
                    key.user_id
                ));
            }
        }
        if self.routing.breaker_failure_threshold == 0 {
            return Err(anyhow::anyhow!("routing.breaker_failure_threshold cannot be 0"));
        }
        if self.cache.fresh_ttl_legacy_local_secs > self.cache.stale_ttl_legacy_local_secs {
            return Err(anyhow::anyhow!(
                "cache.fresh_ttl_legacy_local_secs cannot exceed stale_ttl_legacy_local_secs"
            ));
        }
        if let Some(url) = &self.cache.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(anyhow::anyhow!("cache.redis_url must start with redis:// or rediss://"));
            }
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("invalid logging.level: {}", self.logging.level));
        }
        if self.credit.settlement_inner_retries == 0 {
            return Err(anyhow::anyhow!("credit.settlement_inner_retries cannot be 0"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                timeout: Duration::from_secs(130),
                cors: CorsConfig {
                    enabled: true,
                    allowed_origins: vec!["*".to_string()],
                    allowed_methods: vec!["GET".to_string(), "POST".to_string()],
                },
            },
            providers: HashMap::new(),
            routing: RoutingConfig {
                breaker_failure_threshold: 5,
                breaker_cooldown_seconds: 300,
                breaker_aggregate_trip_count: 3,
                sync_enabled: false,
                sync_interval_hours: 6,
                sync_providers: vec![],
            },
            auth: AuthConfig {
                enabled: true,
                api_keys: vec![],
            },
            cache: CacheConfig {
                redis_url: None,
                fresh_ttl_full_catalog_secs: 900,
                fresh_ttl_provider_catalog_secs: 1800,
                fresh_ttl_legacy_local_secs: 3600,
                stale_ttl_legacy_local_secs: 7200,
            },
            credit: CreditConfig {
                settlement_inner_retries: 3,
                settlement_outer_retries: 2,
                settlement_outer_backoff: Duration::from_secs(1),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            metrics: MetricsConfig { enabled: true },
        }
    }
}

/// `serde(with = ...)` helper: durations as whole seconds on the wire.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
