//! Application wiring: builds every long-lived component from `Config` and
//! assembles the axum `Router` — one state struct, one middleware stack, one
//! route table, covering this engine's routing/credit/health pipeline.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use routeforge_core::catalog::{CanonicalModel, Feature, Modality, Pricing, ProviderBinding};
use routeforge_core::circuit_breaker::{BreakerConfig, CircuitBreaker};
use routeforge_core::pricing::PricingResolver;
use routeforge_core::provider_selector::ProviderSelector;
use routeforge_core::providers::{create_provider, Provider, ProviderConfig};
use routeforge_core::registry::{CanonicalRegistry, RegistrySyncJob, StaticSeedSyncJob};

use crate::auth::AuthService;
use crate::cache_backend::RedisCacheBackend;
use crate::config::{Config, CorsConfig};
use crate::credit_guard::{CreditGuard, CreditGuardConfig};
use crate::handlers;
use crate::health_tracker::HealthTracker;
use crate::metrics::MetricsRegistry;
use crate::middleware::{auth_middleware, logging_middleware, metrics_middleware};
use crate::rate_limiter::RateLimiter;
use crate::store::{InMemoryStore, Store};
use routeforge_core::catalog_cache::CatalogCache;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: CanonicalRegistry,
    pub breaker: Arc<CircuitBreaker>,
    pub selector: Arc<ProviderSelector>,
    pub pricing: Arc<PricingResolver>,
    pub catalog_cache: Arc<CatalogCache>,
    pub credit_guard: Arc<CreditGuard>,
    pub rate_limiter: Arc<RateLimiter>,
    pub health_tracker: Arc<HealthTracker>,
    pub store: Arc<dyn Store>,
    pub auth: Arc<AuthService>,
    pub metrics: Arc<MetricsRegistry>,
    pub providers: Arc<HashMap<String, Arc<dyn Provider>>>,
}

pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    let config = Arc::new(config);

    if config.server.cors.enabled && config.server.cors.allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS allows every origin; restrict server.cors.allowed_origins in production");
    }

    let seed_job = StaticSeedSyncJob::new(seed_catalog());
    let registry = CanonicalRegistry::new(seed_job.fetch_models().await?)?;

    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold: config.routing.breaker_failure_threshold,
        cooldown: Duration::from_secs(config.routing.breaker_cooldown_seconds),
        aggregate_trip_count: config.routing.breaker_aggregate_trip_count,
    }));
    let selector = Arc::new(ProviderSelector::new(breaker.clone()));
    let pricing = PricingResolver::shared(registry.clone());

    let remote_cache = match &config.cache.redis_url {
        Some(url) => match RedisCacheBackend::new(url) {
            Ok(backend) => Some(Arc::new(backend) as Arc<dyn routeforge_core::catalog_cache::RemoteCacheBackend>),
            Err(e) => {
                tracing::warn!(error = %e, "failed to build redis catalog cache backend, running local-only");
                None
            }
        },
        None => None,
    };
    let catalog_cache = CatalogCache::new(remote_cache);

    let in_memory_store = InMemoryStore::new();
    seed_store(&in_memory_store, &config);
    let store: Arc<dyn Store> = in_memory_store;

    let credit_guard = Arc::new(CreditGuard::new(
        store.clone(),
        CreditGuardConfig {
            inner_retries: config.credit.settlement_inner_retries,
            outer_retries: config.credit.settlement_outer_retries,
            outer_backoff: config.credit.settlement_outer_backoff,
            ..Default::default()
        },
    ));
    let rate_limiter = Arc::new(RateLimiter::new(config.cache.redis_url.as_deref()));
    let health_tracker = Arc::new(HealthTracker::new(20));
    let auth = Arc::new(AuthService::new(store.clone()));
    let metrics = Arc::new(MetricsRegistry::new());

    let providers = Arc::new(build_providers(&config)?);

    let state = AppState {
        config: config.clone(),
        registry,
        breaker,
        selector,
        pricing,
        catalog_cache,
        credit_guard,
        rate_limiter,
        health_tracker,
        store,
        auth,
        metrics,
        providers,
    };

    let router = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/completions", post(handlers::completions))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/v1/images/generations", post(handlers::image_generations))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_json))
        .route("/metrics/prometheus", get(handlers::metrics_prometheus))
        .route("/admin/circuit-breakers", get(handlers::circuit_breakers))
        .layer(axum::middleware::from_fn_with_state(state.clone(), metrics_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), logging_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(cors_layer(&config.server.cors))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.server.timeout))
        .with_state(state);

    Ok(router)
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();
    if !cors.enabled {
        return layer;
    }
    layer = if cors.allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = cors
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    };
    layer.allow_methods(Any).allow_headers(Any)
}

fn build_providers(config: &Config) -> anyhow::Result<HashMap<String, Arc<dyn Provider>>> {
    let mut providers = HashMap::new();
    for (name, entry) in &config.providers {
        if !entry.enabled {
            continue;
        }
        let mut provider_config = ProviderConfig::new(name.clone(), entry.api_key.clone())
            .with_timeout(entry.timeout);
        if let Some(base_url) = &entry.base_url {
            provider_config = provider_config.with_base_url(base_url.clone());
        }
        let adapter = create_provider(provider_config)?;
        providers.insert(name.clone(), Arc::from(adapter));
    }
    Ok(providers)
}

fn seed_store(store: &InMemoryStore, config: &Config) {
    for key in &config.auth.api_keys {
        if !key.enabled {
            continue;
        }
        store.seed_user(crate::store::User {
            user_id: key.user_id.clone(),
            api_key_id: key.key.clone(),
            credits: rust_decimal::Decimal::new(1000, 0),
            lock_version: 0,
            is_trial: false,
            subscription_indicators: vec![],
        });
    }
}

/// Bundled catalog sufficient to run standalone without a models table
/// behind it — swap `StaticSeedSyncJob` for a database-backed
/// `RegistrySyncJob` in a real deployment.
fn seed_catalog() -> Vec<CanonicalModel> {
    vec![
        CanonicalModel {
            canonical_id: "gpt-4o".into(),
            display_name: "GPT-4o".into(),
            description: "OpenAI flagship multimodal model".into(),
            context_length: 128_000,
            modalities: BTreeSet::from([Modality::Text, Modality::Image]),
            aliases: BTreeSet::from(["openai/gpt-4o".to_string()]),
            providers: vec![ProviderBinding {
                provider_slug: "openai".into(),
                upstream_model_id: "gpt-4o".into(),
                priority: 1,
                features: BTreeSet::from([Feature::Streaming, Feature::FunctionCalling, Feature::Vision]),
                pricing: Pricing {
                    prompt: "0.0000025".parse().unwrap(),
                    completion: "0.00001".parse().unwrap(),
                    request: Pricing::ZERO.request,
                    image: "0.0005".parse().unwrap(),
                    web_search: Pricing::ZERO.web_search,
                    reasoning: Pricing::ZERO.reasoning,
                },
                enabled: true,
            }],
        },
        CanonicalModel {
            canonical_id: "claude-3-5-sonnet".into(),
            display_name: "Claude 3.5 Sonnet".into(),
            description: "Anthropic general-purpose model".into(),
            context_length: 200_000,
            modalities: BTreeSet::from([Modality::Text, Modality::Image]),
            aliases: BTreeSet::from(["anthropic/claude-3-5-sonnet".to_string()]),
            providers: vec![ProviderBinding {
                provider_slug: "anthropic".into(),
                upstream_model_id: "claude-3-5-sonnet-20241022".into(),
                priority: 1,
                features: BTreeSet::from([Feature::Streaming, Feature::FunctionCalling, Feature::Vision]),
                pricing: Pricing {
                    prompt: "0.000003".parse().unwrap(),
                    completion: "0.000015".parse().unwrap(),
                    request: Pricing::ZERO.request,
                    image: Pricing::ZERO.image,
                    web_search: Pricing::ZERO.web_search,
                    reasoning: Pricing::ZERO.reasoning,
                },
                enabled: true,
            }],
        },
        CanonicalModel {
            canonical_id: "llama-3.3-70b-instruct".into(),
            display_name: "Llama 3.3 70B Instruct".into(),
            description: "Open-weight model served by commodity inference providers".into(),
            context_length: 128_000,
            modalities: BTreeSet::from([Modality::Text]),
            aliases: BTreeSet::from(["meta-llama/llama-3.3-70b-instruct".to_string()]),
            providers: vec![
                ProviderBinding {
                    provider_slug: "fireworks".into(),
                    upstream_model_id: "accounts/fireworks/models/llama-v3p3-70b-instruct".into(),
                    priority: 1,
                    features: BTreeSet::from([Feature::Streaming]),
                    pricing: Pricing {
                        prompt: "0.0000009".parse().unwrap(),
                        completion: "0.0000009".parse().unwrap(),
                        request: Pricing::ZERO.request,
                        image: Pricing::ZERO.image,
                        web_search: Pricing::ZERO.web_search,
                        reasoning: Pricing::ZERO.reasoning,
                    },
                    enabled: true,
                },
                ProviderBinding {
                    provider_slug: "together".into(),
                    upstream_model_id: "meta-llama/Llama-3.3-70B-Instruct-Turbo".into(),
                    priority: 2,
                    features: BTreeSet::from([Feature::Streaming]),
                    pricing: Pricing {
                        prompt: "0.00000088".parse().unwrap(),
                        completion: "0.00000088".parse().unwrap(),
                        request: Pricing::ZERO.request,
                        image: Pricing::ZERO.image,
                        web_search: Pricing::ZERO.web_search,
                        reasoning: Pricing::ZERO.reasoning,
                    },
                    enabled: true,
                },
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_catalog_builds_a_valid_registry() {
        let registry = CanonicalRegistry::new(seed_catalog()).unwrap();
        assert!(registry.resolve("gpt-4o").is_some());
        assert!(registry.resolve("openai/gpt-4o").is_some());
        assert_eq!(registry.bindings("llama-3.3-70b-instruct").len(), 2);
    }

    #[test]
    fn cors_layer_accepts_wildcard_origin() {
        let cors = CorsConfig {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".to_string()],
        };
        let _layer = cors_layer(&cors);
    }
}
