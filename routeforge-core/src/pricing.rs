//! `PricingResolver` — resolves and validates per-token pricing.

use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::catalog::Pricing;
use crate::error::CoreError;
use crate::registry::CanonicalRegistry;

/// Model-name fragments that must never silently fall back to default
/// pricing: absence of an explicit price for these is a hard error.
const HIGH_VALUE_PATTERNS: &[&str] = &["gpt-4", "claude-3", "gemini-pro", "gemini-1.5-pro", "o1-"];

fn is_high_value(canonical_id: &str) -> bool {
    HIGH_VALUE_PATTERNS.iter().any(|p| canonical_id.contains(p))
}

fn cost_per_1k(value: Decimal) -> Decimal {
    value * Decimal::from(1000)
}

/// Validates the sanity bound for every non-zero field of `pricing`.
pub fn validate_bounds(pricing: &Pricing) -> Result<(), String> {
    let min = Decimal::from_str("0.0001").expect("valid decimal literal");
    let max = Decimal::from_str("100.0").expect("valid decimal literal");
    for value in pricing.fields() {
        if value.is_zero() {
            continue;
        }
        if value.is_sign_negative() {
            return Err(format!("negative pricing value: {value}"));
        }
        let per_1k = cost_per_1k(value);
        if per_1k < min || per_1k > max {
            return Err(format!(
                "pricing value {value} (${per_1k}/1k tokens) outside sanity bounds [{min}, {max}]"
            ));
        }
    }
    Ok(())
}

pub struct PricingResolver {
    registry: CanonicalRegistry,
    process_cache: DashMap<(String, String), Pricing>,
}

impl PricingResolver {
    pub fn new(registry: CanonicalRegistry) -> Self {
        Self {
            registry,
            process_cache: DashMap::new(),
        }
    }

    pub fn shared(registry: CanonicalRegistry) -> Arc<Self> {
        Arc::new(Self::new(registry))
    }

    /// Resolution precedence: process cache → registry binding → (persistent
    /// catalog, not modeled separately here — the registry snapshot already
    /// reflects whatever the catalog last synced).
    ///
    /// A `:free` suffix is honored only when `provider_slug` is the
    /// canonical free-tier provider for the (suffix-stripped) model;
    /// otherwise the suffix is stripped and normal pricing applies.
    pub fn resolve(&self, canonical_id: &str, provider_slug: &str) -> Result<Pricing, CoreError> {
        let (stripped_id, is_free_suffixed) = strip_free_suffix(canonical_id);
        // Keyed on the suffixed input, not `stripped_id` alone: an honored
        // `:free` resolution and the normal-pricing resolution for the same
        // (provider, model) pair must not collide in the cache.
        let key = (provider_slug.to_string(), canonical_id.to_string());

        if let Some(cached) = self.process_cache.get(&key) {
            return Ok(*cached.value());
        }

        let model = self.registry.get(stripped_id).ok_or_else(|| CoreError::ModelNotFound {
            input: canonical_id.to_string(),
        })?;
        let binding = model.binding_for(provider_slug).ok_or_else(|| CoreError::Configuration {
            message: format!("no binding for provider '{provider_slug}' on '{stripped_id}'"),
        })?;

        let honor_free_tier = is_free_suffixed && is_free_tier_provider(&model, provider_slug);

        // The anomaly check always looks at the registry's own pricing for
        // this binding, never the free-tier override below, so a legitimate
        // `:free` resolution for a high-value model never reads as an
        // anomaly just because it correctly prices at zero.
        if is_high_value(stripped_id) && binding.pricing.fields().iter().all(|v| v.is_zero()) {
            return Err(CoreError::PricingAnomaly {
                canonical_id: stripped_id.to_string(),
                provider_slug: provider_slug.to_string(),
                message: "high-value model has no explicit pricing".to_string(),
            });
        }
        validate_bounds(&binding.pricing).map_err(|message| CoreError::PricingAnomaly {
            canonical_id: stripped_id.to_string(),
            provider_slug: provider_slug.to_string(),
            message,
        })?;

        let pricing = if honor_free_tier { Pricing::ZERO } else { binding.pricing };

        self.process_cache.insert(key, pricing);
        Ok(pricing)
    }
}

fn strip_free_suffix(canonical_id: &str) -> (&str, bool) {
    match canonical_id.strip_suffix(":free") {
        Some(stripped) => (stripped, true),
        None => (canonical_id, false),
    }
}

/// The canonical free-tier provider is, by convention, the lowest-priority
/// (last-resort) binding still marked `enabled`. A real catalog would carry
/// an explicit flag; this engine derives it rather than invent a new field
/// the registry's data model doesn't have.
fn is_free_tier_provider(model: &crate::catalog::CanonicalModel, provider_slug: &str) -> bool {
    model
        .sorted_bindings()
        .last()
        .map(|b| b.provider_slug == provider_slug)
        .unwrap_or(false)
}
