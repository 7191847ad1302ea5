//! Catalog data types: the canonical model identity and its provider
//! bindings, as loaded by the registry and served by the catalog cache.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Streaming,
    FunctionCalling,
    Vision,
    Audio,
    Tools,
}

/// Per-single-token USD pricing, string-encoded on the wire to preserve
/// precision; see `PricingResolver` for the bounds every non-zero field
/// must satisfy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pricing {
    #[serde(with = "rust_decimal::serde::str")]
    pub prompt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub completion: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub request: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub image: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub web_search: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub reasoning: Decimal,
}

impl Pricing {
    pub const ZERO: Pricing = Pricing {
        prompt: Decimal::ZERO,
        completion: Decimal::ZERO,
        request: Decimal::ZERO,
        image: Decimal::ZERO,
        web_search: Decimal::ZERO,
        reasoning: Decimal::ZERO,
    };

    /// Every field in one slice, for sanity-bound validation.
    pub fn fields(&self) -> [Decimal; 6] {
        [
            self.prompt,
            self.completion,
            self.request,
            self.image,
            self.web_search,
            self.reasoning,
        ]
    }
}

/// One provider's concrete binding for a canonical model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBinding {
    pub provider_slug: String,
    pub upstream_model_id: String,
    pub priority: u32,
    pub features: BTreeSet<Feature>,
    pub pricing: Pricing,
    pub enabled: bool,
}

impl ProviderBinding {
    pub fn supports(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/// A stable logical model identity, with one or more provider bindings
/// ordered by ascending priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalModel {
    pub canonical_id: String,
    pub display_name: String,
    pub description: String,
    pub context_length: u32,
    pub modalities: BTreeSet<Modality>,
    pub aliases: BTreeSet<String>,
    pub providers: Vec<ProviderBinding>,
}

impl CanonicalModel {
    /// `providers`, sorted ascending by priority. The invariant that
    /// `providers` is non-empty is enforced at registry build time, not
    /// here — this is a plain data container.
    pub fn sorted_bindings(&self) -> Vec<&ProviderBinding> {
        let mut bindings: Vec<&ProviderBinding> = self.providers.iter().collect();
        bindings.sort_by_key(|b| b.priority);
        bindings
    }

    pub fn binding_for(&self, provider_slug: &str) -> Option<&ProviderBinding> {
        self.providers
            .iter()
            .find(|b| b.provider_slug == provider_slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn binding(slug: &str, priority: u32) -> ProviderBinding {
        ProviderBinding {
            provider_slug: slug.into(),
            upstream_model_id: format!("{slug}/model"),
            priority,
            features: BTreeSet::from([Feature::Streaming]),
            pricing: Pricing::ZERO,
            enabled: true,
        }
    }

    #[test]
    fn sorted_bindings_orders_by_ascending_priority() {
        let model = CanonicalModel {
            canonical_id: "m".into(),
            display_name: "M".into(),
            description: String::new(),
            context_length: 8192,
            modalities: BTreeSet::from([Modality::Text]),
            aliases: BTreeSet::new(),
            providers: vec![binding("b", 2), binding("a", 1)],
        };
        let sorted = model.sorted_bindings();
        assert_eq!(sorted[0].provider_slug, "a");
        assert_eq!(sorted[1].provider_slug, "b");
    }

    #[test]
    fn pricing_round_trips_through_json_as_strings() {
        let pricing = Pricing {
            prompt: Decimal::from_str("0.0000009").unwrap(),
            completion: Decimal::from_str("0.0000009").unwrap(),
            request: Decimal::ZERO,
            image: Decimal::ZERO,
            web_search: Decimal::ZERO,
            reasoning: Decimal::ZERO,
        };
        let json = serde_json::to_string(&pricing).unwrap();
        assert!(json.contains("\"0.0000009\""));
        let back: Pricing = serde_json::from_str(&json).unwrap();
        assert_eq!(back.prompt, pricing.prompt);
    }
}
