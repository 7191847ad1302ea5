//! `CanonicalRegistry` — logical→physical model resolution.
//!
//! The registry is immutable at use: readers always dereference one
//! `arc_swap::ArcSwap<RegistrySnapshot>` and see a fully-built, consistent
//! index. Rebuilding a snapshot (alias/reverse-index construction, the
//! costly part) happens off to the side and is swapped in atomically —
//! there is no lock readers can block on.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::catalog::{CanonicalModel, ProviderBinding};
use crate::error::CoreError;

fn normalize(input: &str) -> String {
    input.trim().to_lowercase()
}

/// One consistent, immutable view of the catalog.
struct RegistrySnapshot {
    models: HashMap<String, Arc<CanonicalModel>>,
    alias_index: HashMap<String, String>,
    reverse_index: HashMap<(String, String), String>,
}

impl RegistrySnapshot {
    fn build(models: Vec<CanonicalModel>) -> Result<Self, CoreError> {
        let mut by_id = HashMap::with_capacity(models.len());
        let mut alias_index = HashMap::new();
        let mut reverse_index = HashMap::new();

        for model in models {
            if model.providers.is_empty() {
                return Err(CoreError::Configuration {
                    message: format!(
                        "canonical model '{}' has no provider bindings",
                        model.canonical_id
                    ),
                });
            }
            let canonical_id = normalize(&model.canonical_id);
            if by_id.contains_key(&canonical_id) {
                return Err(CoreError::Configuration {
                    message: format!("duplicate canonical_id '{canonical_id}'"),
                });
            }
            for alias in &model.aliases {
                alias_index.insert(normalize(alias), canonical_id.clone());
            }
            for binding in &model.providers {
                reverse_index.insert(
                    (
                        binding.provider_slug.clone(),
                        binding.upstream_model_id.clone(),
                    ),
                    canonical_id.clone(),
                );
            }
            by_id.insert(canonical_id, Arc::new(model));
        }

        Ok(Self {
            models: by_id,
            alias_index,
            reverse_index,
        })
    }

    fn resolve(&self, input: &str) -> Option<String> {
        let key = normalize(input);
        if self.models.contains_key(&key) {
            return Some(key);
        }
        if let Some(canonical_id) = self.alias_index.get(&key) {
            return Some(canonical_id.clone());
        }
        None
    }

    fn resolve_reverse(&self, provider_slug: &str, upstream_model_id: &str) -> Option<String> {
        self.reverse_index
            .get(&(provider_slug.to_string(), upstream_model_id.to_string()))
            .cloned()
    }
}

/// Produces a fresh `RegistrySnapshot`'s backing data — fetch from the
/// catalog store/cache, rebuild indices, hand the result to `CanonicalRegistry::swap`.
/// No scheduling daemon ships in this crate; a caller (e.g. an admin
/// endpoint or a cron-like task elsewhere) decides when to invoke it.
#[async_trait]
pub trait RegistrySyncJob: Send + Sync {
    async fn fetch_models(&self) -> Result<Vec<CanonicalModel>, CoreError>;
}

/// Sync job that serves a fixed, bundled seed catalog. Sufficient for
/// running standalone without a real `models_catalog` table.
pub struct StaticSeedSyncJob {
    seed: Vec<CanonicalModel>,
}

impl StaticSeedSyncJob {
    pub fn new(seed: Vec<CanonicalModel>) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl RegistrySyncJob for StaticSeedSyncJob {
    async fn fetch_models(&self) -> Result<Vec<CanonicalModel>, CoreError> {
        Ok(self.seed.clone())
    }
}

/// Logical→physical model registry. Cheap to clone (it's an `Arc` around
/// the swap cell); share one instance across the process.
#[derive(Clone)]
pub struct CanonicalRegistry {
    snapshot: Arc<ArcSwap<RegistrySnapshot>>,
}

impl CanonicalRegistry {
    pub fn new(models: Vec<CanonicalModel>) -> Result<Self, CoreError> {
        let snapshot = RegistrySnapshot::build(models)?;
        Ok(Self {
            snapshot: Arc::new(ArcSwap::from_pointee(snapshot)),
        })
    }

    pub fn empty() -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(
                RegistrySnapshot::build(Vec::new()).expect("empty snapshot always builds"),
            )),
        }
    }

    /// Build a new snapshot from `models` and atomically install it.
    /// Existing readers mid-lookup keep using the old snapshot to
    /// completion; no reader observes a torn state.
    pub fn swap(&self, models: Vec<CanonicalModel>) -> Result<(), CoreError> {
        let snapshot = RegistrySnapshot::build(models)?;
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }

    /// Resolution order: exact canonical_id, then exact alias, then exact
    /// `(provider, upstream_model_id)` reverse index. Case-insensitive, no
    /// fuzzy matching.
    pub fn resolve(&self, input: &str) -> Option<String> {
        let guard = self.snapshot.load();
        guard.resolve(input)
    }

    pub fn resolve_by_upstream(&self, provider_slug: &str, upstream_model_id: &str) -> Option<String> {
        let guard = self.snapshot.load();
        guard.resolve_reverse(provider_slug, upstream_model_id)
    }

    pub fn get(&self, canonical_id: &str) -> Option<Arc<CanonicalModel>> {
        let guard = self.snapshot.load();
        guard.models.get(&normalize(canonical_id)).cloned()
    }

    /// Already priority-sorted.
    pub fn bindings(&self, canonical_id: &str) -> Vec<ProviderBinding> {
        self.get(canonical_id)
            .map(|model| {
                model
                    .sorted_bindings()
                    .into_iter()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    }

    pub fn transform(&self, canonical_id: &str, provider_slug: &str) -> Option<String> {
        self.get(canonical_id)?
            .binding_for(provider_slug)
            .map(|b| b.upstream_model_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Feature, Modality, Pricing};
    use std::collections::BTreeSet;

    fn sample_model() -> CanonicalModel {
        CanonicalModel {
            canonical_id: "llama-3.3-70b-instruct".into(),
            display_name: "Llama 3.3 70B Instruct".into(),
            description: String::new(),
            context_length: 128_000,
            modalities: BTreeSet::from([Modality::Text]),
            aliases: BTreeSet::from(["meta-llama/Llama-3.3-70B-Instruct".to_string()]),
            providers: vec![
                ProviderBinding {
                    provider_slug: "fireworks".into(),
                    upstream_model_id: "accounts/fireworks/models/llama-v3p3-70b-instruct".into(),
                    priority: 1,
                    features: BTreeSet::from([Feature::Streaming]),
                    pricing: Pricing::ZERO,
                    enabled: true,
                },
                ProviderBinding {
                    provider_slug: "together".into(),
                    upstream_model_id: "meta-llama/Llama-3.3-70B-Instruct-Turbo".into(),
                    priority: 2,
                    features: BTreeSet::from([Feature::Streaming]),
                    pricing: Pricing::ZERO,
                    enabled: true,
                },
            ],
        }
    }

    #[test]
    fn alias_resolution_is_case_insensitive() {
        let registry = CanonicalRegistry::new(vec![sample_model()]).unwrap();
        assert_eq!(
            registry.resolve("META-LLAMA/llama-3.3-70B-instruct"),
            Some("llama-3.3-70b-instruct".to_string())
        );
        assert_eq!(
            registry.resolve("llama-3.3-70b-instruct"),
            Some("llama-3.3-70b-instruct".to_string())
        );
    }

    #[test]
    fn resolve_unknown_input_is_none() {
        let registry = CanonicalRegistry::new(vec![sample_model()]).unwrap();
        assert_eq!(registry.resolve("does-not-exist"), None);
    }

    #[test]
    fn bindings_are_priority_sorted() {
        let registry = CanonicalRegistry::new(vec![sample_model()]).unwrap();
        let bindings = registry.bindings("llama-3.3-70b-instruct");
        assert_eq!(bindings[0].provider_slug, "fireworks");
        assert_eq!(bindings[1].provider_slug, "together");
    }

    #[test]
    fn swap_replaces_the_snapshot_atomically() {
        let registry = CanonicalRegistry::new(vec![sample_model()]).unwrap();
        assert!(registry.resolve("llama-3.3-70b-instruct").is_some());
        registry.swap(vec![]).unwrap();
        assert!(registry.resolve("llama-3.3-70b-instruct").is_none());
    }

    #[test]
    fn build_rejects_model_with_no_bindings() {
        let mut model = sample_model();
        model.providers.clear();
        assert!(CanonicalRegistry::new(vec![model]).is_err());
    }

    #[tokio::test]
    async fn static_seed_sync_job_returns_seed() {
        let job = StaticSeedSyncJob::new(vec![sample_model()]);
        let models = job.fetch_models().await.unwrap();
        assert_eq!(models.len(), 1);
    }
}
