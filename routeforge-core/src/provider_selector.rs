//! `ProviderSelector` — builds the ordered, filtered attempt chain for one
//! request.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::catalog::{Feature, ProviderBinding};
use crate::circuit_breaker::CircuitBreaker;

/// Per-request constraints on which bindings may be selected.
#[derive(Debug, Clone, Default)]
pub struct SelectionConstraints {
    pub required_features: Vec<Feature>,
    pub preferred_provider: Option<String>,
}

pub struct ProviderSelector {
    breaker: std::sync::Arc<CircuitBreaker>,
    max_chain_length: usize,
    round_robin: AtomicUsize,
}

impl ProviderSelector {
    pub fn new(breaker: std::sync::Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            max_chain_length: 3,
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Filter by enabled/breaker/features/preferred-provider, then
    /// order by ascending priority (round-robin within ties), then cap at
    /// `max_chain_length`.
    pub fn chain(
        &self,
        canonical_id: &str,
        bindings: Vec<ProviderBinding>,
        constraints: &SelectionConstraints,
    ) -> Vec<ProviderBinding> {
        let mut candidates: Vec<ProviderBinding> = bindings
            .into_iter()
            .filter(|b| b.enabled)
            .filter(|b| self.breaker.allow(&b.provider_slug, canonical_id))
            .filter(|b| {
                constraints
                    .required_features
                    .iter()
                    .all(|feature| b.supports(*feature))
            })
            .collect();

        if let Some(preferred) = &constraints.preferred_provider {
            if let Some(pos) = candidates.iter().position(|b| &b.provider_slug == preferred) {
                let preferred_binding = candidates.remove(pos);
                self.order_by_priority(&mut candidates);
                candidates.insert(0, preferred_binding);
                candidates.truncate(self.max_chain_length);
                return candidates;
            }
            // Preferred provider unreachable: fall through, chain continues
            // with the remainder in priority order.
        }

        self.order_by_priority(&mut candidates);
        candidates.truncate(self.max_chain_length);
        candidates
    }

    fn order_by_priority(&self, candidates: &mut [ProviderBinding]) {
        candidates.sort_by_key(|b| b.priority);
        // Round-robin tie-break: rotate the slice of bindings that share the
        // lowest priority so repeated calls spread load across them.
        if candidates.len() > 1 {
            let lowest = candidates[0].priority;
            let tie_len = candidates.iter().take_while(|b| b.priority == lowest).count();
            if tie_len > 1 {
                let offset = self.round_robin.fetch_add(1, Ordering::Relaxed) % tie_len;
                candidates[..tie_len].rotate_left(offset);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Pricing;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn binding(slug: &str, priority: u32, enabled: bool) -> ProviderBinding {
        ProviderBinding {
            provider_slug: slug.into(),
            upstream_model_id: format!("{slug}/m"),
            priority,
            features: BTreeSet::from([Feature::Streaming]),
            pricing: Pricing::ZERO,
            enabled,
        }
    }

    fn selector() -> ProviderSelector {
        ProviderSelector::new(Arc::new(CircuitBreaker::new(Default::default())))
    }

    #[test]
    fn chain_excludes_disabled_bindings() {
        let selector = selector();
        let chain = selector.chain(
            "m",
            vec![binding("a", 1, false), binding("b", 2, true)],
            &SelectionConstraints::default(),
        );
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].provider_slug, "b");
    }

    #[test]
    fn chain_orders_by_ascending_priority() {
        let selector = selector();
        let chain = selector.chain(
            "m",
            vec![binding("b", 2, true), binding("a", 1, true)],
            &SelectionConstraints::default(),
        );
        assert_eq!(chain[0].provider_slug, "a");
        assert_eq!(chain[1].provider_slug, "b");
    }

    #[test]
    fn preferred_provider_goes_first_when_reachable() {
        let selector = selector();
        let constraints = SelectionConstraints {
            preferred_provider: Some("c".to_string()),
            ..Default::default()
        };
        let chain = selector.chain(
            "m",
            vec![binding("a", 1, true), binding("b", 2, true), binding("c", 3, true)],
            &constraints,
        );
        assert_eq!(chain[0].provider_slug, "c");
    }

    #[test]
    fn chain_is_capped_at_three() {
        let selector = selector();
        let chain = selector.chain(
            "m",
            vec![
                binding("a", 1, true),
                binding("b", 2, true),
                binding("c", 3, true),
                binding("d", 4, true),
            ],
            &SelectionConstraints::default(),
        );
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn open_breaker_excludes_the_pair() {
        let breaker = Arc::new(CircuitBreaker::new(Default::default()));
        for _ in 0..5 {
            breaker.record_failure("a", "m");
        }
        let selector = ProviderSelector::new(breaker);
        let chain = selector.chain(
            "m",
            vec![binding("a", 1, true), binding("b", 2, true)],
            &SelectionConstraints::default(),
        );
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].provider_slug, "b");
    }

    #[test]
    fn required_feature_excludes_bindings_lacking_it() {
        let selector = selector();
        let mut b = binding("a", 1, true);
        b.features.clear();
        let constraints = SelectionConstraints {
            required_features: vec![Feature::Streaming],
            ..Default::default()
        };
        let chain = selector.chain("m", vec![b], &constraints);
        assert!(chain.is_empty());
    }
}
