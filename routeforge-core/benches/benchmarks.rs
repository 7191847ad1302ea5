use std::collections::BTreeSet;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use routeforge_core::catalog::{CanonicalModel, Feature, Modality, Pricing, ProviderBinding};
use routeforge_core::{CanonicalRegistry, CircuitBreaker, Message, ProviderSelector, SelectionConstraints};

fn sample_registry() -> CanonicalRegistry {
    let model = CanonicalModel {
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
    };
    CanonicalRegistry::new(vec![model]).unwrap()
}

fn bench_registry_resolve(c: &mut Criterion) {
    let registry = sample_registry();
    c.bench_function("registry_resolve_alias", |b| {
        b.iter(|| {
            black_box(registry.resolve("META-LLAMA/llama-3.3-70B-instruct"));
        });
    });
}

fn bench_provider_chain(c: &mut Criterion) {
    let registry = sample_registry();
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let selector = ProviderSelector::new(breaker);
    let bindings = registry.bindings("llama-3.3-70b-instruct");
    c.bench_function("provider_selector_chain", |b| {
        b.iter(|| {
            black_box(selector.chain(
                "llama-3.3-70b-instruct",
                bindings.clone(),
                &SelectionConstraints::default(),
            ));
        });
    });
}

fn bench_message_creation(c: &mut Criterion) {
    c.bench_function("message_creation", |b| {
        b.iter(|| {
            let _user_msg = Message::user("Hello, world!");
            let _assistant_msg = Message::assistant("Hi there!");
            let _system_msg = Message::system("You are a helpful assistant.");
        });
    });
}

fn bench_chat_request_serialization(c: &mut Criterion) {
    use routeforge_core::models::ChatRequest;

    let request = ChatRequest {
        model: "gpt-4".to_string(),
        messages: vec![
            Message::system("You are a helpful assistant."),
            Message::user("Hello, how are you?"),
        ],
        temperature: Some(0.7),
        max_tokens: Some(100),
        stream: Some(false),
        ..Default::default()
    };

    c.bench_function("chat_request_serialization", |b| {
        b.iter(|| {
            let _json = serde_json::to_string(black_box(&request));
        });
    });
}

criterion_group!(
    benches,
    bench_registry_resolve,
    bench_provider_chain,
    bench_message_creation,
    bench_chat_request_serialization
);
criterion_main!(benches);
