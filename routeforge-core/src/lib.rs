//! Canonical model registry, provider selection, circuit breaking, pricing
//! and catalog caching for a multi-provider inference gateway.
//!
//! This crate is the routing/catalog layer consumed by `routeforge-gateway`:
//! it resolves a caller-facing model name to a canonical model, builds an
//! ordered attempt chain of provider bindings, tracks per-pair health via a
//! circuit breaker, and exposes a uniform `Provider` trait over the
//! upstreams actually called. It has no knowledge of HTTP, credits, or
//! persistence — those live in the gateway crate, which composes this
//! crate's pieces into one end-to-end request handler.

pub mod catalog;
pub mod catalog_cache;
pub mod circuit_breaker;
pub mod error;
pub mod models;
pub mod pricing;
pub mod provider_selector;
pub mod providers;
pub mod registry;

pub use catalog::{CanonicalModel, Feature, Modality, Pricing, ProviderBinding};
pub use circuit_breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use error::{CoreError, ProviderError};
pub use provider_selector::{ProviderSelector, SelectionConstraints};
pub use providers::{create_provider, Provider, ProviderConfig};
pub use registry::{CanonicalRegistry, RegistrySyncJob, StaticSeedSyncJob};

pub type Result<T> = std::result::Result<T, CoreError>;
