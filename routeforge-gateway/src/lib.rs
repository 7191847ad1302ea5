//! Gateway binary crate: the HTTP surface, credit/rate-limit/health
//! machinery, and process bootstrap built on top of `routeforge-core`'s
//! routing engine.
//!
//! The library is organized as:
//!
//! - `config` — TOML configuration plus environment-variable overrides
//! - `store` — the persistence trait for users/credits/health rows, with an
//!   in-memory reference implementation
//! - `auth` — bearer-token authentication against `Store`
//! - `rate_limiter` — Redis-backed three-window rate limiting with a local
//!   fail-open fallback
//! - `cache_backend` — the Redis `RemoteCacheBackend` used by
//!   `routeforge_core::catalog_cache`
//! - `credit_guard` — pre-flight reservation and post-completion settlement
//! - `health_tracker` — tiered per-(provider, model) health probing
//! - `metrics` — in-process counters exposed as JSON and Prometheus text
//! - `request_context` — per-request metadata threaded through a chat call
//! - `handlers` — the HTTP handlers, including the chat completion
//!   orchestration that ties every other module together
//! - `middleware` — auth resolution and request logging
//! - `server` — `AppState` and `create_server`, wiring everything above into
//!   one axum `Router`
//! - `gateway_error` — the HTTP-facing error taxonomy

pub mod auth;
pub mod cache_backend;
pub mod config;
pub mod credit_guard;
pub mod gateway_error;
pub mod handlers;
pub mod health_tracker;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;
pub mod request_context;
pub mod server;
pub mod store;

pub use server::create_server;
