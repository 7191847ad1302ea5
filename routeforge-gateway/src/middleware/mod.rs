//! Axum middleware stack: auth resolution, request logging, and request-id
//! tagging for metrics/tracing correlation. Order in `server::create_server`
//! is auth innermost, then logging, then CORS outermost — an unauthenticated
//! request never reaches a handler, but still gets logged and CORS-wrapped.

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::time::Instant;
use uuid::Uuid;

use crate::server::AppState;

/// Resolves `Authorization: Bearer <api_key>` into a `User` and inserts it
/// into the request's extensions for handlers to pull out. `OPTIONS`
/// preflight requests and a disabled `auth.enabled` config both bypass this
/// check entirely.
pub async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }
    if !state.config.auth.enabled {
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match state.auth.authenticate(header.as_deref()).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Tags every request with a UUID for cross-cutting correlation between this
/// log line, the handler's own `RequestContext`, and whatever `request_id`
/// later ends up in a settlement or error body.
pub async fn metrics_middleware(State(_state): State<AppState>, mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(request_id));
    next.run(request).await
}

#[derive(Clone)]
pub struct RequestId(pub String);

pub async fn logging_middleware(State(_state): State<AppState>, request: Request, next: Next) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request processed"
    );

    response
}
