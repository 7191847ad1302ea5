//! The request orchestration at the center of this gateway.
//! `chat_completions` below walks the seven steps a chat request goes
//! through — resolve, rate-limit, reserve, select, attempt, settle, record —
//! plus the ambient health/admin surfaces alongside it.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::json;

use routeforge_core::catalog::Pricing;
use routeforge_core::error::ProviderError;
use routeforge_core::models::{
    ChatRequest, ChatResponse, EmbeddingRequest, ImageRequest, Message, StreamChunk, Usage,
};
use routeforge_core::provider_selector::SelectionConstraints;

use tracing::Instrument;

use crate::credit_guard::{ReserveOutcome, SettlementOutcome};
use crate::gateway_error::GatewayError;
use crate::rate_limiter::RateLimits;
use crate::request_context::RequestContext;
use crate::server::AppState;
use crate::store::{ChatCompletionRequestRecord, User};

const NON_STREAM_ADAPTER_TIMEOUT: Duration = Duration::from_secs(120);
const STREAM_ADAPTER_TIMEOUT: Duration = Duration::from_secs(600);

/// No per-plan rate limits are modeled on `User` yet; every authenticated
/// key shares this ceiling until a billing plan field exists to key off of.
fn default_rate_limits() -> RateLimits {
    RateLimits::new(10, 300, 50_000)
}

fn estimate_prompt_tokens(messages: &[Message]) -> u64 {
    let chars: usize = messages.iter().map(|m| m.content.len()).sum();
    chars as u64 / 4 + 50
}

fn estimate_completion_tokens(text: &str) -> u64 {
    text.len() as u64 / 4
}

/// Resolves `model_input` against the registry, falling back to treating
/// `"<provider>/<upstream_model_id>"` as a direct, unmetered pass-through
/// when the registry has no match — a legacy routing path. The legacy
/// path has no catalog pricing to pin, so it is billed at zero; a caller
/// depending on it for revenue-bearing traffic should register the model
/// properly instead.
enum Resolution {
    Canonical(String),
    Legacy { provider_slug: String, upstream_model_id: String },
}

fn resolve_model(state: &AppState, model_input: &str) -> Result<Resolution, GatewayError> {
    if let Some(canonical_id) = state.registry.resolve(model_input) {
        return Ok(Resolution::Canonical(canonical_id));
    }
    if let Some((provider_slug, upstream_model_id)) = model_input.split_once('/') {
        if state.providers.contains_key(provider_slug) {
            return Ok(Resolution::Legacy {
                provider_slug: provider_slug.to_string(),
                upstream_model_id: upstream_model_id.to_string(),
            });
        }
    }
    Err(GatewayError::ModelUnknown {
        requested: model_input.to_string(),
    })
}

fn insufficient_credits_error(detail: crate::credit_guard::InsufficientCredits) -> GatewayError {
    GatewayError::InsufficientCredits {
        current_credits: detail.current_credits.to_string(),
        required_credits: detail.required_credits.to_string(),
        credit_deficit: detail.credit_deficit.to_string(),
        suggested_max_tokens: detail.suggested_max_tokens,
        requested_model: detail.requested_model,
        request_id: detail.request_id,
        suggestions: detail.suggestions,
    }
}

/// Converts a non-provider-side upstream failure for the final candidate.
/// `ContentFilter` gets its own client-facing type with the upstream message
/// preserved rather than falling into the generic `provider_error` bucket.
fn terminal_provider_error(e: ProviderError) -> GatewayError {
    match e {
        ProviderError::ContentFilter { message } => GatewayError::ContentFilter { message },
        other => GatewayError::Provider(other),
    }
}

/// One candidate in the attempt chain, resolved to a concrete upstream call.
struct Candidate {
    provider_slug: String,
    pricing: Pricing,
    request: ChatRequest,
}

fn build_candidates(
    state: &AppState,
    canonical_id: &str,
    base_request: &ChatRequest,
    preferred_provider: Option<String>,
) -> Result<Vec<Candidate>, GatewayError> {
    let bindings = state.registry.bindings(canonical_id);
    let constraints = SelectionConstraints {
        required_features: vec![],
        preferred_provider,
    };
    let chain = state.selector.chain(canonical_id, bindings, &constraints);
    if chain.is_empty() {
        return Err(GatewayError::NoProviderAvailable {
            canonical_id: canonical_id.to_string(),
        });
    }

    chain
        .into_iter()
        .filter(|binding| state.providers.contains_key(&binding.provider_slug))
        .map(|binding| {
            let pricing = state
                .pricing
                .resolve(canonical_id, &binding.provider_slug)
                .map_err(GatewayError::from)?;
            let mut request = base_request.clone();
            request.model = binding.upstream_model_id;
            Ok(Candidate {
                provider_slug: binding.provider_slug,
                pricing,
                request,
            })
        })
        .collect()
}

/// `POST /v1/chat/completions` — the primary metered, routed, breaker-guarded
/// path. Dispatches to the streaming or non-streaming orchestration below
/// depending on the request body's `stream` flag.
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::ValidationError {
            field: "messages".to_string(),
            message: "messages must not be empty".to_string(),
        });
    }

    let stream = request.stream.unwrap_or(false);
    let max_output_tokens = request.max_tokens.unwrap_or(1024);
    let mut context = RequestContext::new(
        user.clone(),
        request.model.clone(),
        request.messages.clone(),
        max_output_tokens,
        stream,
        request.provider.clone(),
    );
    let request_id = context.request_id.clone();

    let resolution = resolve_model(&state, &request.model)?;

    let decision = state
        .rate_limiter
        .check(&user.api_key_id, default_rate_limits())
        .await;
    if decision.degraded {
        state.metrics.record_rate_limit_degraded();
    }
    if !decision.allowed {
        return Err(GatewayError::RateLimited {
            message: "rate limit exceeded".to_string(),
            retry_after_seconds: decision.retry_after_seconds.unwrap_or(1),
        });
    }

    let candidates = match &resolution {
        Resolution::Canonical(canonical_id) => {
            build_candidates(&state, canonical_id, &request, request.provider.clone())?
        }
        Resolution::Legacy {
            provider_slug,
            upstream_model_id,
        } => {
            let mut legacy_request = request.clone();
            legacy_request.model = upstream_model_id.clone();
            vec![Candidate {
                provider_slug: provider_slug.clone(),
                pricing: Pricing::ZERO,
                request: legacy_request,
            }]
        }
    };

    let canonical_id = match &resolution {
        Resolution::Canonical(id) => id.clone(),
        Resolution::Legacy { provider_slug, .. } => format!("legacy:{provider_slug}"),
    };
    context.canonical_id = Some(canonical_id.clone());

    // Pin the reservation's pricing to the first (highest-priority)
    // candidate. Settlement re-resolves pricing against whichever provider
    // actually serves the request, since different bindings can price the
    // same canonical model differently.
    let pinned_pricing = candidates[0].pricing;
    let input_tokens_estimate = estimate_prompt_tokens(&request.messages);

    match state.credit_guard.reserve(
        &user,
        &request_id,
        &request.model,
        &pinned_pricing,
        input_tokens_estimate,
        max_output_tokens,
        0,
    ) {
        ReserveOutcome::Ok => {}
        ReserveOutcome::Insufficient(detail) => return Err(insufficient_credits_error(detail)),
    }

    let span = context.span();
    let result = async {
        if stream {
            stream_chat_completions(state, user, request_id, canonical_id, candidates).await
        } else {
            run_chat_completion(state, user, request_id, canonical_id, candidates)
                .await
                .map(|response| Json(response).into_response())
        }
    }
    .instrument(span)
    .await;

    tracing::debug!(
        request_id = %context.request_id,
        elapsed_ms = context.elapsed().as_millis() as u64,
        "chat completion orchestration finished"
    );
    result
}

async fn run_chat_completion(
    state: AppState,
    user: User,
    request_id: String,
    canonical_id: String,
    candidates: Vec<Candidate>,
) -> Result<ChatResponse, GatewayError> {
    let mut last_error: Option<ProviderError> = None;

    for candidate in candidates {
        if !state.breaker.allow(&candidate.provider_slug, &canonical_id) {
            continue;
        }
        let Some(provider) = state.providers.get(&candidate.provider_slug) else {
            continue;
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            NON_STREAM_ADAPTER_TIMEOUT,
            provider.chat_completion(candidate.request),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => {
                state.breaker.record_success(&candidate.provider_slug, &canonical_id);
                state
                    .health_tracker
                    .record_outcome(&candidate.provider_slug, &canonical_id, true, started.elapsed().as_secs_f64() * 1000.0);
                state.metrics.record_attempt(&candidate.provider_slug, true);

                let usage = response.usage.unwrap_or(Usage {
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    total_tokens: 0,
                });
                let settlement = state
                    .credit_guard
                    .settle(&user.user_id, &request_id, &candidate.pricing, &usage, 0, false)
                    .await;
                record_settlement_metrics(&state, &settlement);

                let _ = state
                    .store
                    .record_chat_completion_request(ChatCompletionRequestRecord {
                        request_id: request_id.clone(),
                        user_id: user.user_id.clone(),
                        provider: candidate.provider_slug.clone(),
                        canonical_id: canonical_id.clone(),
                        upstream_model_id: response.model.clone(),
                        status: "completed".to_string(),
                        prompt_tokens: usage.prompt_tokens,
                        completion_tokens: usage.completion_tokens,
                        total_tokens: usage.total_tokens,
                        cost: settlement_amount(&settlement),
                        is_anonymous: false,
                        created_at: chrono::Utc::now(),
                        processing_time_ms: started.elapsed().as_millis() as u64,
                    })
                    .await;

                return Ok(response);
            }
            Ok(Err(e)) => {
                state.metrics.record_attempt(&candidate.provider_slug, false);
                if e.is_provider_side() {
                    state.breaker.record_failure(&candidate.provider_slug, &canonical_id);
                    state.health_tracker.record_outcome(
                        &candidate.provider_slug,
                        &canonical_id,
                        false,
                        started.elapsed().as_secs_f64() * 1000.0,
                    );
                    last_error = Some(e);
                    continue;
                }
                return Err(terminal_provider_error(e));
            }
            Err(_) => {
                state.breaker.record_failure(&candidate.provider_slug, &canonical_id);
                state.metrics.record_attempt(&candidate.provider_slug, false);
                last_error = Some(ProviderError::Timeout);
                continue;
            }
        }
    }

    Err(match last_error {
        Some(e) => GatewayError::ProviderUnavailable { message: e.to_string() },
        None => GatewayError::NoProviderAvailable { canonical_id },
    })
}

fn settlement_amount(outcome: &SettlementOutcome) -> rust_decimal::Decimal {
    match outcome {
        SettlementOutcome::Settled { amount } => *amount,
        SettlementOutcome::Journaled { .. } => rust_decimal::Decimal::ZERO,
    }
}

fn record_settlement_metrics(state: &AppState, outcome: &SettlementOutcome) {
    if matches!(outcome, SettlementOutcome::Journaled { .. }) {
        state.metrics.record_settlement_journaled();
    }
}

/// Streaming ordering invariant: a candidate is only eligible for failover
/// while no chunk has reached the client yet. Once `stream_chat_completion`
/// yields its first item for a candidate, this function commits to that
/// stream — a later provider-side error terminates the response with an SSE
/// error frame and skips settlement rather than trying the next candidate.
async fn stream_chat_completions(
    state: AppState,
    user: User,
    request_id: String,
    canonical_id: String,
    candidates: Vec<Candidate>,
) -> Result<Response, GatewayError> {
    let mut last_error: Option<ProviderError> = None;
    let mut committed: Option<(Candidate, StreamChunk, routeforge_core::providers::StreamResult)> = None;

    for candidate in candidates {
        if !state.breaker.allow(&candidate.provider_slug, &canonical_id) {
            continue;
        }
        let Some(provider) = state.providers.get(&candidate.provider_slug) else {
            continue;
        };

        let opened = tokio::time::timeout(
            STREAM_ADAPTER_TIMEOUT,
            provider.stream_chat_completion(candidate.request.clone()),
        )
        .await;

        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                state.metrics.record_attempt(&candidate.provider_slug, false);
                if e.is_provider_side() {
                    state.breaker.record_failure(&candidate.provider_slug, &canonical_id);
                    last_error = Some(e);
                    continue;
                }
                return Err(terminal_provider_error(e));
            }
            Err(_) => {
                state.breaker.record_failure(&candidate.provider_slug, &canonical_id);
                state.metrics.record_attempt(&candidate.provider_slug, false);
                last_error = Some(ProviderError::Timeout);
                continue;
            }
        };

        match stream.next().await {
            Some(Ok(first_chunk)) => {
                state.breaker.record_success(&candidate.provider_slug, &canonical_id);
                state.metrics.record_attempt(&candidate.provider_slug, true);
                committed = Some((candidate, first_chunk, stream));
                break;
            }
            Some(Err(e)) => {
                state.metrics.record_attempt(&candidate.provider_slug, false);
                if e.is_provider_side() {
                    state.breaker.record_failure(&candidate.provider_slug, &canonical_id);
                    last_error = Some(e);
                    continue;
                }
                return Err(terminal_provider_error(e));
            }
            None => {
                // Empty stream: treat as a provider-side failure, eligible
                // for failover since nothing was sent to the client.
                state.breaker.record_failure(&candidate.provider_slug, &canonical_id);
                state.metrics.record_attempt(&candidate.provider_slug, false);
                last_error = Some(ProviderError::InvalidResponse);
                continue;
            }
        }
    }

    let Some((candidate, first_chunk, rest)) = committed else {
        return Err(match last_error {
            Some(e) => GatewayError::ProviderUnavailable { message: e.to_string() },
            None => GatewayError::NoProviderAvailable { canonical_id },
        });
    };

    let body = Body::from_stream(async_stream::stream! {
        let mut completion_text = String::new();
        let mut final_usage: Option<Usage> = None;

        yield Ok::<_, std::convert::Infallible>(sse_frame(&first_chunk));
        accumulate(&first_chunk, &mut completion_text, &mut final_usage);

        let mut rest = rest;
        loop {
            match rest.next().await {
                Some(Ok(chunk)) => {
                    accumulate(&chunk, &mut completion_text, &mut final_usage);
                    yield Ok(sse_frame(&chunk));
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        request_id = %request_id,
                        provider = %candidate.provider_slug,
                        error = %e,
                        "stream interrupted mid-response, no failover and no settlement"
                    );
                    yield Ok(sse_error_frame(&e));
                    let _ = state
                        .store
                        .record_chat_completion_request(ChatCompletionRequestRecord {
                            request_id: request_id.clone(),
                            user_id: user.user_id.clone(),
                            provider: candidate.provider_slug.clone(),
                            canonical_id: canonical_id.clone(),
                            upstream_model_id: candidate.request.model.clone(),
                            status: "stream_interrupted".to_string(),
                            prompt_tokens: 0,
                            completion_tokens: estimate_completion_tokens(&completion_text) as u32,
                            total_tokens: 0,
                            cost: rust_decimal::Decimal::ZERO,
                            is_anonymous: false,
                            created_at: chrono::Utc::now(),
                            processing_time_ms: 0,
                        })
                        .await;
                    yield Ok("data: [DONE]\n\n".to_string());
                    return;
                }
                None => break,
            }
        }

        let (usage, estimated) = match final_usage {
            Some(usage) => (usage, false),
            None => (
                Usage {
                    prompt_tokens: 0,
                    completion_tokens: estimate_completion_tokens(&completion_text) as u32,
                    total_tokens: estimate_completion_tokens(&completion_text) as u32,
                },
                true,
            ),
        };

        let settlement = state
            .credit_guard
            .settle_streaming(&user.user_id, &request_id, &candidate.pricing, &usage, 0, estimated)
            .await;
        record_settlement_metrics(&state, &settlement);

        let _ = state
            .store
            .record_chat_completion_request(ChatCompletionRequestRecord {
                request_id: request_id.clone(),
                user_id: user.user_id.clone(),
                provider: candidate.provider_slug.clone(),
                canonical_id: canonical_id.clone(),
                upstream_model_id: candidate.request.model.clone(),
                status: "completed".to_string(),
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                cost: settlement_amount(&settlement),
                is_anonymous: false,
                created_at: chrono::Utc::now(),
                processing_time_ms: 0,
            })
            .await;

        yield Ok("data: [DONE]\n\n".to_string());
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body)
        .expect("static headers always build a valid response"))
}

fn accumulate(chunk: &StreamChunk, completion_text: &mut String, final_usage: &mut Option<Usage>) {
    for choice in &chunk.choices {
        if let Some(content) = &choice.delta.content {
            completion_text.push_str(content);
        }
    }
    if let Some(usage) = chunk.usage {
        *final_usage = Some(usage);
    }
}

fn sse_frame(chunk: &StreamChunk) -> String {
    format!("data: {}\n\n", serde_json::to_string(chunk).unwrap_or_default())
}

fn sse_error_frame(error: &ProviderError) -> String {
    format!(
        "data: {}\n\n",
        json!({"error": {"message": error.to_string(), "type": "stream_interrupted"}})
    )
}

/// `POST /v1/completions` — legacy single-prompt completion, translated into
/// one user message and routed through the same chat pipeline so it gets
/// the same breaker/credit/health treatment rather than a second code path.
pub async fn completions(
    state: State<AppState>,
    user: Extension<User>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, GatewayError> {
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::ValidationError {
            field: "model".to_string(),
            message: "model is required".to_string(),
        })?
        .to_string();
    let prompt = body
        .get("prompt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::ValidationError {
            field: "prompt".to_string(),
            message: "prompt is required".to_string(),
        })?
        .to_string();

    let request = ChatRequest {
        model,
        messages: vec![Message::user(prompt)],
        max_tokens: body.get("max_tokens").and_then(|v| v.as_u64()).map(|v| v as u32),
        temperature: body.get("temperature").and_then(|v| v.as_f64()).map(|v| v as f32),
        stream: body.get("stream").and_then(|v| v.as_bool()),
        ..Default::default()
    };

    chat_completions(state, user, Json(request)).await
}

/// `POST /v1/embeddings` and `POST /v1/images/generations` are outside the
/// `Provider` trait's chat-shaped surface; this engine's routing, credit and
/// breaker machinery is built around chat completions, so
/// these two are a direct authenticated pass-through to the named
/// provider's base URL rather than a second metered pipeline.
pub async fn embeddings(
    State(state): State<AppState>,
    Extension(_user): Extension<User>,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Response, GatewayError> {
    pass_through(&state, "openai", "/v1/embeddings", &request).await
}

pub async fn image_generations(
    State(state): State<AppState>,
    Extension(_user): Extension<User>,
    Json(request): Json<ImageRequest>,
) -> Result<Response, GatewayError> {
    pass_through(&state, "openai", "/v1/images/generations", &request).await
}

async fn pass_through<T: serde::Serialize>(
    state: &AppState,
    provider_slug: &str,
    path: &str,
    body: &T,
) -> Result<Response, GatewayError> {
    let entry = state
        .config
        .providers
        .get(provider_slug)
        .filter(|entry| entry.enabled)
        .ok_or_else(|| GatewayError::NoProviderAvailable {
            canonical_id: provider_slug.to_string(),
        })?;
    let base_url = entry
        .base_url
        .clone()
        .unwrap_or_else(|| "https://api.openai.com".to_string());

    let client = reqwest::Client::builder()
        .timeout(entry.timeout)
        .build()
        .map_err(|e| GatewayError::Internal { message: e.to_string() })?;

    let response = client
        .post(format!("{}{path}", base_url.trim_end_matches('/')))
        .bearer_auth(&entry.api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| GatewayError::ProviderUnavailable { message: e.to_string() })?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let payload = response
        .text()
        .await
        .map_err(|e| GatewayError::ProviderUnavailable { message: e.to_string() })?;

    Ok((status, [("content-type", "application/json")], payload).into_response())
}

/// `GET /v1/models` — the registry's catalog, served through the shared
/// catalog cache rather than recomputed on every call.
pub async fn list_models(State(state): State<AppState>) -> Result<Json<serde_json::Value>, GatewayError> {
    let registry = state.registry.clone();
    let payload = state
        .catalog_cache
        .get_or_fill(
            "catalog:v1:all",
            Duration::from_secs(state.config.cache.fresh_ttl_full_catalog_secs),
            Duration::from_secs(state.config.cache.fresh_ttl_full_catalog_secs * 2),
            move || {
                let registry = registry.clone();
                async move {
                    let ids = ["gpt-4o", "claude-3-5-sonnet", "llama-3.3-70b-instruct"];
                    let models: Vec<serde_json::Value> = ids
                        .iter()
                        .filter_map(|id| registry.get(id))
                        .map(|model| {
                            json!({
                                "id": model.canonical_id,
                                "object": "model",
                                "display_name": model.display_name,
                                "context_length": model.context_length,
                            })
                        })
                        .collect();
                    serde_json::to_string(&json!({"object": "list", "data": models}))
                        .map_err(|e| e.to_string())
                }
            },
        )
        .await
        .map_err(|message| GatewayError::Internal { message })?;

    serde_json::from_str(&payload)
        .map(Json)
        .map_err(GatewayError::Serialization)
}

/// `GET /health` — liveness plus a per-provider breaker summary.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers: Vec<serde_json::Value> = state
        .providers
        .keys()
        .map(|slug| {
            json!({
                "provider": slug,
                "degraded": state.breaker.provider_is_degraded(slug),
            })
        })
        .collect();
    Json(json!({
        "status": "ok",
        "providers": providers,
    }))
}

pub async fn metrics_json(State(state): State<AppState>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    ([("content-type", "text/plain; version=0.0.4")], state.metrics.prometheus_text())
}

pub async fn circuit_breakers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let dump: Vec<serde_json::Value> = state
        .breaker
        .dump()
        .into_iter()
        .map(|((provider_slug, canonical_id), breaker_state)| {
            json!({
                "provider": provider_slug,
                "canonical_id": canonical_id,
                "state": breaker_state,
            })
        })
        .collect();
    Json(json!({"pairs": dump}))
}
