//! Protocol-mode and transparent-mode AI handlers.
//!
//! Protocol requests are parsed into the OpenAI pivot, translated to the
//! backend dialect, dispatched, and translated back, with fallback across
//! the model's instance chain on retryable upstream failures. Transparent
//! requests are forwarded verbatim with credentials attached.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::openai::{self, ChatCompletionRequest};

use crate::gateway::audit::AuditRecord;
use crate::gateway::auth::Identity;
use crate::gateway::classify::{AiProtocol, ProtocolEndpoint};
use crate::gateway::config::{ProviderInstance, ProviderKind};
use crate::gateway::observability::Metrics;
use crate::gateway::translate::{self, bedrock, TranslationPlan};
use crate::gateway::{GatewayError, RequestEnvelope};

use super::{render_error, unix_now, GatewayState};

const PROTOCOL_BODY_LIMIT: usize = 1024 * 1024;
const TRANSPARENT_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[allow(clippy::too_many_arguments)]
pub(super) async fn handle_protocol(
    state: &GatewayState,
    parts: &Parts,
    body: Body,
    request_id: &str,
    identity: &Identity,
    protocol: AiProtocol,
    instance: Option<&str>,
    _endpoint: ProtocolEndpoint,
) -> Response {
    let path = parts.uri.path().to_string();
    let body = match read_body(body, PROTOCOL_BODY_LIMIT).await {
        Ok(body) => body,
        Err(err) => {
            state.metrics().record_invalid_request();
            return render_error(&path, &err);
        }
    };

    match protocol {
        AiProtocol::OpenAi => {
            handle_openai(state, parts, body, request_id, identity, instance).await
        }
        AiProtocol::Anthropic => {
            handle_native_dialect(
                state,
                parts,
                body,
                request_id,
                identity,
                instance,
                ProviderKind::Anthropic,
            )
            .await
        }
        AiProtocol::BedrockNative => {
            handle_bedrock_native(state, parts, body, request_id, identity, instance).await
        }
    }
}

/// The OpenAI-dialect path: pivot parse, instance resolution, translate,
/// dispatch, translate back, with fallback.
async fn handle_openai(
    state: &GatewayState,
    parts: &Parts,
    body: Bytes,
    request_id: &str,
    identity: &Identity,
    instance: Option<&str>,
) -> Response {
    let path = parts.uri.path().to_string();
    let bytes_in = body.len() as u64;
    let created = unix_now();

    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            state.metrics().record_invalid_request();
            return render_error(
                &path,
                &GatewayError::invalid(format!("unparseable chat completion request: {err}")),
            );
        }
    };
    if request.model.trim().is_empty() {
        state.metrics().record_invalid_request();
        return render_error(&path, &GatewayError::invalid("model is required"));
    }

    let registry = state.registry();
    let candidates = match resolve_candidates(state, instance, &request.model) {
        Ok(candidates) => candidates,
        Err(err) => {
            note_error(state.metrics(), &err);
            return render_error(&path, &err);
        }
    };

    let routing = registry.model_router().routing();
    let max_attempts = if routing.fallback.enabled {
        candidates.len().min(1 + routing.fallback.max_attempts)
    } else {
        1
    };

    let mut last_error = GatewayError::ModelUnavailable {
        model: request.model.clone(),
    };
    for (attempt, target) in candidates.iter().take(max_attempts).enumerate() {
        let start = Instant::now();
        let outcome = invoke_once(state, target, &request, created).await;

        match outcome {
            Ok((response, bytes_out)) => {
                audit(
                    state, request_id, identity, parts, target, 200, start, bytes_in, bytes_out,
                    None,
                );
                if attempt > 0 {
                    tracing::info!(
                        model = %request.model,
                        instance = %target.id,
                        "fallback instance served the request"
                    );
                }
                return response;
            }
            Err(err) => {
                note_error(state.metrics(), &err);
                audit(
                    state,
                    request_id,
                    identity,
                    parts,
                    target,
                    err.http_status(),
                    start,
                    bytes_in,
                    0,
                    Some(err.code()),
                );
                let more = attempt + 1 < max_attempts;
                if more && err.is_retryable_upstream() {
                    state.metrics().record_fallback();
                    tracing::warn!(
                        model = %request.model,
                        instance = %target.id,
                        error = %err,
                        "upstream attempt failed, trying fallback instance"
                    );
                    last_error = err;
                    continue;
                }
                return render_error(&path, &err);
            }
        }
    }

    render_error(&path, &last_error)
}

/// Candidate instance chain: an explicit URL instance bypasses the
/// mapping (and gets no fallback); otherwise the model router decides.
fn resolve_candidates(
    state: &GatewayState,
    instance: Option<&str>,
    model: &str,
) -> Result<Vec<Arc<ProviderInstance>>, GatewayError> {
    let registry = state.registry();
    if let Some(id) = instance {
        let target = registry
            .provider(id)
            .ok_or_else(|| GatewayError::ModelNotFound {
                model: id.to_string(),
            })?;
        if !target.enabled {
            return Err(GatewayError::ModelUnavailable {
                model: model.to_string(),
            });
        }
        return Ok(vec![target]);
    }
    let route = registry.model_router().resolve(model, &registry)?;
    Ok(route.instances)
}

/// One attempt against one instance. Returns the rendered response and
/// the byte count that went back to the caller.
async fn invoke_once(
    state: &GatewayState,
    target: &Arc<ProviderInstance>,
    request: &ChatCompletionRequest,
    created: i64,
) -> Result<(Response, u64), GatewayError> {
    translate::enforce_parameter_policy(request, target)?;

    let adapter = state
        .adapter(&target.id)
        .ok_or_else(|| GatewayError::internal(format!("no adapter for instance {}", target.id)))?;

    let registry = state.registry();
    let remote_model = registry
        .model_router()
        .remote_model_id(&request.model, &target.id)
        .unwrap_or_else(|| request.model.clone());

    let plan = TranslationPlan::for_backend(target.kind);
    let envelope = translate::translate_request(plan, request, target, &remote_model)?;

    // Per-instance in-flight cap; excess load sheds immediately.
    let limiter = registry.limiter(&target.id);
    let _permit = match &limiter {
        Some(limiter) => Some(limiter.try_acquire().map_err(|_| GatewayError::RateLimited {
            scope: format!("instance:{}", target.id),
        })?),
        None => None,
    };

    if request.stream {
        let stream = adapter.invoke_streaming(envelope).await?;
        let content_type = if plan.is_passthrough() {
            "text/event-stream"
        } else if target.kind == ProviderKind::Bedrock {
            "application/vnd.amazon.eventstream"
        } else {
            "application/octet-stream"
        };
        let response = Response::builder()
            .status(StatusCode::OK)
            .header("content-type", content_type)
            .body(Body::from_stream(stream))
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        return Ok((response, 0));
    }

    let upstream = adapter.invoke(envelope).await?;
    let completion_id = openai::completion_id();
    let rendered =
        translate::translate_response(plan, &upstream.body, &request.model, &completion_id, created)?;
    let bytes_out = rendered.len() as u64;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(rendered))
        .map_err(|err| GatewayError::internal(err.to_string()))?;
    Ok((response, bytes_out))
}

/// Anthropic-dialect protocol endpoint: the body already speaks the
/// backend's language, so this is credentialed forwarding to a fixed
/// endpoint rather than translation.
async fn handle_native_dialect(
    state: &GatewayState,
    parts: &Parts,
    body: Bytes,
    request_id: &str,
    identity: &Identity,
    instance: Option<&str>,
    expected_kind: ProviderKind,
) -> Response {
    let path = parts.uri.path().to_string();
    let bytes_in = body.len() as u64;

    let target = match required_instance(state, instance, expected_kind) {
        Ok(target) => target,
        Err(err) => {
            note_error(state.metrics(), &err);
            return render_error(&path, &err);
        }
    };

    let envelope = RequestEnvelope::post_json("/v1/messages", body);
    forward(state, parts, request_id, identity, &target, envelope, bytes_in).await
}

/// Bedrock-native protocol endpoint: the Converse body is forwarded, but
/// the model id travels in the path, so it is lifted out of the body.
async fn handle_bedrock_native(
    state: &GatewayState,
    parts: &Parts,
    body: Bytes,
    request_id: &str,
    identity: &Identity,
    instance: Option<&str>,
) -> Response {
    let path = parts.uri.path().to_string();
    let bytes_in = body.len() as u64;

    let target = match required_instance(state, instance, ProviderKind::Bedrock) {
        Ok(target) => target,
        Err(err) => {
            note_error(state.metrics(), &err);
            return render_error(&path, &err);
        }
    };

    let mut parsed: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            state.metrics().record_invalid_request();
            return render_error(
                &path,
                &GatewayError::invalid(format!("unparseable converse request: {err}")),
            );
        }
    };
    let model = parsed
        .get("modelId")
        .or_else(|| parsed.get("model"))
        .and_then(|value| value.as_str())
        .map(str::to_string);
    let Some(model) = model else {
        state.metrics().record_invalid_request();
        return render_error(
            &path,
            &GatewayError::invalid("converse request needs a modelId"),
        );
    };
    let Some(model_id) = bedrock::bedrock_model_id(&model) else {
        state.metrics().record_invalid_request();
        return render_error(
            &path,
            &GatewayError::invalid(format!("model {model:?} not supported on Bedrock")),
        );
    };
    if let Some(object) = parsed.as_object_mut() {
        object.remove("modelId");
        object.remove("model");
    }

    let body = match serde_json::to_vec(&parsed) {
        Ok(body) => Bytes::from(body),
        Err(err) => return render_error(&path, &GatewayError::internal(err.to_string())),
    };
    let envelope = RequestEnvelope::post_json(format!("/model/{model_id}/converse"), body);
    forward(state, parts, request_id, identity, &target, envelope, bytes_in).await
}

fn required_instance(
    state: &GatewayState,
    instance: Option<&str>,
    expected_kind: ProviderKind,
) -> Result<Arc<ProviderInstance>, GatewayError> {
    let id = instance.ok_or_else(|| {
        GatewayError::invalid("this protocol requires /{protocol}/{instance}/… addressing")
    })?;
    let target = state
        .registry()
        .provider(id)
        .ok_or_else(|| GatewayError::ModelNotFound {
            model: id.to_string(),
        })?;
    if !target.enabled {
        return Err(GatewayError::ModelUnavailable {
            model: id.to_string(),
        });
    }
    if target.kind != expected_kind {
        return Err(GatewayError::invalid(format!(
            "instance {id:?} speaks {}, not {}",
            target.kind, expected_kind
        )));
    }
    Ok(target)
}

#[allow(clippy::too_many_arguments)]
pub(super) async fn handle_transparent(
    state: &GatewayState,
    parts: &Parts,
    body: Body,
    request_id: &str,
    identity: &Identity,
    instance: &str,
    remainder: &str,
    query: &[(String, String)],
) -> Response {
    let path = parts.uri.path().to_string();

    let target = match state.registry().provider(instance) {
        Some(target) if target.enabled => target,
        Some(_) => {
            let err = GatewayError::ModelUnavailable {
                model: instance.to_string(),
            };
            note_error(state.metrics(), &err);
            return render_error(&path, &err);
        }
        None => {
            let err = GatewayError::ModelNotFound {
                model: instance.to_string(),
            };
            note_error(state.metrics(), &err);
            return render_error(&path, &err);
        }
    };

    let body = match read_body(body, TRANSPARENT_BODY_LIMIT).await {
        Ok(body) => body,
        Err(err) => {
            state.metrics().record_invalid_request();
            return render_error(&path, &err);
        }
    };
    let bytes_in = body.len() as u64;

    let mut envelope = RequestEnvelope {
        method: parts.method.as_str().to_string(),
        path: remainder.to_string(),
        query: query.to_vec(),
        headers: Default::default(),
        body,
    };
    if let Some(content_type) = super::extract_header(&parts.headers, "content-type") {
        envelope.headers.insert("content-type".to_string(), content_type);
    }
    if let Some(accept) = super::extract_header(&parts.headers, "accept") {
        envelope.headers.insert("accept".to_string(), accept);
    }

    forward(state, parts, request_id, identity, &target, envelope, bytes_in).await
}

/// Credentialed dispatch with the upstream body returned verbatim; used
/// by the transparent path and the native-dialect protocol endpoints.
async fn forward(
    state: &GatewayState,
    parts: &Parts,
    request_id: &str,
    identity: &Identity,
    target: &Arc<ProviderInstance>,
    envelope: RequestEnvelope,
    bytes_in: u64,
) -> Response {
    let path = parts.uri.path().to_string();
    let start = Instant::now();

    let adapter = match state.adapter(&target.id) {
        Some(adapter) => adapter,
        None => {
            let err = GatewayError::internal(format!("no adapter for instance {}", target.id));
            return render_error(&path, &err);
        }
    };

    let limiter = state.registry().limiter(&target.id);
    let permit = match &limiter {
        Some(limiter) => match limiter.try_acquire() {
            Ok(permit) => Some(permit),
            Err(_) => {
                let err = GatewayError::RateLimited {
                    scope: format!("instance:{}", target.id),
                };
                note_error(state.metrics(), &err);
                audit(
                    state, request_id, identity, parts, target, 429, start, bytes_in, 0,
                    Some(err.code()),
                );
                return render_error(&path, &err);
            }
        },
        None => None,
    };

    let outcome = adapter.invoke(envelope).await;
    drop(permit);

    match outcome {
        Ok(upstream) => {
            let bytes_out = upstream.body.len() as u64;
            audit(
                state,
                request_id,
                identity,
                parts,
                target,
                upstream.status,
                start,
                bytes_in,
                bytes_out,
                None,
            );
            let content_type = upstream
                .headers
                .get("content-type")
                .cloned()
                .unwrap_or_else(|| "application/json".to_string());
            Response::builder()
                .status(StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK))
                .header("content-type", content_type)
                .body(Body::from(upstream.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(err) => {
            note_error(state.metrics(), &err);
            audit(
                state,
                request_id,
                identity,
                parts,
                target,
                err.http_status(),
                start,
                bytes_in,
                0,
                Some(err.code()),
            );
            // Transparent mode surfaces the upstream body as-is when one
            // exists.
            if let GatewayError::Upstream {
                upstream_status: Some(status),
                message,
                ..
            } = &err
            {
                if !message.is_empty() {
                    return Response::builder()
                        .status(StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY))
                        .body(Body::from(message.clone()))
                        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response());
                }
            }
            render_error(&path, &err)
        }
    }
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, GatewayError> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|err| GatewayError::invalid(format!("request body rejected: {err}")))
}

#[allow(clippy::too_many_arguments)]
fn audit(
    state: &GatewayState,
    request_id: &str,
    identity: &Identity,
    parts: &Parts,
    target: &Arc<ProviderInstance>,
    status: u16,
    start: Instant,
    bytes_in: u64,
    bytes_out: u64,
    error_code: Option<&'static str>,
) {
    let mut record = AuditRecord::new(request_id, parts.method.as_str(), parts.uri.path());
    record.identity = Some(identity.user_name.clone());
    record.backend_kind = Some(target.kind.as_str().to_string());
    record.instance = Some(target.id.clone());
    record.status = status;
    record.latency_ms = start.elapsed().as_millis() as u64;
    record.bytes_in = bytes_in;
    record.bytes_out = bytes_out;
    record.error_code = error_code;
    state.audit().record(record);
}

fn note_error(metrics: &Arc<Metrics>, err: &GatewayError) {
    match err {
        GatewayError::InvalidRequest { .. } => metrics.record_invalid_request(),
        GatewayError::RateLimited { .. } => metrics.record_rate_limited(),
        GatewayError::AccessDenied => metrics.record_access_denied(),
        GatewayError::TranslationFailed { .. } => metrics.record_translation_failure(),
        GatewayError::CredentialUnavailable { .. } => metrics.record_credential_failure(),
        GatewayError::Upstream { .. } | GatewayError::Timeout { .. } => {
            metrics.record_upstream_error()
        }
        _ => {}
    }
}
