//! Storage operation handler: ACL, dispatch, response shaping.

use std::time::Instant;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::gateway::audit::AuditRecord;
use crate::gateway::auth::Identity;
use crate::gateway::config::{StorageKind, StorageOp};
use crate::gateway::storage::{check_access, ListRequest, PresignOperation};
use crate::gateway::GatewayError;

use super::{query_value, render_error, GatewayState};

const PUT_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[allow(clippy::too_many_arguments)]
pub(super) async fn handle(
    state: &GatewayState,
    parts: &Parts,
    body: Body,
    request_id: &str,
    identity: &Identity,
    kind: StorageKind,
    route: &str,
    op: StorageOp,
    bucket: &str,
    key: &str,
    query: &[(String, String)],
) -> Response {
    let path = parts.uri.path().to_string();
    let start = Instant::now();
    state.metrics().record_storage_operation();

    let registry = state.registry();
    let Some(instance) = registry.storage(kind, route) else {
        let response = (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": {
                    "message": format!("Storage route {route:?} not found for {kind}"),
                    "code": 404,
                }
            })),
        )
            .into_response();
        return finish(state, parts, request_id, identity, kind, route, 404, start, 0, 0,
            Some("invalid_request"), response);
    };

    // Access policy runs before any backend work; a deny never reaches
    // the upstream.
    if let Err(err) = check_access(&instance.access, bucket, key, op) {
        state.metrics().record_access_denied();
        return finish(state, parts, request_id, identity, kind, route, 403, start, 0, 0,
            Some(err.code()), render_error(&path, &err));
    }

    let Some(backend) = state.storage_backend(kind, route) else {
        let err = GatewayError::internal(format!("no backend for storage route {route:?}"));
        return finish(state, parts, request_id, identity, kind, route, 500, start, 0, 0,
            Some(err.code()), render_error(&path, &err));
    };

    let outcome: Result<(Response, u64, u64), GatewayError> = match op {
        StorageOp::Get => backend.get_object(bucket, key).await.map(|object| {
            let bytes_out = object.body.len() as u64;
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header("content-type", object.content_type);
            if let Some(etag) = object.etag {
                builder = builder.header("etag", etag);
            }
            if let Some(last_modified) = object.last_modified {
                builder = builder.header("last-modified", last_modified);
            }
            let response = builder
                .body(Body::from(object.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
            (response, 0, bytes_out)
        }),
        StorageOp::Put => {
            let content_type = super::extract_header(&parts.headers, "content-type")
                .unwrap_or_else(|| "application/octet-stream".to_string());
            match axum::body::to_bytes(body, PUT_BODY_LIMIT).await {
                Ok(payload) => {
                    let bytes_in = payload.len() as u64;
                    backend
                        .put_object(bucket, key, &content_type, payload)
                        .await
                        .map(|result| (Json(result).into_response(), bytes_in, 0))
                }
                Err(err) => Err(GatewayError::invalid(format!("request body rejected: {err}"))),
            }
        }
        StorageOp::Delete => backend.delete_object(bucket, key).await.map(|()| {
            (
                Json(serde_json::json!({"success": true})).into_response(),
                0,
                0,
            )
        }),
        StorageOp::List => {
            let request = ListRequest {
                bucket: bucket.to_string(),
                prefix: query_value(query, "prefix").map(str::to_string),
                delimiter: query_value(query, "delimiter").map(str::to_string),
                max_keys: query_value(query, "max_keys").and_then(|value| value.parse().ok()),
                continuation_token: query_value(query, "continuation_token").map(str::to_string),
            };
            backend
                .list_objects(&request)
                .await
                .map(|result| (Json(result).into_response(), 0, 0))
        }
        StorageOp::Head => backend
            .head_object(bucket, key)
            .await
            .map(|result| (Json(result).into_response(), 0, 0)),
        StorageOp::Presign => presign(state, &instance.presign, &*backend, bucket, key, query).await,
    };

    match outcome {
        Ok((response, bytes_in, bytes_out)) => {
            let status = response.status().as_u16();
            finish(state, parts, request_id, identity, kind, route, status, start,
                bytes_in, bytes_out, None, response)
        }
        Err(err) => {
            if matches!(err, GatewayError::AccessDenied) {
                state.metrics().record_access_denied();
            }
            let response = render_error(&path, &err);
            let status = err.http_status();
            finish(state, parts, request_id, identity, kind, route, status, start, 0, 0,
                Some(err.code()), response)
        }
    }
}

async fn presign(
    state: &GatewayState,
    limits: &crate::gateway::config::PresignConfig,
    backend: &dyn crate::gateway::storage::StorageBackend,
    bucket: &str,
    key: &str,
    query: &[(String, String)],
) -> Result<(Response, u64, u64), GatewayError> {
    let requested = match query_value(query, "ttl") {
        Some(raw) => {
            let parsed: i64 = raw
                .parse()
                .map_err(|_| GatewayError::invalid(format!("invalid ttl value {raw:?}")))?;
            if parsed <= 0 {
                return Err(GatewayError::invalid("ttl must be positive"));
            }
            Some(parsed as u64)
        }
        None => None,
    };
    // Oversized requests clamp silently to the instance maximum.
    let ttl = limits.clamp_ttl(requested);

    let operation = match query_value(query, "operation") {
        Some(raw) => PresignOperation::from_query(raw)
            .ok_or_else(|| GatewayError::invalid(format!("unsupported presign operation {raw:?}")))?,
        None => PresignOperation::Get,
    };

    let presigned = backend.presign(bucket, key, operation, ttl).await?;
    state.metrics().record_presign_minted();
    Ok((Json(presigned).into_response(), 0, 0))
}

#[allow(clippy::too_many_arguments)]
fn finish(
    state: &GatewayState,
    parts: &Parts,
    request_id: &str,
    identity: &Identity,
    kind: StorageKind,
    route: &str,
    status: u16,
    start: Instant,
    bytes_in: u64,
    bytes_out: u64,
    error_code: Option<&'static str>,
    response: Response,
) -> Response {
    let mut record = AuditRecord::new(request_id, parts.method.as_str(), parts.uri.path());
    record.identity = Some(identity.user_name.clone());
    record.backend_kind = Some(kind.as_str().to_string());
    record.instance = Some(route.to_string());
    record.status = status;
    record.latency_ms = start.elapsed().as_millis() as u64;
    record.bytes_in = bytes_in;
    record.bytes_out = bytes_out;
    record.error_code = error_code;
    state.audit().record(record);
    response
}
