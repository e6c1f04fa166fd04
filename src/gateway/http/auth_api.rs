//! Session endpoints: login (API key + TOTP → session token), refresh,
//! logout, and session listing.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::gateway::auth::AuthHeaders;

use super::{auth_headers, extract_header, GatewayState};

#[derive(Debug, Default, Deserialize)]
pub(super) struct LoginRequest {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    totp_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    session_token: String,
    session_id: String,
    expires_at: String,
    user: String,
}

#[derive(Debug, Serialize)]
struct AuthError {
    error: String,
}

fn unauthorized(message: impl Into<String>) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthError {
            error: message.into(),
        }),
    )
        .into_response()
}

pub(super) async fn login(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    // Credentials may arrive in the body or as headers; an empty or
    // non-JSON body just means headers-only.
    let payload: LoginRequest = serde_json::from_slice(&body).unwrap_or_default();

    let auth = AuthHeaders {
        session_token: None,
        bearer: None,
        api_key: payload
            .api_key
            .or_else(|| extract_header(&headers, "x-api-key")),
        totp_code: payload
            .totp_code
            .or_else(|| extract_header(&headers, "x-totp-code")),
    };

    let identity = match state.gate().authenticate(&auth).await {
        Ok(identity) => identity,
        Err(err) => {
            state.metrics().record_auth_failure();
            return unauthorized(err.to_string());
        }
    };

    let session = state
        .gate()
        .sessions()
        .create(&identity.api_key_id, state.session_ttl())
        .await;

    Json(LoginResponse {
        session_token: session.token.clone(),
        session_id: session.id,
        expires_at: session.expires_at,
        user: identity.user_name,
    })
    .into_response()
}

pub(super) async fn refresh(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else {
        return unauthorized("missing session token");
    };
    match state
        .gate()
        .sessions()
        .refresh(&token, state.session_ttl())
        .await
    {
        Some(session) => Json(serde_json::json!({
            "session_id": session.id,
            "expires_at": session.expires_at,
        }))
        .into_response(),
        None => unauthorized("invalid or expired session token"),
    }
}

pub(super) async fn logout(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else {
        return unauthorized("missing session token");
    };
    let revoked = state.gate().sessions().revoke(&token).await;
    Json(serde_json::json!({"success": revoked})).into_response()
}

pub(super) async fn sessions(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let identity = match state.gate().authenticate(&auth_headers(&headers)).await {
        Ok(identity) => identity,
        Err(err) => {
            state.metrics().record_auth_failure();
            return unauthorized(err.to_string());
        }
    };

    let sessions = state
        .gate()
        .sessions()
        .sessions_for(&identity.api_key_id)
        .await;
    Json(serde_json::json!({"sessions": sessions})).into_response()
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    extract_header(headers, "x-session-token").or_else(|| {
        extract_header(headers, "authorization")
            .and_then(|value| value.strip_prefix("Bearer ").map(|token| token.trim().to_string()))
    })
}
