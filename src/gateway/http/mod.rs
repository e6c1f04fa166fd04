//! HTTP surface: state, router, and shared handler plumbing.

mod auth_api;
mod models_api;
mod protocol;
mod storage_api;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::Result;

use super::audit::{AuditSink, TracingAuditSink};
use super::auth::{AuthHeaders, IdentityGate, MemoryApiKeyStore, MemorySessionStore};
use super::classify::{classify, RouteDecision};
use super::config::{GatewayConfig, StorageKind};
use super::credentials::CredentialEngine;
use super::observability::Metrics;
use super::providers::{build_adapter, ProviderAdapter};
use super::registry::{Registry, RegistryHandle};
use super::storage::{build_backend, StorageBackend};
use super::GatewayError;

static REQUEST_ID_SEQ: AtomicU64 = AtomicU64::new(0);

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 3600);

/// Adapters and storage backends for one registry generation. Swapped
/// together with the registry on reload.
#[derive(Clone)]
struct Backends {
    adapters: Arc<HashMap<String, Arc<dyn ProviderAdapter>>>,
    storages: Arc<HashMap<(StorageKind, String), Arc<dyn StorageBackend>>>,
}

pub struct GatewayStateInner {
    registry: RegistryHandle,
    backends: RwLock<Backends>,
    engine: Arc<CredentialEngine>,
    gate: IdentityGate,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
    session_ttl: Duration,
}

#[derive(Clone)]
pub struct GatewayState {
    inner: Arc<GatewayStateInner>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let engine = Arc::new(CredentialEngine::new());
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: GatewayConfig, engine: Arc<CredentialEngine>) -> Result<Self> {
        let registry = Registry::from_config(&config)?;
        let backends = Self::build_backends(&config, &engine);

        Ok(Self {
            inner: Arc::new(GatewayStateInner {
                registry: RegistryHandle::new(registry),
                backends: RwLock::new(backends),
                engine,
                gate: IdentityGate::new(
                    Arc::new(MemoryApiKeyStore::new()),
                    Arc::new(MemorySessionStore::new()),
                ),
                audit: Arc::new(TracingAuditSink),
                metrics: Arc::new(Metrics::default()),
                session_ttl: DEFAULT_SESSION_TTL,
            }),
        })
    }

    fn build_backends(config: &GatewayConfig, engine: &Arc<CredentialEngine>) -> Backends {
        let mut adapters = HashMap::new();
        for instance in &config.providers {
            adapters.insert(
                instance.id.clone(),
                build_adapter(Arc::new(instance.clone()), engine.clone()),
            );
        }
        let mut storages = HashMap::new();
        for instance in &config.storage_instances {
            storages.insert(
                (instance.kind, instance.route.clone()),
                build_backend(Arc::new(instance.clone()), engine.clone()),
            );
        }
        Backends {
            adapters: Arc::new(adapters),
            storages: Arc::new(storages),
        }
    }

    fn inner_mut(&mut self) -> &mut GatewayStateInner {
        Arc::get_mut(&mut self.inner).expect("state builders run before the router is built")
    }

    pub fn with_identity_gate(mut self, gate: IdentityGate) -> Self {
        self.inner_mut().gate = gate;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.inner_mut().audit = audit;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.inner_mut().session_ttl = ttl;
        self
    }

    /// Swap one adapter; the seam the integration tests use to mock
    /// upstreams.
    pub fn with_adapter(self, instance_id: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) -> Self {
        {
            let mut backends = self
                .inner
                .backends
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut adapters = (*backends.adapters).clone();
            adapters.insert(instance_id.into(), adapter);
            backends.adapters = Arc::new(adapters);
        }
        self
    }

    pub fn with_storage_backend(
        self,
        kind: StorageKind,
        route: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        {
            let mut backends = self
                .inner
                .backends
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut storages = (*backends.storages).clone();
            storages.insert((kind, route.into()), backend);
            backends.storages = Arc::new(storages);
        }
        self
    }

    /// Reload: build the next registry generation and swap it in. Requests
    /// already running keep their snapshot; credential cache entries for
    /// vanished instances are left to age out lazily (only their idle
    /// single-flight locks are released).
    pub fn reload(&self, config: GatewayConfig) -> Result<()> {
        let registry = Registry::from_config(&config)?;
        let backends = Self::build_backends(&config, &self.inner.engine);

        let live: std::collections::HashSet<String> = config
            .providers
            .iter()
            .map(|instance| instance.id.clone())
            .chain(
                config
                    .storage_instances
                    .iter()
                    .map(|instance| format!("storage:{}", instance.name)),
            )
            .collect();

        self.inner.registry.replace(registry);
        *self
            .inner
            .backends
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = backends;
        self.inner.engine.retain_instances(&live);
        Ok(())
    }

    pub(crate) fn registry(&self) -> Arc<Registry> {
        self.inner.registry.snapshot()
    }

    pub(crate) fn adapter(&self, instance_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.inner
            .backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .adapters
            .get(instance_id)
            .cloned()
    }

    pub(crate) fn storage_backend(
        &self,
        kind: StorageKind,
        route: &str,
    ) -> Option<Arc<dyn StorageBackend>> {
        self.inner
            .backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .storages
            .get(&(kind, route.to_string()))
            .cloned()
    }

    pub(crate) fn gate(&self) -> &IdentityGate {
        &self.inner.gate
    }

    pub(crate) fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.inner.audit
    }

    pub(crate) fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub(crate) fn engine(&self) -> &Arc<CredentialEngine> {
        &self.inner.engine
    }

    pub(crate) fn session_ttl(&self) -> Duration {
        self.inner.session_ttl
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/login", post(auth_api::login))
        .route("/auth/refresh", post(auth_api::refresh))
        .route("/auth/logout", post(auth_api::logout))
        .route("/auth/sessions", get(auth_api::sessions))
        .route("/v1/models", get(models_api::list_models))
        .route("/v1/models/:id", get(models_api::get_model))
        .fallback(dispatch)
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn metrics(State(state): State<GatewayState>) -> Response {
    let snapshot = state
        .metrics()
        .snapshot(state.engine().refresh_count());
    Json(snapshot).into_response()
}

/// Everything outside the fixed routes: storage, transparent, protocol.
async fn dispatch(State(state): State<GatewayState>, request: Request<Body>) -> Response {
    state.metrics().record_request();

    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let query = parse_query(parts.uri.query());
    let request_id = extract_header(&parts.headers, "x-request-id")
        .unwrap_or_else(generate_request_id);

    // Identity gate runs before routing; credentials are only ever
    // acquired for an authenticated caller.
    let identity = match state.gate().authenticate(&auth_headers(&parts.headers)).await {
        Ok(identity) => identity,
        Err(err) => {
            state.metrics().record_auth_failure();
            return render_error(&path, &err);
        }
    };

    let decision = match classify(&path) {
        Ok(decision) => decision,
        Err(err) => {
            state.metrics().record_invalid_request();
            return render_error(&path, &err);
        }
    };

    match decision {
        RouteDecision::Storage {
            kind,
            route,
            op,
            bucket,
            key,
        } => {
            storage_api::handle(
                &state, &parts, body, &request_id, &identity, kind, &route, op, &bucket, &key,
                &query,
            )
            .await
        }
        RouteDecision::TransparentAi {
            instance,
            remainder,
        } => {
            protocol::handle_transparent(
                &state, &parts, body, &request_id, &identity, &instance, &remainder, &query,
            )
            .await
        }
        RouteDecision::ProtocolAi {
            protocol,
            instance,
            endpoint,
        } => {
            protocol::handle_protocol(
                &state,
                &parts,
                body,
                &request_id,
                &identity,
                protocol,
                instance.as_deref(),
                endpoint,
            )
            .await
        }
    }
}

pub(crate) fn generate_request_id() -> String {
    let seq = REQUEST_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("req-{ts_ms}-{seq}")
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

pub(crate) fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn auth_headers(headers: &HeaderMap) -> AuthHeaders {
    let bearer = extract_header(headers, "authorization")
        .and_then(|value| value.strip_prefix("Bearer ").map(|token| token.trim().to_string()));
    AuthHeaders {
        session_token: extract_header(headers, "x-session-token"),
        bearer,
        api_key: extract_header(headers, "x-api-key"),
        totp_code: extract_header(headers, "x-totp-code"),
    }
}

pub(crate) fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    let Some(query) = query else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

pub(crate) fn query_value<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[derive(Debug, Serialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'static str,
}

#[derive(Debug, Serialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Serialize)]
struct StorageErrorDetail {
    message: String,
    code: u16,
}

#[derive(Debug, Serialize)]
struct StorageErrorBody {
    error: StorageErrorDetail,
}

/// Errors wear the dialect of the surface they came in on: storage paths
/// get the numeric-code envelope, AI paths the OpenAI envelope.
pub(crate) fn render_error(path: &str, err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if path.starts_with("/-") {
        let message = match err {
            GatewayError::AccessDenied => "Access denied".to_string(),
            other => other.to_string(),
        };
        return (
            status,
            Json(StorageErrorBody {
                error: StorageErrorDetail {
                    message,
                    code: status.as_u16(),
                },
            }),
        )
            .into_response();
    }

    (
        status,
        Json(OpenAiErrorBody {
            error: OpenAiErrorDetail {
                message: err.to_string(),
                kind: if status.is_server_error() {
                    "server_error"
                } else {
                    "invalid_request_error"
                },
                code: err.code(),
            },
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_handles_flags_and_pairs() {
        let query = parse_query(Some("ttl=3600&operation=GetObject&flag"));
        assert_eq!(query_value(&query, "ttl"), Some("3600"));
        assert_eq!(query_value(&query, "operation"), Some("GetObject"));
        assert_eq!(query_value(&query, "flag"), Some(""));
        assert_eq!(query_value(&query, "missing"), None);
    }

    #[test]
    fn bearer_extraction_strips_the_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer  sk-abc ".parse().unwrap());
        headers.insert("x-totp-code", "123456".parse().unwrap());
        let auth = auth_headers(&headers);
        assert_eq!(auth.bearer.as_deref(), Some("sk-abc"));
        assert_eq!(auth.totp_code.as_deref(), Some("123456"));
        assert!(auth.api_key.is_none());
    }

    #[test]
    fn request_ids_are_unique() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        assert!(a.starts_with("req-"));
    }
}
