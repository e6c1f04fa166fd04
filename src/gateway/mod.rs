//! Gateway core: routing, translation, credentials, dispatch.

pub mod audit;
pub mod auth;
pub mod classify;
pub mod config;
pub mod credentials;
pub mod http;
pub mod model_router;
pub mod observability;
pub mod providers;
pub mod registry;
pub mod singleflight;
pub mod storage;
pub mod translate;
pub(crate) mod xml;

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use audit::{AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use auth::{ApiKeyStore, Identity, IdentityGate, MemoryApiKeyStore, MemorySessionStore, SessionStore};
pub use classify::RouteDecision;
pub use config::{
    GatewayConfig, InstanceMode, ProviderInstance, ProviderKind, RoutingConfig, StorageInstance,
    StorageKind, StorageOp,
};
pub use credentials::{CredentialEngine, Credentials};
pub use http::{GatewayState, router};
pub use model_router::ModelRouter;
pub use observability::{Metrics, MetricsSnapshot};
pub use registry::{Registry, RegistryHandle};

/// Error taxonomy for everything that can go wrong between ingress and
/// egress. Variants map to HTTP statuses at the edge; `code()` yields the
/// stable label recorded in audit entries (never caller-supplied bytes).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("authentication required: {message}")]
    AuthenticationRequired { message: String },
    #[error("access denied")]
    AccessDenied,
    #[error("model not found: {model}")]
    ModelNotFound { model: String },
    #[error("model unavailable: {model}")]
    ModelUnavailable { model: String },
    #[error("rate limited: {scope}")]
    RateLimited { scope: String },
    #[error("translation failed: {message}")]
    TranslationFailed { message: String },
    #[error("no usable credentials for instance {instance}")]
    CredentialUnavailable { instance: String },
    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        upstream_status: Option<u16>,
        message: String,
    },
    #[error("timeout during {operation}")]
    Timeout { operation: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn translation(message: impl Into<String>) -> Self {
        Self::TranslationFailed {
            message: message.into(),
        }
    }

    /// HTTP status rendered at egress. Upstream errors keep a 4xx status
    /// from the backend; 5xx and transport failures collapse to 502/503.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::AuthenticationRequired { .. } => 401,
            Self::AccessDenied => 403,
            Self::ModelNotFound { .. } => 404,
            Self::RateLimited { .. } => 429,
            Self::TranslationFailed { .. } | Self::Internal { .. } => 500,
            Self::CredentialUnavailable { .. } | Self::ModelUnavailable { .. } => 503,
            Self::Upstream {
                upstream_status, ..
            } => match upstream_status {
                Some(status) if (400..500).contains(status) => *status,
                Some(_) => 502,
                None => 503,
            },
            Self::Timeout { .. } => 504,
        }
    }

    /// Stable audit/error-envelope code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::AuthenticationRequired { .. } => "authentication_required",
            Self::AccessDenied => "access_denied",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::TranslationFailed { .. } => "translation_failed",
            Self::CredentialUnavailable { .. } => "credential_unavailable",
            Self::Upstream { .. } => "upstream_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether the router may retry this failure on a fallback instance.
    /// Only upstream unavailability and rate limiting qualify; a timeout
    /// is its own taxonomy row and surfaces as 504 without retry.
    pub fn is_retryable_upstream(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Upstream {
                upstream_status, ..
            } => !matches!(upstream_status, Some(status) if (400..500).contains(status) && *status != 429),
            _ => false,
        }
    }
}

/// Internal representation of a request on its way to a backend. Signing is
/// applied to the envelope just before dispatch.
#[derive(Debug, Clone, Default)]
pub struct RequestEnvelope {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl RequestEnvelope {
    pub fn post_json(path: impl Into<String>, body: Bytes) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());
        Self {
            method: "POST".to_string(),
            path: path.into(),
            query: Vec::new(),
            headers,
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

/// Catalogue entry served by `/v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_mapping() {
        let err = GatewayError::Upstream {
            provider: "openai".to_string(),
            upstream_status: Some(503),
            message: "overloaded".to_string(),
        };
        assert_eq!(err.http_status(), 502);
        assert!(err.is_retryable_upstream());

        let err = GatewayError::Upstream {
            provider: "openai".to_string(),
            upstream_status: Some(404),
            message: "no such model".to_string(),
        };
        assert_eq!(err.http_status(), 404);
        assert!(!err.is_retryable_upstream());

        let err = GatewayError::Upstream {
            provider: "openai".to_string(),
            upstream_status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.http_status(), 503);
        assert!(err.is_retryable_upstream());

        let err = GatewayError::Timeout {
            operation: "upstream invoke (openai)".to_string(),
        };
        assert_eq!(err.http_status(), 504);
        assert!(!err.is_retryable_upstream());
    }

    #[test]
    fn codes_are_fixed_labels() {
        assert_eq!(
            GatewayError::invalid("no <script> here").code(),
            "invalid_request"
        );
        assert_eq!(GatewayError::AccessDenied.http_status(), 403);
    }
}
