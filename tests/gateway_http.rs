//! Router-level tests: protocol translation, transparent forwarding,
//! storage operations, fallback, and the identity gate, all against mock
//! backends.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use skybridge::gateway::providers::{ByteStream, ProviderAdapter};
use skybridge::gateway::storage::{
    HeadResult, ListRequest, ListResult, ObjectData, PresignOperation, PresignedUrl, PutResult,
    StorageBackend,
};
use skybridge::gateway::{
    router, Credentials, GatewayConfig, GatewayError, GatewayState, IdentityGate,
    MemoryApiKeyStore, MemoryAuditSink, MemorySessionStore, ModelInfo, RequestEnvelope,
    ResponseEnvelope,
};
use skybridge::gateway::auth::ApiKeyRecord;
use skybridge::gateway::config::{ProviderKind, StorageKind};
use skybridge::gateway::credentials::CredentialEngine;

const CONFIG: &str = r#"
providers:
  - id: bedrock_us1
    kind: bedrock
    region: us-east-1
  - id: openai_primary
    kind: openai
  - id: azure_backup
    kind: azure
    endpoint: https://example.openai.azure.com
    deployment: gpt-4
storage_instances:
  - name: prod-s3
    kind: s3
    route: prod
    presign:
      default_ttl_secs: 600
      max_ttl_secs: 3600
    access:
      denied_prefixes: ["/secret/"]
model_mappings:
  gpt-4:
    default_instance: openai_primary
    fallback_instances: [azure_backup]
routing:
  fallback:
    enabled: true
    max_attempts: 2
  features:
    auto_fallback: true
"#;

#[derive(Clone)]
enum MockBehavior {
    Respond { status: u16, body: &'static str },
    FailUpstream { status: u16 },
}

struct MockAdapter {
    kind: ProviderKind,
    id: String,
    behavior: MockBehavior,
    calls: Arc<Mutex<Vec<RequestEnvelope>>>,
}

impl MockAdapter {
    fn new(kind: ProviderKind, id: &str, behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            kind,
            id: id.to_string(),
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn calls(&self) -> Vec<RequestEnvelope> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn instance_id(&self) -> &str {
        &self.id
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn invoke(&self, envelope: RequestEnvelope) -> Result<ResponseEnvelope, GatewayError> {
        self.calls.lock().unwrap().push(envelope);
        match &self.behavior {
            MockBehavior::Respond { status, body } => Ok(ResponseEnvelope {
                status: *status,
                headers: [(
                    "content-type".to_string(),
                    "application/json".to_string(),
                )]
                .into_iter()
                .collect(),
                body: Bytes::from_static(body.as_bytes()),
            }),
            MockBehavior::FailUpstream { status } => Err(GatewayError::Upstream {
                provider: self.kind.as_str().to_string(),
                upstream_status: Some(*status),
                message: "upstream says no".to_string(),
            }),
        }
    }

    async fn invoke_streaming(
        &self,
        _envelope: RequestEnvelope,
    ) -> Result<ByteStream, GatewayError> {
        Err(GatewayError::internal("not used in these tests"))
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "mock-model".to_string(),
            name: "Mock".to_string(),
            provider: self.kind.as_str().to_string(),
            context_window: None,
            available: true,
        }]
    }
}

#[derive(Default)]
struct MockStorage {
    calls: Mutex<u32>,
}

#[async_trait]
impl StorageBackend for MockStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    async fn get_object(&self, _bucket: &str, _key: &str) -> Result<ObjectData, GatewayError> {
        *self.calls.lock().unwrap() += 1;
        Ok(ObjectData {
            body: Bytes::from_static(b"object-bytes"),
            content_type: "application/pdf".to_string(),
            etag: Some("etag-1".to_string()),
            last_modified: None,
        })
    }

    async fn put_object(
        &self,
        _bucket: &str,
        _key: &str,
        _content_type: &str,
        _body: Bytes,
    ) -> Result<PutResult, GatewayError> {
        *self.calls.lock().unwrap() += 1;
        Ok(PutResult {
            success: true,
            etag: Some("etag-2".to_string()),
            version_id: None,
        })
    }

    async fn delete_object(&self, _bucket: &str, _key: &str) -> Result<(), GatewayError> {
        *self.calls.lock().unwrap() += 1;
        Ok(())
    }

    async fn list_objects(&self, _request: &ListRequest) -> Result<ListResult, GatewayError> {
        *self.calls.lock().unwrap() += 1;
        Ok(ListResult::default())
    }

    async fn head_object(&self, _bucket: &str, _key: &str) -> Result<HeadResult, GatewayError> {
        *self.calls.lock().unwrap() += 1;
        Ok(HeadResult {
            content_type: "application/pdf".to_string(),
            content_length: 12,
            etag: None,
            last_modified: None,
        })
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        ttl: u64,
    ) -> Result<PresignedUrl, GatewayError> {
        *self.calls.lock().unwrap() += 1;
        Ok(PresignedUrl {
            url: format!("https://{bucket}.s3.amazonaws.com/{key}?X-Amz-Expires={ttl}"),
            expires_at: "2026-01-01T00:00:00Z".to_string(),
            ttl,
            operation: operation.as_str().to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

fn identity_gate() -> IdentityGate {
    let api_keys = Arc::new(MemoryApiKeyStore::new());
    api_keys.insert(
        "sk-test",
        ApiKeyRecord {
            id: "key-1".to_string(),
            user_name: "tester".to_string(),
            email: "tester@example.com".to_string(),
            two_fa_enabled: false,
        },
    );
    IdentityGate::new(api_keys, Arc::new(MemorySessionStore::new()))
}

fn base_state() -> (GatewayState, Arc<MemoryAuditSink>) {
    let config = GatewayConfig::from_yaml_str(CONFIG).unwrap();
    let audit = Arc::new(MemoryAuditSink::new());
    let state = GatewayState::new(config)
        .unwrap()
        .with_identity_gate(identity_gate())
        .with_audit_sink(audit.clone());
    (state, audit)
}

fn authed(request: Request<Body>) -> Request<Body> {
    let (mut parts, body) = request.into_parts();
    parts
        .headers
        .insert("x-api-key", "sk-test".parse().unwrap());
    Request::from_parts(parts, body)
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

const CONVERSE_REPLY: &str = r#"{"output":{"message":{"role":"assistant","content":[{"text":"hello"}]}},"stopReason":"end_turn","usage":{"inputTokens":5,"outputTokens":1,"totalTokens":6}}"#;

#[tokio::test]
async fn bedrock_protocol_path_translates_both_ways() {
    let (state, _) = base_state();
    let mock = MockAdapter::new(
        ProviderKind::Bedrock,
        "bedrock_us1",
        MockBehavior::Respond {
            status: 200,
            body: CONVERSE_REPLY,
        },
    );
    let app = router(state.with_adapter("bedrock_us1", mock.clone()));

    let payload = json!({
        "model": "claude-3-sonnet",
        "messages": [{"role": "user", "content": "hi"}],
        "max_tokens": 50,
    });
    let request = authed(
        Request::builder()
            .method("POST")
            .uri("/openai/bedrock_us1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;

    assert!(parsed["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(parsed["object"], "chat.completion");
    assert!(parsed["created"].as_i64().unwrap() > 0);
    assert_eq!(parsed["choices"][0]["message"]["content"], "hello");
    assert_eq!(parsed["choices"][0]["finish_reason"], "stop");
    assert_eq!(parsed["usage"]["prompt_tokens"], 5);
    assert_eq!(parsed["usage"]["completion_tokens"], 1);
    assert_eq!(parsed["usage"]["total_tokens"], 6);

    let calls = mock.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].path,
        "/model/anthropic.claude-3-sonnet-20240229-v1:0/converse"
    );
    let upstream: Value = serde_json::from_slice(&calls[0].body).unwrap();
    assert_eq!(upstream["messages"][0]["content"][0]["text"], "hi");
    assert_eq!(upstream["inferenceConfig"]["maxTokens"], 50);
}

#[tokio::test]
async fn model_mapping_routes_without_instance_in_url() {
    let (state, _) = base_state();
    let mock = MockAdapter::new(
        ProviderKind::Bedrock,
        "bedrock_us1",
        MockBehavior::Respond {
            status: 200,
            body: CONVERSE_REPLY,
        },
    );
    let app = router(state.with_adapter("bedrock_us1", mock.clone()));

    let payload = json!({
        "model": "claude-3-sonnet",
        "messages": [{"role": "user", "content": "hi"}],
    });
    let request = authed(
        Request::builder()
            .method("POST")
            .uri("/openai/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(mock.calls().len(), 1);
}

#[tokio::test]
async fn transparent_path_forwards_verbatim() {
    let (state, _) = base_state();
    let mock = MockAdapter::new(
        ProviderKind::Bedrock,
        "bedrock_us1",
        MockBehavior::Respond {
            status: 200,
            body: CONVERSE_REPLY,
        },
    );
    let app = router(state.with_adapter("bedrock_us1", mock.clone()));

    let native_body = r#"{"messages":[{"role":"user","content":[{"text":"native"}]}]}"#;
    let request = authed(
        Request::builder()
            .method("POST")
            .uri("/transparent/bedrock_us1/model/anthropic.claude-3-sonnet-20240229-v1:0/converse")
            .header("content-type", "application/json")
            .body(Body::from(native_body))
            .unwrap(),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    // Native Converse reply, untouched.
    assert_eq!(body.as_ref(), CONVERSE_REPLY.as_bytes());

    let calls = mock.calls();
    assert_eq!(
        calls[0].path,
        "/model/anthropic.claude-3-sonnet-20240229-v1:0/converse"
    );
    assert_eq!(calls[0].body.as_ref(), native_body.as_bytes());
}

#[tokio::test]
async fn fallback_retries_on_upstream_503_and_audits_both_attempts() {
    let (state, audit) = base_state();
    let primary = MockAdapter::new(
        ProviderKind::OpenAi,
        "openai_primary",
        MockBehavior::FailUpstream { status: 503 },
    );
    let backup = MockAdapter::new(
        ProviderKind::Azure,
        "azure_backup",
        MockBehavior::Respond {
            status: 200,
            body: r#"{"id":"chatcmpl-azure","object":"chat.completion","created":1,"model":"gpt-4","choices":[{"index":0,"message":{"role":"assistant","content":"from azure"},"finish_reason":"stop"}]}"#,
        },
    );
    let app = router(
        state
            .with_adapter("openai_primary", primary.clone())
            .with_adapter("azure_backup", backup.clone()),
    );

    let payload = json!({
        "model": "gpt-4",
        "messages": [{"role": "user", "content": "hi"}],
    });
    let request = authed(
        Request::builder()
            .method("POST")
            .uri("/openai/chat/completions")
            .header("content-type", "application/json")
            .header("x-request-id", "req-fallback-1")
            .body(Body::from(payload.to_string()))
            .unwrap(),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    assert_eq!(parsed["choices"][0]["message"]["content"], "from azure");

    assert_eq!(primary.calls().len(), 1);
    assert_eq!(backup.calls().len(), 1);

    let records = audit.records();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|record| record.request_id == "req-fallback-1"));
    assert_eq!(records[0].status, 502);
    assert_eq!(records[0].error_code, Some("upstream_unavailable"));
    assert_eq!(records[0].instance.as_deref(), Some("openai_primary"));
    assert_eq!(records[1].status, 200);
    assert_eq!(records[1].instance.as_deref(), Some("azure_backup"));
}

#[tokio::test]
async fn upstream_4xx_does_not_trigger_fallback() {
    let (state, _) = base_state();
    let primary = MockAdapter::new(
        ProviderKind::OpenAi,
        "openai_primary",
        MockBehavior::FailUpstream { status: 400 },
    );
    let backup = MockAdapter::new(
        ProviderKind::Azure,
        "azure_backup",
        MockBehavior::Respond {
            status: 200,
            body: "{}",
        },
    );
    let app = router(
        state
            .with_adapter("openai_primary", primary.clone())
            .with_adapter("azure_backup", backup.clone()),
    );

    let payload = json!({"model": "gpt-4", "messages": []});
    let request = authed(
        Request::builder()
            .method("POST")
            .uri("/openai/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(backup.calls().len(), 0);
}

#[tokio::test]
async fn unknown_model_is_404_and_unknown_endpoint_400() {
    let (state, _) = base_state();
    let app = router(state);

    let payload = json!({"model": "mystery-model-9000", "messages": []});
    let request = authed(
        Request::builder()
            .method("POST")
            .uri("/openai/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = authed(
        Request::builder()
            .method("POST")
            .uri("/openai/bedrock_us1/embeddings")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_protocol_body_is_rejected() {
    let (state, _) = base_state();
    let app = router(state);

    let huge = "x".repeat(1024 * 1024 + 1);
    let request = authed(
        Request::builder()
            .method("POST")
            .uri("/openai/bedrock_us1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(huge))
            .unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn requests_without_credentials_are_unauthorized() {
    let (state, _) = base_state();
    let app = router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/openai/bedrock_us1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_issues_a_session_usable_on_protocol_paths() {
    let (state, _) = base_state();
    let mock = MockAdapter::new(
        ProviderKind::Bedrock,
        "bedrock_us1",
        MockBehavior::Respond {
            status: 200,
            body: CONVERSE_REPLY,
        },
    );
    let app = router(state.with_adapter("bedrock_us1", mock));

    let login = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"api_key":"sk-test"}"#))
        .unwrap();
    let response = app.clone().oneshot(login).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    let token = parsed["session_token"].as_str().unwrap().to_string();
    assert_eq!(parsed["user"], "tester");

    let payload = json!({
        "model": "claude-3-sonnet",
        "messages": [{"role": "user", "content": "hi"}],
    });
    let request = Request::builder()
        .method("POST")
        .uri("/openai/bedrock_us1/chat/completions")
        .header("content-type", "application/json")
        .header("x-session-token", token.clone())
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let sessions = Request::builder()
        .method("GET")
        .uri("/auth/sessions")
        .header("x-session-token", token.clone())
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(sessions).await.unwrap();
    let parsed = body_json(response).await;
    assert_eq!(parsed["sessions"].as_array().unwrap().len(), 1);

    let logout = Request::builder()
        .method("POST")
        .uri("/auth/logout")
        .header("x-session-token", token.clone())
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(logout).await.unwrap();
    let parsed = body_json(response).await;
    assert_eq!(parsed["success"], true);

    let request = Request::builder()
        .method("POST")
        .uri("/openai/bedrock_us1/chat/completions")
        .header("content-type", "application/json")
        .header("x-session-token", token)
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn storage_acl_denies_before_any_backend_call() {
    let (state, audit) = base_state();
    let storage = Arc::new(MockStorage::default());
    let app = router(state.with_storage_backend(StorageKind::S3, "prod", storage.clone()));

    let request = authed(
        Request::builder()
            .method("GET")
            .uri("/-s3/prod/get/rag-docs/secret/creds.json")
            .body(Body::empty())
            .unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let parsed = body_json(response).await;
    assert_eq!(parsed["error"]["message"], "Access denied");
    assert_eq!(parsed["error"]["code"], 403);

    assert_eq!(*storage.calls.lock().unwrap(), 0);
    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 403);
    assert_eq!(records[0].error_code, Some("access_denied"));
}

#[tokio::test]
async fn storage_get_and_list_round_trip() {
    let (state, _) = base_state();
    let storage = Arc::new(MockStorage::default());
    let app = router(state.with_storage_backend(StorageKind::S3, "prod", storage.clone()));

    let request = authed(
        Request::builder()
            .method("GET")
            .uri("/-s3/prod/get/rag-docs/policies/p.pdf")
            .body(Body::empty())
            .unwrap(),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/pdf"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), b"object-bytes");

    let request = authed(
        Request::builder()
            .method("GET")
            .uri("/-s3/prod/list/rag-docs?prefix=policies/")
            .body(Body::empty())
            .unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*storage.calls.lock().unwrap(), 2);
}

#[tokio::test]
async fn storage_get_without_key_is_invalid() {
    let (state, _) = base_state();
    let app = router(state);

    let request = authed(
        Request::builder()
            .method("GET")
            .uri("/-s3/prod/get/rag-docs")
            .body(Body::empty())
            .unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn presign_clamps_ttl_and_rejects_nonpositive() {
    let (state, _) = base_state();
    let storage = Arc::new(MockStorage::default());
    let app = router(state.with_storage_backend(StorageKind::S3, "prod", storage));

    // 7200 exceeds the instance max of 3600: clamp silently.
    let request = authed(
        Request::builder()
            .method("GET")
            .uri("/-s3/prod/presign/rag-docs/policies/p.pdf?ttl=7200")
            .body(Body::empty())
            .unwrap(),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    assert_eq!(parsed["ttl"], 3600);
    assert_eq!(parsed["operation"], "GetObject");
    assert_eq!(parsed["bucket"], "rag-docs");
    assert_eq!(parsed["key"], "policies/p.pdf");
    assert!(parsed["url"].as_str().unwrap().contains("X-Amz-Expires=3600"));

    // Default TTL applies when the caller sends none.
    let request = authed(
        Request::builder()
            .method("GET")
            .uri("/-s3/prod/presign/rag-docs/policies/p.pdf")
            .body(Body::empty())
            .unwrap(),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    let parsed = body_json(response).await;
    assert_eq!(parsed["ttl"], 600);

    for bad in ["0", "-5", "abc"] {
        let request = authed(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/-s3/prod/presign/rag-docs/policies/p.pdf?ttl={bad}"
                ))
                .body(Body::empty())
                .unwrap(),
        );
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "ttl={bad}");
    }
}

#[tokio::test]
async fn real_s3_presigner_end_to_end() {
    // Storage presign through the real S3 backend with seeded signing
    // keys; only the upstream dispatch is absent.
    let engine = Arc::new(CredentialEngine::default());
    engine.seed(
        "storage:prod-s3",
        Credentials::AwsSigningKeys {
            access_key: "AKIDEXAMPLE".to_string(),
            secret_key: "secret".to_string(),
            session_token: None,
            expiry: time::OffsetDateTime::now_utc() + time::Duration::hours(1),
        },
    );
    let config = GatewayConfig::from_yaml_str(CONFIG).unwrap();
    let state = GatewayState::with_engine(config, engine)
        .unwrap()
        .with_identity_gate(identity_gate());
    let app = router(state);

    let request = authed(
        Request::builder()
            .method("GET")
            .uri("/-s3/prod/presign/rag-docs/policies/p.pdf?ttl=3600")
            .body(Body::empty())
            .unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;

    let url = parsed["url"].as_str().unwrap();
    assert!(url.starts_with("https://rag-docs.s3.amazonaws.com/policies/p.pdf?"));
    assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
    assert!(url.contains("X-Amz-Expires=3600"));
    assert!(url.contains("X-Amz-Signature="));
    assert_eq!(parsed["ttl"], 3600);
}

#[tokio::test]
async fn health_and_metrics_need_no_auth() {
    let (state, _) = base_state();
    let app = router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    assert!(parsed.get("requests").is_some());
}

#[tokio::test]
async fn models_catalogue_lists_mapped_models_first() {
    let (state, _) = base_state();
    let app = router(state);

    let request = authed(
        Request::builder()
            .method("GET")
            .uri("/v1/models")
            .body(Body::empty())
            .unwrap(),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    assert_eq!(parsed["object"], "list");
    let data = parsed["data"].as_array().unwrap();
    assert!(data.iter().any(|model| model["id"] == "gpt-4"));

    let request = authed(
        Request::builder()
            .method("GET")
            .uri("/v1/models/claude-3-sonnet")
            .body(Body::empty())
            .unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    assert_eq!(parsed["provider"], "bedrock");
}
