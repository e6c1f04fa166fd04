//! Generic HTTPS passthrough backend.
//!
//! The "bucket" is a host and the "key" a path; GETs flow through the
//! document fetcher so RAG-style reads share its TTL cache. Listing and
//! presigning have no generic-HTTPS counterpart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::gateway::config::{StorageInstance, StorageKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec};
use crate::gateway::GatewayError;

use super::fetcher::DocumentFetcher;
use super::{
    HeadResult, ListRequest, ListResult, ObjectData, PresignOperation, PresignedUrl, PutResult,
    StorageBackend,
};

pub struct HttpsBackend {
    instance: Arc<StorageInstance>,
    engine: Arc<CredentialEngine>,
    client: reqwest::Client,
    fetcher: Arc<DocumentFetcher>,
    spec: CredentialSpec,
}

impl HttpsBackend {
    pub fn new(instance: Arc<StorageInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_storage(&instance);
        let fetcher = DocumentFetcher::new(Duration::from_secs(300));
        Self {
            instance,
            engine,
            client: reqwest::Client::new(),
            fetcher,
            spec,
        }
    }

    fn url(&self, host: &str, path: &str) -> String {
        match self.instance.endpoint.as_deref() {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), path),
            None => format!("https://{host}/{path}"),
        }
    }

    /// Bearer auth is optional here; an instance without credentials
    /// proxies anonymously.
    async fn bearer(&self) -> Option<String> {
        let credentials = self.engine.credentials_for(&self.spec).await.ok()?;
        credentials.bearer_token().map(str::to_string)
    }

    pub fn fetcher(&self) -> Arc<DocumentFetcher> {
        self.fetcher.clone()
    }

    fn unsupported(&self, what: &str) -> GatewayError {
        GatewayError::invalid(format!("{what} is not supported for https routes"))
    }
}

#[async_trait]
impl StorageBackend for HttpsBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Https
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, GatewayError> {
        let url = self.url(bucket, key);
        let document = self.fetcher.fetch(&url).await?;
        Ok(ObjectData {
            body: document.bytes,
            content_type: document.content_type,
            etag: Some(document.sha256),
            last_modified: None,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<PutResult, GatewayError> {
        let url = self.url(bucket, key);
        let mut request = self
            .client
            .put(&url)
            .timeout(self.instance.timeouts.invoke())
            .header("content-type", content_type)
            .body(body);
        if let Some(token) = self.bearer().await {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| GatewayError::Upstream {
            provider: "https".to_string(),
            upstream_status: None,
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.bytes().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                provider: "https".to_string(),
                upstream_status: Some(status),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(PutResult {
            success: true,
            etag: None,
            version_id: None,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError> {
        let url = self.url(bucket, key);
        let mut request = self
            .client
            .delete(&url)
            .timeout(self.instance.timeouts.invoke());
        if let Some(token) = self.bearer().await {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| GatewayError::Upstream {
            provider: "https".to_string(),
            upstream_status: None,
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(GatewayError::Upstream {
                provider: "https".to_string(),
                upstream_status: Some(status),
                message: String::new(),
            });
        }
        Ok(())
    }

    async fn list_objects(&self, _request: &ListRequest) -> Result<ListResult, GatewayError> {
        Err(self.unsupported("list"))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadResult, GatewayError> {
        let url = self.url(bucket, key);
        let mut request = self
            .client
            .head(&url)
            .timeout(self.instance.timeouts.invoke());
        if let Some(token) = self.bearer().await {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| GatewayError::Upstream {
            provider: "https".to_string(),
            upstream_status: None,
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(GatewayError::Upstream {
                provider: "https".to_string(),
                upstream_status: Some(status),
                message: String::new(),
            });
        }
        Ok(HeadResult {
            content_type: response
                .headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string(),
            content_length: response
                .headers()
                .get("content-length")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            etag: None,
            last_modified: None,
        })
    }

    async fn presign(
        &self,
        _bucket: &str,
        _key: &str,
        _operation: PresignOperation,
        _ttl: u64,
    ) -> Result<PresignedUrl, GatewayError> {
        Err(self.unsupported("presign"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::config::GatewayConfig;

    #[tokio::test]
    async fn list_and_presign_are_rejected() {
        let config = GatewayConfig::from_yaml_str(
            r#"
storage_instances:
  - name: proxy
    kind: https
    route: prod
"#,
        )
        .unwrap();
        let instance = Arc::new(
            config
                .storage_route(StorageKind::Https, "prod")
                .unwrap()
                .clone(),
        );
        let backend = HttpsBackend::new(instance, Arc::new(CredentialEngine::default()));

        let err = backend
            .list_objects(&ListRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
        let err = backend
            .presign("example.com", "x", PresignOperation::Get, 60)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(backend.url("example.com", "api/data"), "https://example.com/api/data");
    }
}
