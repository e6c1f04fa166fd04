//! Google Cloud Storage backend.
//!
//! Data-path operations go through the JSON API with a bearer token from
//! the credential engine. Presigning uses the XML interoperability
//! endpoint with HMAC keys, which lets the V4 signer cover GCS the same
//! way it covers S3.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::gateway::config::{StorageInstance, StorageKind};
use crate::gateway::credentials::{
    CredentialEngine, CredentialSpec, SigV4Signer, SigV4Timestamp,
};
use crate::gateway::GatewayError;

use super::{
    rfc3339, HeadResult, ListRequest, ListResult, ObjectData, ObjectEntry, PresignOperation,
    PresignedUrl, PutResult, StorageBackend,
};

const JSON_ENDPOINT: &str = "https://storage.googleapis.com";
const INTEROP_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListItem {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    updated: Option<String>,
}

pub struct GcsBackend {
    instance: Arc<StorageInstance>,
    engine: Arc<CredentialEngine>,
    client: reqwest::Client,
    spec: CredentialSpec,
}

impl GcsBackend {
    pub fn new(instance: Arc<StorageInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_storage(&instance);
        Self {
            instance,
            engine,
            client: reqwest::Client::new(),
            spec,
        }
    }

    fn endpoint(&self) -> &str {
        self.instance.endpoint.as_deref().unwrap_or(JSON_ENDPOINT)
    }

    async fn bearer(&self) -> Result<String, GatewayError> {
        let credentials = self.engine.credentials_for(&self.spec).await?;
        credentials
            .bearer_token()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::internal("gcs credentials missing bearer token"))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<(String, Bytes)>,
    ) -> Result<reqwest::Response, GatewayError> {
        let token = self.bearer().await?;
        let mut request = self
            .client
            .request(method, &url)
            .timeout(self.instance.timeouts.invoke())
            .bearer_auth(token);
        if let Some((content_type, payload)) = body {
            request = request.header("content-type", content_type).body(payload);
        }
        request.send().await.map_err(|err| {
            if err.is_timeout() {
                GatewayError::Timeout {
                    operation: "storage request (gcs)".to_string(),
                }
            } else {
                GatewayError::Upstream {
                    provider: "gcpblob".to_string(),
                    upstream_status: None,
                    message: err.to_string(),
                }
            }
        })
    }

    fn classify_status(&self, status: u16, body: &[u8]) -> GatewayError {
        match status {
            403 => GatewayError::AccessDenied,
            429 => GatewayError::RateLimited {
                scope: "upstream:gcpblob".to_string(),
            },
            _ => GatewayError::Upstream {
                provider: "gcpblob".to_string(),
                upstream_status: Some(status),
                message: String::from_utf8_lossy(body).into_owned(),
            },
        }
    }

    fn encoded_object(key: &str) -> String {
        let mut out = String::new();
        for byte in key.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(byte as char)
                }
                _ => out.push_str(&format!("%{byte:02X}")),
            }
        }
        out
    }

    /// HMAC interoperability keys for presigning, mounted separately from
    /// the bearer-token flow.
    fn interop_signer(&self) -> Result<SigV4Signer, GatewayError> {
        let access_key = std::env::var("GCS_HMAC_ACCESS_KEY_ID")
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                GatewayError::internal("gcs presign requires GCS_HMAC_ACCESS_KEY_ID")
            })?;
        let secret = std::env::var("GCS_HMAC_SECRET")
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| GatewayError::internal("gcs presign requires GCS_HMAC_SECRET"))?;
        SigV4Signer::new(
            access_key,
            secret,
            None,
            self.instance.region.as_deref().unwrap_or("auto"),
            "s3",
        )
    }
}

#[async_trait]
impl StorageBackend for GcsBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Gcpblob
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, GatewayError> {
        let url = format!(
            "{}/storage/v1/b/{bucket}/o/{}?alt=media",
            self.endpoint(),
            Self::encoded_object(key)
        );
        let response = self.send(reqwest::Method::GET, url, None).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        if status >= 400 {
            return Err(self.classify_status(status, &body));
        }
        Ok(ObjectData {
            body,
            content_type,
            etag: None,
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
        let url = format!(
            "{}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={}",
            self.endpoint(),
            Self::encoded_object(key)
        );
        let response = self
            .send(
                reqwest::Method::POST,
                url,
                Some((content_type.to_string(), body)),
            )
            .await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        if status >= 400 {
            return Err(self.classify_status(status, &body));
        }
        let metadata: ObjectMetadata = serde_json::from_slice(&body).unwrap_or(ObjectMetadata {
            content_type: None,
            size: None,
            etag: None,
            updated: None,
        });
        Ok(PutResult {
            success: true,
            etag: metadata.etag,
            version_id: None,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/storage/v1/b/{bucket}/o/{}",
            self.endpoint(),
            Self::encoded_object(key)
        );
        let response = self.send(reqwest::Method::DELETE, url, None).await?;
        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.bytes().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }
        Ok(())
    }

    async fn list_objects(&self, request: &ListRequest) -> Result<ListResult, GatewayError> {
        let mut url = format!("{}/storage/v1/b/{}/o?", self.endpoint(), request.bucket);
        if let Some(prefix) = &request.prefix {
            url.push_str(&format!("prefix={}&", Self::encoded_object(prefix)));
        }
        if let Some(delimiter) = &request.delimiter {
            url.push_str(&format!("delimiter={}&", Self::encoded_object(delimiter)));
        }
        if let Some(max_keys) = request.max_keys {
            url.push_str(&format!("maxResults={max_keys}&"));
        }
        if let Some(token) = &request.continuation_token {
            url.push_str(&format!("pageToken={}&", Self::encoded_object(token)));
        }
        let url = url.trim_end_matches(['&', '?']).to_string();

        let response = self.send(reqwest::Method::GET, url, None).await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        if status >= 400 {
            return Err(self.classify_status(status, &body));
        }

        let parsed: ListResponse = serde_json::from_slice(&body)
            .map_err(|err| GatewayError::internal(format!("gcs list body: {err}")))?;
        Ok(ListResult {
            objects: parsed
                .items
                .into_iter()
                .map(|item| ObjectEntry {
                    key: item.name,
                    size: item.size.and_then(|value| value.parse().ok()).unwrap_or(0),
                    last_modified: item.updated,
                    etag: item.etag,
                })
                .collect(),
            common_prefixes: parsed.prefixes,
            is_truncated: parsed.next_page_token.is_some(),
            next_continuation_token: parsed.next_page_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadResult, GatewayError> {
        let url = format!(
            "{}/storage/v1/b/{bucket}/o/{}",
            self.endpoint(),
            Self::encoded_object(key)
        );
        let response = self.send(reqwest::Method::GET, url, None).await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        if status >= 400 {
            return Err(self.classify_status(status, &body));
        }
        let metadata: ObjectMetadata = serde_json::from_slice(&body)
            .map_err(|err| GatewayError::internal(format!("gcs metadata body: {err}")))?;
        Ok(HeadResult {
            content_type: metadata
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            content_length: metadata
                .size
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            etag: metadata.etag,
            last_modified: metadata.updated,
        })
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        ttl: u64,
    ) -> Result<PresignedUrl, GatewayError> {
        let signer = self.interop_signer()?;
        let url = format!("{INTEROP_ENDPOINT}/{bucket}/{key}");
        let now = OffsetDateTime::now_utc();
        let presigned = signer.presign(
            operation.http_method(),
            &url,
            ttl,
            SigV4Timestamp::from_datetime(now)?,
        )?;

        Ok(PresignedUrl {
            url: presigned,
            expires_at: rfc3339(now + time::Duration::seconds(ttl as i64)),
            ttl,
            operation: operation.as_str().to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_are_fully_encoded() {
        assert_eq!(
            GcsBackend::encoded_object("dir/file name.pdf"),
            "dir%2Ffile%20name.pdf"
        );
    }

    #[test]
    fn list_response_shape_parses() {
        let body = serde_json::json!({
            "items": [
                {"name": "a.txt", "size": "12", "etag": "e", "updated": "2026-01-01T00:00:00Z"},
            ],
            "prefixes": ["sub/"],
            "nextPageToken": "t",
        });
        let parsed: ListResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.items[0].name, "a.txt");
        assert_eq!(parsed.prefixes, vec!["sub/".to_string()]);
        assert_eq!(parsed.next_page_token.as_deref(), Some("t"));
    }
}
