//! S3-compatible backend, covering native S3 plus IBM COS and OCI Object
//! Storage through their S3-compatibility endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

use crate::gateway::config::{StorageInstance, StorageKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec, SigV4Signer, SigV4Timestamp};
use crate::gateway::xml::XmlDocument;
use crate::gateway::GatewayError;

use super::{
    rfc3339, HeadResult, ListRequest, ListResult, ObjectData, ObjectEntry, PresignOperation,
    PresignedUrl, PutResult, StorageBackend,
};

const DEFAULT_REGION: &str = "us-east-1";

pub struct S3CompatBackend {
    instance: Arc<StorageInstance>,
    engine: Arc<CredentialEngine>,
    client: reqwest::Client,
    spec: CredentialSpec,
}

impl S3CompatBackend {
    pub fn new(instance: Arc<StorageInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_storage(&instance);
        Self {
            instance,
            engine,
            client: reqwest::Client::new(),
            spec,
        }
    }

    fn region(&self) -> &str {
        self.instance.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    /// Native S3 uses virtual-host addressing; compatibility endpoints are
    /// path-style.
    fn object_url(&self, bucket: &str, key: &str) -> String {
        match self.instance.endpoint.as_deref() {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                if key.is_empty() {
                    format!("{endpoint}/{bucket}")
                } else {
                    format!("{endpoint}/{bucket}/{key}")
                }
            }
            None => {
                let host = if self.region() == DEFAULT_REGION {
                    format!("{bucket}.s3.amazonaws.com")
                } else {
                    format!("{bucket}.s3.{}.amazonaws.com", self.region())
                };
                if key.is_empty() {
                    format!("https://{host}")
                } else {
                    format!("https://{host}/{key}")
                }
            }
        }
    }

    async fn signer(&self) -> Result<SigV4Signer, GatewayError> {
        let credentials = self.engine.credentials_for(&self.spec).await?;
        credentials.sigv4_signer(self.region(), "s3")
    }

    async fn signed_request(
        &self,
        method: &str,
        url: &str,
        body: Bytes,
    ) -> Result<reqwest::Response, GatewayError> {
        let signer = self.signer().await?;
        let headers = BTreeMap::new();
        let signed = signer.sign(method, url, &headers, &body, SigV4Timestamp::now()?)?;

        let method: reqwest::Method = method
            .parse()
            .map_err(|_| GatewayError::internal(format!("bad method {method:?}")))?;
        let mut request = self
            .client
            .request(method, url)
            .timeout(self.instance.timeouts.invoke())
            .header("authorization", &signed.authorization)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.content_sha256)
            .body(body);
        if let Some(token) = &signed.security_token {
            request = request.header("x-amz-security-token", token);
        }

        request.send().await.map_err(|err| {
            if err.is_timeout() {
                GatewayError::Timeout {
                    operation: "storage request (s3)".to_string(),
                }
            } else {
                GatewayError::Upstream {
                    provider: self.instance.kind.as_str().to_string(),
                    upstream_status: None,
                    message: err.to_string(),
                }
            }
        })
    }

    fn classify_status(&self, status: u16, body: &[u8]) -> GatewayError {
        let text = String::from_utf8_lossy(body);
        match status {
            403 => GatewayError::AccessDenied,
            429 => GatewayError::RateLimited {
                scope: format!("upstream:{}", self.instance.kind),
            },
            _ => GatewayError::Upstream {
                provider: self.instance.kind.as_str().to_string(),
                upstream_status: Some(status),
                message: text.into_owned(),
            },
        }
    }
}

#[async_trait]
impl StorageBackend for S3CompatBackend {
    fn kind(&self) -> StorageKind {
        self.instance.kind
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, GatewayError> {
        let url = self.object_url(bucket, key);
        let response = self.signed_request("GET", &url, Bytes::new()).await?;
        let status = response.status().as_u16();
        let content_type = header_string(&response, "content-type")
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let etag = header_string(&response, "etag");
        let last_modified = header_string(&response, "last-modified");
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
            etag,
            last_modified,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        body: Bytes,
    ) -> Result<PutResult, GatewayError> {
        let url = self.object_url(bucket, key);
        let response = self.signed_request("PUT", &url, body).await?;
        let status = response.status().as_u16();
        let etag = header_string(&response, "etag");
        let version_id = header_string(&response, "x-amz-version-id");
        if status >= 400 {
            let body = response.bytes().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }
        Ok(PutResult {
            success: true,
            etag,
            version_id,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError> {
        let url = self.object_url(bucket, key);
        let response = self.signed_request("DELETE", &url, Bytes::new()).await?;
        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.bytes().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }
        Ok(())
    }

    async fn list_objects(&self, request: &ListRequest) -> Result<ListResult, GatewayError> {
        let mut url = format!("{}?list-type=2", self.object_url(&request.bucket, ""));
        if let Some(prefix) = &request.prefix {
            url.push_str(&format!("&prefix={}", urlencode(prefix)));
        }
        if let Some(delimiter) = &request.delimiter {
            url.push_str(&format!("&delimiter={}", urlencode(delimiter)));
        }
        if let Some(max_keys) = request.max_keys {
            url.push_str(&format!("&max-keys={max_keys}"));
        }
        if let Some(token) = &request.continuation_token {
            url.push_str(&format!("&continuation-token={}", urlencode(token)));
        }

        let response = self.signed_request("GET", &url, Bytes::new()).await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        if status >= 400 {
            return Err(self.classify_status(status, &body));
        }

        let xml = String::from_utf8_lossy(&body);
        Ok(parse_list_response(&xml))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadResult, GatewayError> {
        let url = self.object_url(bucket, key);
        let response = self.signed_request("HEAD", &url, Bytes::new()).await?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(self.classify_status(status, b""));
        }
        Ok(HeadResult {
            content_type: header_string(&response, "content-type")
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            content_length: header_string(&response, "content-length")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            etag: header_string(&response, "etag"),
            last_modified: header_string(&response, "last-modified"),
        })
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        ttl: u64,
    ) -> Result<PresignedUrl, GatewayError> {
        let url = self.object_url(bucket, key);
        let signer = self.signer().await?;
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

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn urlencode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// ListObjectsV2 reader over the shared XML document view.
fn parse_list_response(xml: &str) -> ListResult {
    let document = XmlDocument::parse(xml, &["Contents", "CommonPrefixes"]);
    let mut result = ListResult {
        is_truncated: document.scalar("IsTruncated") == Some("true"),
        next_continuation_token: document.scalar("NextContinuationToken").map(str::to_string),
        ..Default::default()
    };

    for fields in document.blocks("Contents") {
        let Some(key) = fields.get("Key") else {
            continue;
        };
        result.objects.push(ObjectEntry {
            key: key.clone(),
            size: fields
                .get("Size")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            last_modified: fields.get("LastModified").cloned(),
            etag: fields
                .get("ETag")
                .map(|value| value.trim_matches('"').to_string()),
        });
    }

    for fields in document.blocks("CommonPrefixes") {
        if let Some(prefix) = fields.get("Prefix") {
            result.common_prefixes.push(prefix.clone());
        }
    }

    result
}
