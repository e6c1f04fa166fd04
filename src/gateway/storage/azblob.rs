//! Azure Blob Storage backend.
//!
//! Shared-key signing covers the data-path operations and service-SAS
//! presigning; when the engine hands back a workload-identity token the
//! data path switches to bearer auth and presigning is refused (a user
//! delegation key would be required).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::gateway::config::{StorageInstance, StorageKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec, Credentials};
use crate::gateway::xml::XmlDocument;
use crate::gateway::GatewayError;

use super::{
    rfc3339, HeadResult, ListRequest, ListResult, ObjectData, ObjectEntry, PresignOperation,
    PresignedUrl, PutResult, StorageBackend,
};

const API_VERSION: &str = "2021-08-06";

const RFC1123: &[FormatItem<'_>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

type HmacSha256 = Hmac<Sha256>;

enum BlobAuth {
    SharedKey { key: Vec<u8> },
    Bearer { jwt: String },
}

pub struct AzureBlobBackend {
    instance: Arc<StorageInstance>,
    engine: Arc<CredentialEngine>,
    client: reqwest::Client,
    spec: CredentialSpec,
}

impl AzureBlobBackend {
    pub fn new(instance: Arc<StorageInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_storage(&instance);
        Self {
            instance,
            engine,
            client: reqwest::Client::new(),
            spec,
        }
    }

    fn account(&self) -> Result<&str, GatewayError> {
        self.instance
            .account
            .as_deref()
            .ok_or_else(|| GatewayError::internal("azblob instance has no account configured"))
    }

    fn base_url(&self) -> Result<String, GatewayError> {
        match self.instance.endpoint.as_deref() {
            Some(endpoint) => Ok(endpoint.trim_end_matches('/').to_string()),
            None => Ok(format!("https://{}.blob.core.windows.net", self.account()?)),
        }
    }

    async fn auth(&self) -> Result<BlobAuth, GatewayError> {
        match self.engine.credentials_for(&self.spec).await? {
            Credentials::StaticBearer { token, .. } => {
                let key = base64::engine::general_purpose::STANDARD
                    .decode(token.trim().as_bytes())
                    .map_err(|err| {
                        GatewayError::internal(format!("azblob account key is not base64: {err}"))
                    })?;
                Ok(BlobAuth::SharedKey { key })
            }
            Credentials::AzureToken { jwt, .. } => Ok(BlobAuth::Bearer { jwt }),
            other => Err(GatewayError::internal(format!(
                "unexpected credential shape for azblob: {other}"
            ))),
        }
    }

    /// Shared-key string-to-sign for the data path.
    fn shared_key_authorization(
        &self,
        key: &[u8],
        method: &str,
        content_length: usize,
        content_type: &str,
        ms_headers: &BTreeMap<String, String>,
        container_and_blob: &str,
        query: &BTreeMap<String, String>,
    ) -> Result<String, GatewayError> {
        let account = self.account()?;

        let mut canonical_headers = String::new();
        for (name, value) in ms_headers {
            canonical_headers.push_str(&format!("{name}:{value}\n"));
        }

        let mut canonical_resource = format!("/{account}/{container_and_blob}");
        for (name, value) in query {
            canonical_resource.push_str(&format!("\n{name}:{value}"));
        }

        let content_length = if content_length == 0 {
            String::new()
        } else {
            content_length.to_string()
        };

        let string_to_sign = format!(
            "{method}\n\n\n{content_length}\n\n{content_type}\n\n\n\n\n\n\n{canonical_headers}{canonical_resource}"
        );

        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|err| GatewayError::internal(format!("azblob hmac key: {err}")))?;
        mac.update(string_to_sign.as_bytes());
        let signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKey {account}:{signature}"))
    }

    async fn request(
        &self,
        method: &str,
        container_and_blob: &str,
        query: &BTreeMap<String, String>,
        content_type: &str,
        body: Bytes,
        extra_ms_headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, GatewayError> {
        let auth = self.auth().await?;
        let base = self.base_url()?;

        let mut url = format!("{base}/{container_and_blob}");
        if !query.is_empty() {
            let rendered: Vec<String> = query
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            url.push('?');
            url.push_str(&rendered.join("&"));
        }

        let now = OffsetDateTime::now_utc()
            .format(RFC1123)
            .map_err(|err| GatewayError::internal(format!("rfc1123 format: {err}")))?;

        let mut ms_headers = BTreeMap::new();
        ms_headers.insert("x-ms-date".to_string(), now);
        ms_headers.insert("x-ms-version".to_string(), API_VERSION.to_string());
        for (name, value) in extra_ms_headers {
            ms_headers.insert(name.to_string(), value.to_string());
        }

        let authorization = match &auth {
            BlobAuth::SharedKey { key } => Some(self.shared_key_authorization(
                key,
                method,
                body.len(),
                content_type,
                &ms_headers,
                container_and_blob,
                query,
            )?),
            BlobAuth::Bearer { jwt } => Some(format!("Bearer {jwt}")),
        };

        let method: reqwest::Method = method
            .parse()
            .map_err(|_| GatewayError::internal("bad method"))?;
        let mut request = self
            .client
            .request(method, &url)
            .timeout(self.instance.timeouts.invoke())
            .body(body);
        for (name, value) in &ms_headers {
            request = request.header(name, value);
        }
        if !content_type.is_empty() {
            request = request.header("content-type", content_type);
        }
        if let Some(authorization) = authorization {
            request = request.header("authorization", authorization);
        }

        request.send().await.map_err(|err| {
            if err.is_timeout() {
                GatewayError::Timeout {
                    operation: "storage request (azblob)".to_string(),
                }
            } else {
                GatewayError::Upstream {
                    provider: "azblob".to_string(),
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
                scope: "upstream:azblob".to_string(),
            },
            _ => GatewayError::Upstream {
                provider: "azblob".to_string(),
                upstream_status: Some(status),
                message: String::from_utf8_lossy(body).into_owned(),
            },
        }
    }
}

#[async_trait]
impl StorageBackend for AzureBlobBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Azblob
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, GatewayError> {
        let response = self
            .request(
                "GET",
                &format!("{bucket}/{key}"),
                &BTreeMap::new(),
                "",
                Bytes::new(),
                &[],
            )
            .await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let etag = response
            .headers()
            .get("etag")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
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
        content_type: &str,
        body: Bytes,
    ) -> Result<PutResult, GatewayError> {
        let response = self
            .request(
                "PUT",
                &format!("{bucket}/{key}"),
                &BTreeMap::new(),
                content_type,
                body,
                &[("x-ms-blob-type", "BlockBlob")],
            )
            .await?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get("etag")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if status >= 400 {
            let body = response.bytes().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }
        Ok(PutResult {
            success: true,
            etag,
            version_id: None,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError> {
        let response = self
            .request(
                "DELETE",
                &format!("{bucket}/{key}"),
                &BTreeMap::new(),
                "",
                Bytes::new(),
                &[],
            )
            .await?;
        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.bytes().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }
        Ok(())
    }

    async fn list_objects(&self, request: &ListRequest) -> Result<ListResult, GatewayError> {
        let mut query = BTreeMap::new();
        query.insert("restype".to_string(), "container".to_string());
        query.insert("comp".to_string(), "list".to_string());
        if let Some(prefix) = &request.prefix {
            query.insert("prefix".to_string(), prefix.clone());
        }
        if let Some(delimiter) = &request.delimiter {
            query.insert("delimiter".to_string(), delimiter.clone());
        }
        if let Some(max_keys) = request.max_keys {
            query.insert("maxresults".to_string(), max_keys.to_string());
        }
        if let Some(token) = &request.continuation_token {
            query.insert("marker".to_string(), token.clone());
        }

        let response = self
            .request("GET", &request.bucket, &query, "", Bytes::new(), &[])
            .await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        if status >= 400 {
            return Err(self.classify_status(status, &body));
        }

        let xml = String::from_utf8_lossy(&body);
        Ok(parse_blob_list(&xml))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadResult, GatewayError> {
        let response = self
            .request(
                "HEAD",
                &format!("{bucket}/{key}"),
                &BTreeMap::new(),
                "",
                Bytes::new(),
                &[],
            )
            .await?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(self.classify_status(status, b""));
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
            etag: response
                .headers()
                .get("etag")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            last_modified: response
                .headers()
                .get("last-modified")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        })
    }

    /// Service SAS signed with the account key.
    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        ttl: u64,
    ) -> Result<PresignedUrl, GatewayError> {
        let BlobAuth::SharedKey { key: account_key } = self.auth().await? else {
            return Err(GatewayError::internal(
                "azblob presign requires a shared account key",
            ));
        };
        let account = self.account()?;

        let permissions = match operation {
            PresignOperation::Get | PresignOperation::Head => "r",
            PresignOperation::Put => "cw",
            PresignOperation::Delete => "d",
        };
        let now = OffsetDateTime::now_utc();
        let start = rfc3339(now - time::Duration::minutes(5));
        let expiry_time = now + time::Duration::seconds(ttl as i64);
        let expiry = rfc3339(expiry_time);
        let canonical = format!("/blob/{account}/{bucket}/{key}");

        // Field order fixed by the service SAS spec for this sv.
        let string_to_sign = format!(
            "{permissions}\n{start}\n{expiry}\n{canonical}\n\n\nhttps\n{API_VERSION}\nb\n\n\n\n\n\n"
        );
        let mut mac = HmacSha256::new_from_slice(&account_key)
            .map_err(|err| GatewayError::internal(format!("sas hmac key: {err}")))?;
        mac.update(string_to_sign.as_bytes());
        let signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        let url = format!(
            "{}/{bucket}/{key}?sv={API_VERSION}&spr=https&st={}&se={}&sr=b&sp={permissions}&sig={}",
            self.base_url()?,
            sas_encode(&start),
            sas_encode(&expiry),
            sas_encode(&signature),
        );

        Ok(PresignedUrl {
            url,
            expires_at: expiry,
            ttl,
            operation: operation.as_str().to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

fn sas_encode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// EnumerationResults reader over the shared XML document view.
fn parse_blob_list(xml: &str) -> ListResult {
    let document = XmlDocument::parse(xml, &["Blob", "BlobPrefix"]);
    let mut result = ListResult::default();

    for fields in document.blocks("Blob") {
        let Some(name) = fields.get("Name") else {
            continue;
        };
        result.objects.push(ObjectEntry {
            key: name.clone(),
            size: fields
                .get("Content-Length")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            last_modified: fields.get("Last-Modified").cloned(),
            etag: fields.get("Etag").cloned(),
        });
    }
    for fields in document.blocks("BlobPrefix") {
        if let Some(name) = fields.get("Name") {
            result.common_prefixes.push(name.clone());
        }
    }

    let next = document.scalar("NextMarker").unwrap_or_default();
    result.is_truncated = !next.is_empty();
    result.next_continuation_token = if next.is_empty() {
        None
    } else {
        Some(next.to_string())
    };
    result
}
