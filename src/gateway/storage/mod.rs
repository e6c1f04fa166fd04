//! Object-storage backends and the access policy applied before dispatch.

pub mod azblob;
pub mod fetcher;
pub mod gcs;
pub mod https;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use super::config::{AccessControlConfig, StorageInstance, StorageKind, StorageOp};
use super::credentials::CredentialEngine;
use super::GatewayError;

/// What a presigned URL authorizes. Serialized with the S3-style operation
/// names the original API exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignOperation {
    Get,
    Put,
    Delete,
    Head,
}

impl PresignOperation {
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "GetObject" | "get" => Some(Self::Get),
            "PutObject" | "put" => Some(Self::Put),
            "DeleteObject" | "delete" => Some(Self::Delete),
            "HeadObject" | "head" => Some(Self::Head),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GetObject",
            Self::Put => "PutObject",
            Self::Delete => "DeleteObject",
            Self::Head => "HeadObject",
        }
    }

    pub fn http_method(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectData {
    pub body: Bytes,
    pub content_type: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PutResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListResult {
    pub objects: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeadResult {
    pub content_type: String,
    pub content_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// Presign response, shaped exactly as the public surface promises.
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    /// RFC 3339.
    pub expires_at: String,
    pub ttl: u64,
    pub operation: String,
    pub bucket: String,
    pub key: String,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> StorageKind;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, GatewayError>;
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<PutResult, GatewayError>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError>;
    async fn list_objects(&self, request: &ListRequest) -> Result<ListResult, GatewayError>;
    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadResult, GatewayError>;
    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        ttl: u64,
    ) -> Result<PresignedUrl, GatewayError>;
}

pub fn build_backend(
    instance: Arc<StorageInstance>,
    engine: Arc<CredentialEngine>,
) -> Arc<dyn StorageBackend> {
    match instance.kind {
        StorageKind::S3 | StorageKind::Ibmcos | StorageKind::Ociobj => {
            Arc::new(s3::S3CompatBackend::new(instance, engine))
        }
        StorageKind::Gcpblob => Arc::new(gcs::GcsBackend::new(instance, engine)),
        StorageKind::Azblob => Arc::new(azblob::AzureBlobBackend::new(instance, engine)),
        StorageKind::Https => Arc::new(https::HttpsBackend::new(instance, engine)),
    }
}

/// ACL applied before any backend dispatch. Deny means a 403 with no
/// upstream call.
pub fn check_access(
    access: &AccessControlConfig,
    bucket: &str,
    key: &str,
    op: StorageOp,
) -> Result<(), GatewayError> {
    if !access.allowed_buckets.is_empty()
        && !access
            .allowed_buckets
            .iter()
            .any(|allowed| allowed == bucket)
    {
        return Err(GatewayError::AccessDenied);
    }

    let slashed = format!("/{key}");
    for denied in &access.denied_prefixes {
        if key.starts_with(denied.as_str()) || slashed.starts_with(denied.as_str()) {
            return Err(GatewayError::AccessDenied);
        }
    }

    if !access.allowed_operations.is_empty() && !access.allowed_operations.contains(&op) {
        return Err(GatewayError::AccessDenied);
    }

    Ok(())
}

pub(crate) fn rfc3339(timestamp: time::OffsetDateTime) -> String {
    timestamp
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(
        allowed_buckets: &[&str],
        denied_prefixes: &[&str],
        allowed_operations: &[StorageOp],
    ) -> AccessControlConfig {
        AccessControlConfig {
            allowed_buckets: allowed_buckets.iter().map(|s| s.to_string()).collect(),
            denied_prefixes: denied_prefixes.iter().map(|s| s.to_string()).collect(),
            allowed_operations: allowed_operations.to_vec(),
        }
    }

    #[test]
    fn empty_allowlist_admits_all_buckets() {
        let config = access(&[], &[], &[]);
        assert!(check_access(&config, "anything", "key", StorageOp::Get).is_ok());
    }

    #[test]
    fn bucket_allowlist_denies_outsiders() {
        let config = access(&["rag-docs"], &[], &[]);
        assert!(check_access(&config, "rag-docs", "k", StorageOp::Get).is_ok());
        assert!(check_access(&config, "other", "k", StorageOp::Get).is_err());
    }

    #[test]
    fn denied_prefixes_match_with_and_without_leading_slash() {
        let config = access(&[], &["/secret/"], &[]);
        assert!(check_access(&config, "b", "secret/creds.json", StorageOp::Get).is_err());
        assert!(check_access(&config, "b", "public/doc.pdf", StorageOp::Get).is_ok());

        let dotfiles = access(&[], &["/."], &[]);
        assert!(check_access(&dotfiles, "b", ".env", StorageOp::Get).is_err());
    }

    #[test]
    fn operation_allowlist_is_enforced() {
        let config = access(&[], &[], &[StorageOp::Get, StorageOp::List]);
        assert!(check_access(&config, "b", "k", StorageOp::Get).is_ok());
        let err = check_access(&config, "b", "k", StorageOp::Delete).unwrap_err();
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn presign_operation_names() {
        assert_eq!(
            PresignOperation::from_query("GetObject"),
            Some(PresignOperation::Get)
        );
        assert_eq!(
            PresignOperation::from_query("put"),
            Some(PresignOperation::Put)
        );
        assert!(PresignOperation::from_query("CopyObject").is_none());
        assert_eq!(PresignOperation::Get.as_str(), "GetObject");
    }
}
