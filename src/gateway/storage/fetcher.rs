//! Document fetcher with a TTL cache.
//!
//! Serves presigned-URL fetches for RAG flows and the generic HTTPS
//! passthrough. Entries expire on read once past their TTL and a
//! background sweep clears the rest every five minutes; concurrent
//! fetches of one URL collapse into a single request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::gateway::credentials::sigv4::hex_encode;
use crate::gateway::singleflight;
use crate::gateway::GatewayError;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub bytes: Bytes,
    pub content_type: String,
    pub sha256: String,
    pub fetched_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    document: Document,
    expires_at: OffsetDateTime,
}

pub struct DocumentFetcher {
    client: reqwest::Client,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    flights: singleflight::Group,
    ttl: Duration,
    sweep_stop: Arc<tokio::sync::Notify>,
    sweep_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DocumentFetcher {
    /// Requires a running tokio runtime; the sweep task starts
    /// immediately.
    pub fn new(ttl: Duration) -> Arc<Self> {
        let cache: Arc<Mutex<HashMap<String, CacheEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let sweep_stop = Arc::new(tokio::sync::Notify::new());

        let fetcher = Arc::new(Self {
            client: reqwest::Client::new(),
            cache: cache.clone(),
            flights: singleflight::Group::new(),
            ttl,
            sweep_stop: sweep_stop.clone(),
            sweep_task: Mutex::new(None),
        });

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                        let now = OffsetDateTime::now_utc();
                        let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        cache.retain(|_, entry| entry.expires_at > now);
                    }
                    _ = sweep_stop.notified() => break,
                }
            }
        });
        *fetcher
            .sweep_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        fetcher
    }

    pub async fn fetch(&self, url: &str) -> Result<Document, GatewayError> {
        if let Some(document) = self.cached(url) {
            return Ok(document);
        }

        let lock = self.flights.key_lock(url);
        let _flight = lock.lock().await;
        if let Some(document) = self.cached(url) {
            return Ok(document);
        }

        let response = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    GatewayError::Timeout {
                        operation: "document fetch".to_string(),
                    }
                } else {
                    GatewayError::Upstream {
                        provider: "document-fetch".to_string(),
                        upstream_status: None,
                        message: err.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream {
                provider: "document-fetch".to_string(),
                upstream_status: Some(status.as_u16()),
                message: format!("document fetch returned {status}"),
            });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| GatewayError::internal(err.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let sha256 = hex_encode(&hasher.finalize());

        let now = OffsetDateTime::now_utc();
        let document = Document {
            url: url.to_string(),
            bytes,
            content_type,
            sha256,
            fetched_at: now,
        };

        {
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            cache.insert(
                url.to_string(),
                CacheEntry {
                    document: document.clone(),
                    expires_at: now + self.ttl,
                },
            );
        }

        Ok(document)
    }

    /// Cache read with expiry-on-miss: stale entries are removed here, not
    /// just by the sweep.
    fn cached(&self, url: &str) -> Option<Document> {
        let now = OffsetDateTime::now_utc();
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match cache.get(url) {
            Some(entry) if entry.expires_at > now => Some(entry.document.clone()),
            Some(_) => {
                cache.remove(url);
                None
            }
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the sweep and drop the cache; bounded by the caller's
    /// shutdown budget.
    pub async fn shutdown(&self) {
        self.sweep_stop.notify_waiters();
        let handle = self
            .sweep_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    #[cfg(test)]
    fn insert_for_test(&self, url: &str, document: Document, expires_at: OffsetDateTime) {
        self.cache
            .lock()
            .unwrap()
            .insert(url.to_string(), CacheEntry { document, expires_at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(url: &str) -> Document {
        Document {
            url: url.to_string(),
            bytes: Bytes::from_static(b"payload"),
            content_type: "text/plain".to_string(),
            sha256: "00".to_string(),
            fetched_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn expired_entries_vanish_on_read() {
        let fetcher = DocumentFetcher::new(Duration::from_secs(60));
        let now = OffsetDateTime::now_utc();

        fetcher.insert_for_test(
            "https://example.com/fresh",
            document("https://example.com/fresh"),
            now + time::Duration::seconds(60),
        );
        fetcher.insert_for_test(
            "https://example.com/stale",
            document("https://example.com/stale"),
            now - time::Duration::seconds(1),
        );

        assert!(fetcher.cached("https://example.com/fresh").is_some());
        assert!(fetcher.cached("https://example.com/stale").is_none());
        assert_eq!(fetcher.len(), 1);

        fetcher.shutdown().await;
        assert!(fetcher.is_empty());
    }
}
