//! Gateway counters served by `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    auth_failures: AtomicU64,
    invalid_requests: AtomicU64,
    rate_limited: AtomicU64,
    access_denied: AtomicU64,
    translation_failures: AtomicU64,
    upstream_errors: AtomicU64,
    fallbacks: AtomicU64,
    credential_failures: AtomicU64,
    storage_operations: AtomicU64,
    presigns_minted: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub auth_failures: u64,
    pub invalid_requests: u64,
    pub rate_limited: u64,
    pub access_denied: u64,
    pub translation_failures: u64,
    pub upstream_errors: u64,
    pub fallbacks: u64,
    pub credential_failures: u64,
    pub credential_refreshes: u64,
    pub storage_operations: u64,
    pub presigns_minted: u64,
}

impl Metrics {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_request(&self) {
        self.invalid_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_access_denied(&self) {
        self.access_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_translation_failure(&self) {
        self.translation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_credential_failure(&self) {
        self.credential_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_operation(&self) {
        self.storage_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_presign_minted(&self) {
        self.presigns_minted.fetch_add(1, Ordering::Relaxed);
    }

    /// `credential_refreshes` comes from the engine so the snapshot stays
    /// consistent with the single-flight accounting.
    pub fn snapshot(&self, credential_refreshes: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            invalid_requests: self.invalid_requests.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            access_denied: self.access_denied.load(Ordering::Relaxed),
            translation_failures: self.translation_failures.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            credential_failures: self.credential_failures.load(Ordering::Relaxed),
            credential_refreshes,
            storage_operations: self.storage_operations.load(Ordering::Relaxed),
            presigns_minted: self.presigns_minted.load(Ordering::Relaxed),
        }
    }
}
