//! Credential strategy engine.
//!
//! For each backend instance the engine walks an ordered strategy list
//! (workload identity, vault dynamic secret, static environment material),
//! stops at the first success, and caches the result until it nears expiry.
//! Refreshes are single-flight per instance; a transient refresh failure
//! falls back to a still-valid cached credential.

pub mod platform;
pub mod sigv4;
mod strategy;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use time::OffsetDateTime;

use super::config::{
    CredentialStrategyKind, ProviderInstance, ProviderKind, StorageInstance, StorageKind,
};
use super::singleflight;
use super::GatewayError;

pub use platform::Platform;
pub use sigv4::{SigV4Signer, SigV4Timestamp};

/// Refresh-ahead window: credentials inside this margin of expiry are
/// renewed proactively.
const REFRESH_AHEAD: Duration = Duration::from_secs(300);

/// Lifetime assigned to static material; it is re-read from the
/// environment on this cadence rather than truly expiring.
const STATIC_LIFETIME: Duration = Duration::from_secs(12 * 3600);

#[derive(Debug, Clone)]
pub enum Credentials {
    StaticBearer {
        token: String,
        expiry: OffsetDateTime,
    },
    AwsSigningKeys {
        access_key: String,
        secret_key: String,
        session_token: Option<String>,
        expiry: OffsetDateTime,
    },
    AzureToken {
        jwt: String,
        expiry: OffsetDateTime,
    },
    GcpToken {
        jwt: String,
        expiry: OffsetDateTime,
    },
    OracleResourcePrincipal {
        token: String,
        expiry: OffsetDateTime,
    },
}

impl Credentials {
    pub fn expiry(&self) -> OffsetDateTime {
        match self {
            Self::StaticBearer { expiry, .. }
            | Self::AwsSigningKeys { expiry, .. }
            | Self::AzureToken { expiry, .. }
            | Self::GcpToken { expiry, .. }
            | Self::OracleResourcePrincipal { expiry, .. } => *expiry,
        }
    }

    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.expiry() > now
    }

    fn is_fresh_at(&self, now: OffsetDateTime) -> bool {
        self.expiry() > now + REFRESH_AHEAD
    }

    /// Token for `Authorization: Bearer` style auth, when this credential
    /// shape carries one.
    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            Self::StaticBearer { token, .. } | Self::OracleResourcePrincipal { token, .. } => {
                Some(token)
            }
            Self::AzureToken { jwt, .. } | Self::GcpToken { jwt, .. } => Some(jwt),
            Self::AwsSigningKeys { .. } => None,
        }
    }

    /// Build a SigV4 signer from AWS signing keys.
    pub fn sigv4_signer(
        &self,
        region: &str,
        service: &str,
    ) -> Result<SigV4Signer, GatewayError> {
        match self {
            Self::AwsSigningKeys {
                access_key,
                secret_key,
                session_token,
                ..
            } => SigV4Signer::new(
                access_key.clone(),
                secret_key.clone(),
                session_token.clone(),
                region,
                service,
            ),
            _ => Err(GatewayError::internal(
                "credential shape does not support sigv4 signing",
            )),
        }
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never prints secret material.
        let label = match self {
            Self::StaticBearer { .. } => "static-bearer",
            Self::AwsSigningKeys { .. } => "aws-signing-keys",
            Self::AzureToken { .. } => "azure-token",
            Self::GcpToken { .. } => "gcp-token",
            Self::OracleResourcePrincipal { .. } => "oracle-resource-principal",
        };
        write!(f, "{label} (expires {})", self.expiry())
    }
}

/// Which cloud's auth machinery an instance needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudFamily {
    Aws,
    Azure,
    Gcp,
    Oracle,
    Ibm,
    /// Vendors without native workload identity (OpenAI, Anthropic).
    ApiKeyOnly,
}

impl CloudFamily {
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Bedrock => Self::Aws,
            ProviderKind::Azure => Self::Azure,
            ProviderKind::Vertex => Self::Gcp,
            ProviderKind::Oracle => Self::Oracle,
            ProviderKind::Ibm => Self::Ibm,
            ProviderKind::OpenAi | ProviderKind::Anthropic => Self::ApiKeyOnly,
        }
    }

    pub fn for_storage(kind: StorageKind) -> Self {
        match kind {
            StorageKind::S3 => Self::Aws,
            StorageKind::Azblob => Self::Azure,
            StorageKind::Gcpblob => Self::Gcp,
            StorageKind::Ociobj => Self::Oracle,
            StorageKind::Ibmcos => Self::Ibm,
            StorageKind::Https => Self::ApiKeyOnly,
        }
    }
}

/// Everything a strategy needs to mint credentials for one instance.
#[derive(Debug, Clone)]
pub struct CredentialSpec {
    /// Cache key; provider instance id or `storage:{name}`.
    pub cache_key: String,
    pub family: CloudFamily,
    pub strategies: Vec<CredentialStrategyKind>,
    pub api_key_env: Option<String>,
    /// Conventional environment variables probed when `api_key_env` is
    /// unset.
    pub fallback_envs: Vec<&'static str>,
    pub vault_path: Option<String>,
    pub region: Option<String>,
    /// OAuth scope for the Azure workload-identity exchange.
    pub azure_scope: &'static str,
    pub refresh_timeout: Duration,
}

impl CredentialSpec {
    pub fn for_provider(instance: &ProviderInstance) -> Self {
        let fallback_envs = match instance.kind {
            ProviderKind::OpenAi => vec!["OPENAI_API_KEY"],
            ProviderKind::Anthropic => vec!["ANTHROPIC_API_KEY"],
            ProviderKind::Azure => vec!["AZURE_OPENAI_API_KEY"],
            ProviderKind::Ibm => vec!["IBM_API_KEY"],
            ProviderKind::Oracle => vec!["ORACLE_API_KEY"],
            ProviderKind::Bedrock | ProviderKind::Vertex => Vec::new(),
        };
        Self {
            cache_key: instance.id.clone(),
            family: CloudFamily::for_provider(instance.kind),
            strategies: instance.credential_strategies.clone(),
            api_key_env: instance.api_key_env.clone(),
            fallback_envs,
            vault_path: instance.vault_path.clone(),
            region: instance.region.clone(),
            azure_scope: "https://cognitiveservices.azure.com/.default",
            refresh_timeout: instance.timeouts.credential_refresh(),
        }
    }

    pub fn for_storage(instance: &StorageInstance) -> Self {
        let fallback_envs = match instance.kind {
            StorageKind::Azblob => vec!["AZURE_STORAGE_KEY"],
            StorageKind::Ibmcos => vec!["IBM_COS_API_KEY", "IBM_API_KEY"],
            StorageKind::Https => vec!["HTTPS_PROXY_BEARER"],
            _ => Vec::new(),
        };
        Self {
            cache_key: format!("storage:{}", instance.name),
            family: CloudFamily::for_storage(instance.kind),
            strategies: instance.credential_strategies.clone(),
            api_key_env: instance.api_key_env.clone(),
            fallback_envs,
            vault_path: instance.vault_path.clone(),
            region: instance.region.clone(),
            azure_scope: "https://storage.azure.com/.default",
            refresh_timeout: instance.timeouts.credential_refresh(),
        }
    }
}

pub struct CredentialEngine {
    platform: Platform,
    http: reqwest::Client,
    cache: Mutex<HashMap<String, Credentials>>,
    flights: singleflight::Group,
    refreshes: AtomicU64,
}

impl CredentialEngine {
    pub fn new() -> Self {
        Self::with_platform(Platform::detect())
    }

    pub fn with_platform(platform: Platform) -> Self {
        Self {
            platform,
            http: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
            flights: singleflight::Group::new(),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Inject credentials directly, bypassing the strategies. Used at
    /// startup for operator-supplied material and by tests.
    pub fn seed(&self, cache_key: impl Into<String>, credentials: Credentials) {
        self.cache_insert(cache_key.into(), credentials);
    }

    /// Produce valid credentials for an instance. Always returns material
    /// whose expiry is in the future.
    pub async fn credentials_for(
        &self,
        spec: &CredentialSpec,
    ) -> Result<Credentials, GatewayError> {
        let now = OffsetDateTime::now_utc();
        if let Some(cached) = self.cache_get(&spec.cache_key) {
            if cached.is_fresh_at(now) {
                return Ok(cached);
            }
        }

        let lock = self.flights.key_lock(&spec.cache_key);
        let _flight = lock.lock().await;

        let now = OffsetDateTime::now_utc();
        if let Some(cached) = self.cache_get(&spec.cache_key) {
            if cached.is_fresh_at(now) {
                return Ok(cached);
            }
        }

        for kind in &spec.strategies {
            let attempt =
                tokio::time::timeout(spec.refresh_timeout, self.run_strategy(*kind, spec)).await;
            match attempt {
                Ok(Ok(credentials)) => {
                    if !credentials.is_valid_at(now) {
                        tracing::warn!(
                            instance = %spec.cache_key,
                            strategy = ?kind,
                            "strategy produced already-expired credentials, skipping"
                        );
                        continue;
                    }
                    self.refreshes.fetch_add(1, Ordering::Relaxed);
                    self.cache_insert(spec.cache_key.clone(), credentials.clone());
                    return Ok(credentials);
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        instance = %spec.cache_key,
                        strategy = ?kind,
                        error = %err,
                        "credential strategy failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        instance = %spec.cache_key,
                        strategy = ?kind,
                        timeout_secs = spec.refresh_timeout.as_secs(),
                        "credential strategy timed out"
                    );
                }
            }
        }

        // Transient refresh failure: a cached credential that has not hit
        // its hard expiry is still usable.
        if let Some(cached) = self.cache_get(&spec.cache_key) {
            if cached.is_valid_at(now) {
                tracing::warn!(
                    instance = %spec.cache_key,
                    "all strategies failed, reusing still-valid cached credentials"
                );
                return Ok(cached);
            }
        }

        Err(GatewayError::CredentialUnavailable {
            instance: spec.cache_key.clone(),
        })
    }

    /// Reload bookkeeping: drop idle single-flight locks for instances
    /// that disappeared. Cache entries for vanished instances are NOT
    /// purged here; nothing looks them up anymore and they age out
    /// lazily, so an in-flight refresh against the old snapshot is never
    /// invalidated mid-request.
    pub fn retain_instances(&self, live: &HashSet<String>) {
        self.flights.retain(|key| live.contains(key));
    }

    /// Drop everything; part of shutdown.
    pub fn drain(&self) {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.clear();
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn static_lifetime() -> Duration {
        STATIC_LIFETIME
    }

    fn cache_get(&self, key: &str) -> Option<Credentials> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn cache_insert(&self, key: String, credentials: Credentials) {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, credentials);
    }
}

impl Default for CredentialEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_spec(key: &str, env: &str) -> CredentialSpec {
        CredentialSpec {
            cache_key: key.to_string(),
            family: CloudFamily::ApiKeyOnly,
            strategies: vec![CredentialStrategyKind::StaticEnv],
            api_key_env: Some(env.to_string()),
            fallback_envs: Vec::new(),
            vault_path: None,
            region: None,
            azure_scope: "https://cognitiveservices.azure.com/.default",
            refresh_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn strategies_stop_at_first_success() {
        std::env::set_var("SKYBRIDGE_TEST_KEY_A", "sk-first");
        let engine = CredentialEngine::with_platform(Platform::GenericK8s);
        let mut spec = static_spec("inst-a", "SKYBRIDGE_TEST_KEY_A");
        // Workload identity cannot succeed for ApiKeyOnly; declared order
        // still reaches the static strategy.
        spec.strategies = vec![
            CredentialStrategyKind::WorkloadIdentity,
            CredentialStrategyKind::StaticEnv,
        ];

        let credentials = engine.credentials_for(&spec).await.unwrap();
        assert_eq!(credentials.bearer_token(), Some("sk-first"));
        assert_eq!(engine.refresh_count(), 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_refresh() {
        std::env::set_var("SKYBRIDGE_TEST_KEY_B", "sk-cached");
        let engine = CredentialEngine::with_platform(Platform::GenericK8s);
        let spec = static_spec("inst-b", "SKYBRIDGE_TEST_KEY_B");

        engine.credentials_for(&spec).await.unwrap();
        engine.credentials_for(&spec).await.unwrap();
        engine.credentials_for(&spec).await.unwrap();
        assert_eq!(engine.refresh_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_cold_requests_share_one_refresh() {
        std::env::set_var("SKYBRIDGE_TEST_KEY_C", "sk-flight");
        let engine = std::sync::Arc::new(CredentialEngine::with_platform(Platform::GenericK8s));
        let spec = static_spec("inst-c", "SKYBRIDGE_TEST_KEY_C");

        let mut handles = Vec::new();
        for _ in 0..6 {
            let engine = engine.clone();
            let spec = spec.clone();
            handles.push(tokio::spawn(async move {
                engine.credentials_for(&spec).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(engine.refresh_count(), 1);
    }

    #[tokio::test]
    async fn expired_seed_is_replaced_and_never_returned() {
        std::env::set_var("SKYBRIDGE_TEST_KEY_D", "sk-new");
        let engine = CredentialEngine::with_platform(Platform::GenericK8s);
        let spec = static_spec("inst-d", "SKYBRIDGE_TEST_KEY_D");

        engine.seed(
            "inst-d",
            Credentials::StaticBearer {
                token: "sk-old".to_string(),
                expiry: OffsetDateTime::now_utc() - time::Duration::seconds(30),
            },
        );

        let credentials = engine.credentials_for(&spec).await.unwrap();
        assert!(credentials.is_valid_at(OffsetDateTime::now_utc()));
        assert_eq!(credentials.bearer_token(), Some("sk-new"));
    }

    #[tokio::test]
    async fn still_valid_cache_survives_total_strategy_failure() {
        let engine = CredentialEngine::with_platform(Platform::GenericK8s);
        let mut spec = static_spec("inst-e", "SKYBRIDGE_TEST_KEY_MISSING");
        // Within the refresh-ahead window but not expired.
        engine.seed(
            "inst-e",
            Credentials::StaticBearer {
                token: "sk-stale".to_string(),
                expiry: OffsetDateTime::now_utc() + time::Duration::seconds(60),
            },
        );
        spec.api_key_env = Some("SKYBRIDGE_TEST_KEY_MISSING".to_string());

        let credentials = engine.credentials_for(&spec).await.unwrap();
        assert_eq!(credentials.bearer_token(), Some("sk-stale"));
    }

    #[tokio::test]
    async fn all_failures_with_empty_cache_is_unavailable() {
        let engine = CredentialEngine::with_platform(Platform::GenericK8s);
        let spec = static_spec("inst-f", "SKYBRIDGE_TEST_KEY_ALSO_MISSING");
        let err = engine.credentials_for(&spec).await.unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.code(), "credential_unavailable");
    }

    #[test]
    fn retain_drops_idle_flights_but_leaves_cache_for_lazy_eviction() {
        let engine = CredentialEngine::with_platform(Platform::GenericK8s);
        let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
        engine.seed(
            "keep",
            Credentials::StaticBearer {
                token: "a".to_string(),
                expiry,
            },
        );
        engine.seed(
            "gone",
            Credentials::StaticBearer {
                token: "b".to_string(),
                expiry,
            },
        );
        let _ = engine.flights.key_lock("keep");
        let _ = engine.flights.key_lock("gone");

        let mut live = HashSet::new();
        live.insert("keep".to_string());
        engine.retain_instances(&live);

        assert_eq!(engine.flights.len(), 1);
        // Cache entries for removed instances stay put; nothing resolves
        // them anymore, so they fall out lazily rather than on reload.
        assert!(engine.cache_get("keep").is_some());
        assert!(engine.cache_get("gone").is_some());
    }

    #[test]
    fn display_never_leaks_material() {
        let credentials = Credentials::AwsSigningKeys {
            access_key: "AKIDEXAMPLE".to_string(),
            secret_key: "supersecret".to_string(),
            session_token: None,
            expiry: OffsetDateTime::UNIX_EPOCH,
        };
        let rendered = credentials.to_string();
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("aws-signing-keys"));
    }
}
