//! Identity gate.
//!
//! The session and API-key databases are external collaborators consumed
//! through narrow async traits; TOTP verification is opaque to the
//! gateway. In-memory implementations back the default binary and the
//! tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

use super::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    SessionToken,
    ApiKey,
}

/// Caller identity, attached at the gate and never mutated downstream.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub api_key_id: String,
    pub user_name: String,
    pub email: String,
    pub two_fa_enabled: bool,
    pub auth_method: AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub id: String,
    pub user_name: String,
    pub email: String,
    pub two_fa_enabled: bool,
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Opaque key → identity lookup.
    async fn lookup(&self, api_key: &str) -> Option<ApiKeyRecord>;
    /// TOTP verification for keys with 2FA enrolled.
    async fn verify_totp(&self, api_key_id: &str, code: &str) -> bool;
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub api_key_id: String,
    pub created_at: String,
    pub expires_at: String,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, api_key_id: &str, ttl: Duration) -> Session;
    async fn validate(&self, token: &str) -> Option<Session>;
    async fn refresh(&self, token: &str, ttl: Duration) -> Option<Session>;
    async fn revoke(&self, token: &str) -> bool;
    async fn sessions_for(&self, api_key_id: &str) -> Vec<Session>;
}

/// Header names accepted on the public surface.
#[derive(Debug, Clone, Default)]
pub struct AuthHeaders {
    pub session_token: Option<String>,
    pub bearer: Option<String>,
    pub api_key: Option<String>,
    pub totp_code: Option<String>,
}

pub struct IdentityGate {
    api_keys: std::sync::Arc<dyn ApiKeyStore>,
    sessions: std::sync::Arc<dyn SessionStore>,
}

impl IdentityGate {
    pub fn new(
        api_keys: std::sync::Arc<dyn ApiKeyStore>,
        sessions: std::sync::Arc<dyn SessionStore>,
    ) -> Self {
        Self { api_keys, sessions }
    }

    pub fn api_keys(&self) -> &std::sync::Arc<dyn ApiKeyStore> {
        &self.api_keys
    }

    pub fn sessions(&self) -> &std::sync::Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Session token wins over API key; a bearer value is tried as a
    /// session first and falls back to key auth. Keys with 2FA enrolled
    /// must supply a valid TOTP code.
    pub async fn authenticate(&self, headers: &AuthHeaders) -> Result<Identity, GatewayError> {
        for token in [headers.session_token.as_deref(), headers.bearer.as_deref()]
            .into_iter()
            .flatten()
        {
            if let Some(session) = self.sessions.validate(token).await {
                let record = self
                    .api_keys
                    .lookup_by_id(&session.api_key_id)
                    .await
                    .ok_or_else(|| GatewayError::AuthenticationRequired {
                        message: "session valid but api key revoked".to_string(),
                    })?;
                return Ok(Identity {
                    api_key_id: record.id,
                    user_name: record.user_name,
                    email: record.email,
                    two_fa_enabled: record.two_fa_enabled,
                    auth_method: AuthMethod::SessionToken,
                    session_id: Some(session.id),
                });
            }
        }

        let api_key = headers
            .api_key
            .as_deref()
            .or(headers.bearer.as_deref())
            .ok_or_else(|| GatewayError::AuthenticationRequired {
                message: "missing session token or api key".to_string(),
            })?;

        let record = self.api_keys.lookup(api_key).await.ok_or_else(|| {
            GatewayError::AuthenticationRequired {
                message: "invalid api key".to_string(),
            }
        })?;

        if record.two_fa_enabled {
            let code =
                headers
                    .totp_code
                    .as_deref()
                    .ok_or_else(|| GatewayError::AuthenticationRequired {
                        message: "totp code required".to_string(),
                    })?;
            if !self.api_keys.verify_totp(&record.id, code).await {
                return Err(GatewayError::AuthenticationRequired {
                    message: "invalid totp code".to_string(),
                });
            }
        }

        Ok(Identity {
            api_key_id: record.id,
            user_name: record.user_name,
            email: record.email,
            two_fa_enabled: record.two_fa_enabled,
            auth_method: AuthMethod::ApiKey,
            session_id: None,
        })
    }
}

/// Id-based lookup used when a session resolves; kept off the public
/// trait so external stores only need the opaque-key path.
#[async_trait]
trait ApiKeyStoreExt: ApiKeyStore {
    async fn lookup_by_id(&self, api_key_id: &str) -> Option<ApiKeyRecord>;
}

#[async_trait]
impl<T: ApiKeyStore + ?Sized> ApiKeyStoreExt for T {
    async fn lookup_by_id(&self, api_key_id: &str) -> Option<ApiKeyRecord> {
        // Default: the id is resolvable as a key only for stores that
        // index both ways; the memory store does.
        self.lookup(api_key_id).await
    }
}

#[derive(Default)]
pub struct MemoryApiKeyStore {
    records: Mutex<HashMap<String, ApiKeyRecord>>,
    totp_codes: Mutex<HashMap<String, String>>,
}

impl MemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, api_key: impl Into<String>, record: ApiKeyRecord) {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Indexed by the opaque key and by id so session validation can
        // resolve identities.
        records.insert(api_key.into(), record.clone());
        records.insert(record.id.clone(), record);
    }

    pub fn set_totp_code(&self, api_key_id: impl Into<String>, code: impl Into<String>) {
        self.totp_codes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(api_key_id.into(), code.into());
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn lookup(&self, api_key: &str) -> Option<ApiKeyRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(api_key)
            .cloned()
    }

    async fn verify_totp(&self, api_key_id: &str, code: &str) -> bool {
        self.totp_codes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(api_key_id)
            .is_some_and(|expected| expected == code)
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, (Session, OffsetDateTime)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn random_token() -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut out = String::with_capacity(48);
        for _ in 0..48 {
            let nibble: u8 = rng.gen_range(0..16);
            out.push(char::from_digit(u32::from(nibble), 16).unwrap_or('0'));
        }
        out
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, api_key_id: &str, ttl: Duration) -> Session {
        let now = OffsetDateTime::now_utc();
        let expires = now + ttl;
        let token = Self::random_token();
        let session = Session {
            id: format!("sess-{}", &token[..12]),
            token: token.clone(),
            api_key_id: api_key_id.to_string(),
            created_at: super::storage::rfc3339(now),
            expires_at: super::storage::rfc3339(expires),
        };
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(token, (session.clone(), expires));
        session
    }

    async fn validate(&self, token: &str) -> Option<Session> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match sessions.get(token) {
            Some((session, expires)) if *expires > now => Some(session.clone()),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    async fn refresh(&self, token: &str, ttl: Duration) -> Option<Session> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (session, expires) = sessions.get_mut(token)?;
        if *expires <= now {
            sessions.remove(token);
            return None;
        }
        *expires = now + ttl;
        session.expires_at = super::storage::rfc3339(*expires);
        Some(session.clone())
    }

    async fn revoke(&self, token: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(token)
            .is_some()
    }

    async fn sessions_for(&self, api_key_id: &str) -> Vec<Session> {
        let now = OffsetDateTime::now_utc();
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|(session, expires)| session.api_key_id == api_key_id && *expires > now)
            .map(|(session, _)| session.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn gate() -> (IdentityGate, Arc<MemoryApiKeyStore>, Arc<MemorySessionStore>) {
        let api_keys = Arc::new(MemoryApiKeyStore::new());
        api_keys.insert(
            "sk-plain",
            ApiKeyRecord {
                id: "key-1".to_string(),
                user_name: "ada".to_string(),
                email: "ada@example.com".to_string(),
                two_fa_enabled: false,
            },
        );
        api_keys.insert(
            "sk-2fa",
            ApiKeyRecord {
                id: "key-2".to_string(),
                user_name: "grace".to_string(),
                email: "grace@example.com".to_string(),
                two_fa_enabled: true,
            },
        );
        api_keys.set_totp_code("key-2", "123456");
        let sessions = Arc::new(MemorySessionStore::new());
        (
            IdentityGate::new(api_keys.clone(), sessions.clone()),
            api_keys,
            sessions,
        )
    }

    #[tokio::test]
    async fn api_key_without_2fa_authenticates() {
        let (gate, _, _) = gate();
        let identity = gate
            .authenticate(&AuthHeaders {
                api_key: Some("sk-plain".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(identity.user_name, "ada");
        assert_eq!(identity.auth_method, AuthMethod::ApiKey);
        assert!(identity.session_id.is_none());
    }

    #[tokio::test]
    async fn totp_is_required_when_enrolled() {
        let (gate, _, _) = gate();
        let err = gate
            .authenticate(&AuthHeaders {
                api_key: Some("sk-2fa".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 401);

        let identity = gate
            .authenticate(&AuthHeaders {
                api_key: Some("sk-2fa".to_string()),
                totp_code: Some("123456".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(identity.user_name, "grace");

        let err = gate
            .authenticate(&AuthHeaders {
                api_key: Some("sk-2fa".to_string()),
                totp_code: Some("999999".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "authentication_required");
    }

    #[tokio::test]
    async fn session_token_takes_precedence() {
        let (gate, _, sessions) = gate();
        let session = sessions
            .create("key-1", Duration::from_secs(3600))
            .await;

        let identity = gate
            .authenticate(&AuthHeaders {
                session_token: Some(session.token.clone()),
                api_key: Some("sk-2fa".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(identity.auth_method, AuthMethod::SessionToken);
        assert_eq!(identity.api_key_id, "key-1");
        assert_eq!(identity.session_id.as_deref(), Some(session.id.as_str()));
    }

    #[tokio::test]
    async fn bearer_falls_back_to_api_key() {
        let (gate, _, _) = gate();
        let identity = gate
            .authenticate(&AuthHeaders {
                bearer: Some("sk-plain".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(identity.auth_method, AuthMethod::ApiKey);
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected_and_removed() {
        let (gate, _, sessions) = gate();
        let session = sessions.create("key-1", Duration::from_secs(0)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = gate
            .authenticate(&AuthHeaders {
                session_token: Some(session.token.clone()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 401);
        assert!(sessions.validate(&session.token).await.is_none());
    }

    #[tokio::test]
    async fn refresh_extends_and_logout_revokes() {
        let (_, _, sessions) = gate();
        let session = sessions.create("key-1", Duration::from_secs(60)).await;
        assert!(sessions
            .refresh(&session.token, Duration::from_secs(7200))
            .await
            .is_some());
        assert!(sessions.revoke(&session.token).await);
        assert!(!sessions.revoke(&session.token).await);
    }
}
