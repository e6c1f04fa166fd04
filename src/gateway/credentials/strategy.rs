//! Individual credential strategies.
//!
//! Each strategy either produces `(credentials, expiry)` or an error; the
//! engine owns ordering, caching, and fallback. Network exchanges go
//! through the engine's shared HTTP client and inherit the per-instance
//! refresh timeout.

use serde::Deserialize;
use time::OffsetDateTime;

use crate::gateway::config::CredentialStrategyKind;
use crate::gateway::xml::XmlDocument;
use crate::gateway::GatewayError;

use super::{CloudFamily, CredentialEngine, CredentialSpec, Credentials};

#[derive(Debug, Deserialize)]
struct OauthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VaultResponse {
    #[serde(default)]
    lease_duration: Option<u64>,
    data: serde_json::Map<String, serde_json::Value>,
}

impl CredentialEngine {
    pub(super) async fn run_strategy(
        &self,
        kind: CredentialStrategyKind,
        spec: &CredentialSpec,
    ) -> Result<Credentials, GatewayError> {
        match kind {
            CredentialStrategyKind::WorkloadIdentity => self.workload_identity(spec).await,
            CredentialStrategyKind::VaultSecret => self.vault_secret(spec).await,
            CredentialStrategyKind::StaticEnv => self.static_env(spec),
        }
    }

    async fn workload_identity(&self, spec: &CredentialSpec) -> Result<Credentials, GatewayError> {
        match spec.family {
            CloudFamily::Aws => self.aws_web_identity(spec).await,
            CloudFamily::Azure => self.azure_federated_token(spec).await,
            CloudFamily::Gcp => self.gcp_metadata_token().await,
            CloudFamily::Oracle => oracle_resource_principal(),
            CloudFamily::Ibm => self.ibm_compute_resource_token().await,
            CloudFamily::ApiKeyOnly => Err(GatewayError::internal(
                "backend has no native workload identity",
            )),
        }
    }

    /// IRSA: exchange the projected service-account token for STS keys.
    async fn aws_web_identity(&self, spec: &CredentialSpec) -> Result<Credentials, GatewayError> {
        let token_file = require_env("AWS_WEB_IDENTITY_TOKEN_FILE")?;
        let role_arn = require_env("AWS_ROLE_ARN")?;
        let token = tokio::fs::read_to_string(&token_file)
            .await
            .map_err(|err| {
                GatewayError::internal(format!("read web identity token {token_file:?}: {err}"))
            })?;

        let endpoint = match spec.region.as_deref() {
            Some(region) => format!("https://sts.{region}.amazonaws.com/"),
            None => "https://sts.amazonaws.com/".to_string(),
        };
        let response = self
            .http()
            .post(&endpoint)
            .form(&[
                ("Action", "AssumeRoleWithWebIdentity"),
                ("Version", "2011-06-15"),
                ("RoleArn", role_arn.as_str()),
                ("RoleSessionName", "skybridge-gateway"),
                ("WebIdentityToken", token.trim()),
            ])
            .send()
            .await
            .map_err(|err| GatewayError::internal(format!("sts exchange: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| GatewayError::internal(format!("sts body: {err}")))?;
        if !status.is_success() {
            return Err(GatewayError::internal(format!(
                "sts returned {status}: {body}"
            )));
        }

        let document = XmlDocument::parse(&body, &[]);
        let access_key = document
            .scalar("AccessKeyId")
            .ok_or_else(|| GatewayError::internal("sts response missing AccessKeyId"))?;
        let secret_key = document
            .scalar("SecretAccessKey")
            .ok_or_else(|| GatewayError::internal("sts response missing SecretAccessKey"))?;
        let session_token = document.scalar("SessionToken").map(str::to_string);
        let expiry = document
            .scalar("Expiration")
            .and_then(parse_rfc3339)
            .ok_or_else(|| GatewayError::internal("sts response missing Expiration"))?;

        Ok(Credentials::AwsSigningKeys {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            session_token,
            expiry,
        })
    }

    /// AKS workload identity: federated token → Entra bearer token.
    async fn azure_federated_token(
        &self,
        spec: &CredentialSpec,
    ) -> Result<Credentials, GatewayError> {
        let token_file = require_env("AZURE_FEDERATED_TOKEN_FILE")?;
        let client_id = require_env("AZURE_CLIENT_ID")?;
        let tenant_id = require_env("AZURE_TENANT_ID")?;
        let assertion = tokio::fs::read_to_string(&token_file)
            .await
            .map_err(|err| {
                GatewayError::internal(format!("read federated token {token_file:?}: {err}"))
            })?;

        let endpoint =
            format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token");
        let response = self
            .http()
            .post(&endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("scope", spec.azure_scope),
                (
                    "client_assertion_type",
                    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
                ),
                ("client_assertion", assertion.trim()),
            ])
            .send()
            .await
            .map_err(|err| GatewayError::internal(format!("entra exchange: {err}")))?;
        let token: OauthTokenResponse = decode_oauth_response(response, "entra").await?;

        Ok(Credentials::AzureToken {
            jwt: token.access_token,
            expiry: expiry_from_expires_in(token.expires_in),
        })
    }

    /// GKE: the metadata server hands out tokens for the bound service
    /// account directly.
    async fn gcp_metadata_token(&self) -> Result<Credentials, GatewayError> {
        let host = std::env::var("GCE_METADATA_HOST")
            .unwrap_or_else(|_| "metadata.google.internal".to_string());
        let endpoint = format!(
            "http://{host}/computeMetadata/v1/instance/service-accounts/default/token"
        );
        let response = self
            .http()
            .get(&endpoint)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|err| GatewayError::internal(format!("gce metadata: {err}")))?;
        let token: OauthTokenResponse = decode_oauth_response(response, "gce metadata").await?;

        Ok(Credentials::GcpToken {
            jwt: token.access_token,
            expiry: expiry_from_expires_in(token.expires_in),
        })
    }

    /// IKS compute resource identity: cr-token → IAM access token.
    async fn ibm_compute_resource_token(&self) -> Result<Credentials, GatewayError> {
        let token_file = require_env("IBM_CR_TOKEN_FILE")?;
        let cr_token = tokio::fs::read_to_string(&token_file)
            .await
            .map_err(|err| GatewayError::internal(format!("read cr token {token_file:?}: {err}")))?;

        let mut form = vec![
            (
                "grant_type".to_string(),
                "urn:ibm:params:oauth:grant-type:cr-token".to_string(),
            ),
            ("cr_token".to_string(), cr_token.trim().to_string()),
        ];
        if let Ok(profile) = std::env::var("IBM_TRUSTED_PROFILE_ID") {
            form.push(("profile_id".to_string(), profile));
        }

        let response = self
            .http()
            .post("https://iam.cloud.ibm.com/identity/token")
            .form(&form)
            .send()
            .await
            .map_err(|err| GatewayError::internal(format!("ibm iam exchange: {err}")))?;
        let token: OauthTokenResponse = decode_oauth_response(response, "ibm iam").await?;

        Ok(Credentials::StaticBearer {
            token: token.access_token,
            expiry: expiry_from_expires_in(token.expires_in),
        })
    }

    /// Vault dynamic secret: one HTTP read per refresh, lease duration
    /// becomes the expiry.
    async fn vault_secret(&self, spec: &CredentialSpec) -> Result<Credentials, GatewayError> {
        let addr = require_env("VAULT_ADDR")?;
        let vault_token = require_env("VAULT_TOKEN")?;
        let path = spec
            .vault_path
            .as_deref()
            .ok_or_else(|| GatewayError::internal("instance has no vault_path configured"))?;

        let endpoint = format!("{}/v1/{}", addr.trim_end_matches('/'), path);
        let response = self
            .http()
            .get(&endpoint)
            .header("X-Vault-Token", vault_token)
            .send()
            .await
            .map_err(|err| GatewayError::internal(format!("vault read: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::internal(format!("vault returned {status}")));
        }
        let parsed: VaultResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::internal(format!("vault body: {err}")))?;

        let expiry = expiry_from_expires_in(parsed.lease_duration);
        let field = |name: &str| {
            parsed
                .data
                .get(name)
                .and_then(|value| value.as_str())
                .map(str::to_string)
        };

        match spec.family {
            CloudFamily::Aws => {
                let access_key = field("access_key")
                    .ok_or_else(|| GatewayError::internal("vault data missing access_key"))?;
                let secret_key = field("secret_key")
                    .ok_or_else(|| GatewayError::internal("vault data missing secret_key"))?;
                Ok(Credentials::AwsSigningKeys {
                    access_key,
                    secret_key,
                    session_token: field("security_token"),
                    expiry,
                })
            }
            _ => {
                let token = field("api_key")
                    .or_else(|| field("token"))
                    .ok_or_else(|| GatewayError::internal("vault data missing api_key/token"))?;
                Ok(Credentials::StaticBearer { token, expiry })
            }
        }
    }

    /// Static mounted material, re-read on every refresh cycle.
    fn static_env(&self, spec: &CredentialSpec) -> Result<Credentials, GatewayError> {
        let expiry = OffsetDateTime::now_utc() + Self::static_lifetime();

        if spec.family == CloudFamily::Aws {
            let access_key = require_env("AWS_ACCESS_KEY_ID")?;
            let secret_key = require_env("AWS_SECRET_ACCESS_KEY")?;
            let session_token = std::env::var("AWS_SESSION_TOKEN")
                .ok()
                .filter(|value| !value.is_empty());
            return Ok(Credentials::AwsSigningKeys {
                access_key,
                secret_key,
                session_token,
                expiry,
            });
        }

        let mut candidates: Vec<&str> = Vec::new();
        if let Some(name) = spec.api_key_env.as_deref() {
            candidates.push(name);
        }
        candidates.extend(spec.fallback_envs.iter().copied());

        for name in &candidates {
            if let Ok(value) = std::env::var(name) {
                if !value.is_empty() {
                    return Ok(Credentials::StaticBearer {
                        token: value,
                        expiry,
                    });
                }
            }
        }
        Err(GatewayError::internal(format!(
            "no static credentials (tried: {})",
            candidates.join(", ")
        )))
    }
}

/// OKE resource principal: the RPST is already the credential; only its
/// expiry needs extracting from the JWT.
fn oracle_resource_principal() -> Result<Credentials, GatewayError> {
    let rpst = require_env("OCI_RESOURCE_PRINCIPAL_RPST")?;
    let token = if rpst.starts_with('/') {
        std::fs::read_to_string(&rpst)
            .map_err(|err| GatewayError::internal(format!("read rpst {rpst:?}: {err}")))?
            .trim()
            .to_string()
    } else {
        rpst
    };

    let expiry = jwt_expiry(&token)
        .unwrap_or_else(|| OffsetDateTime::now_utc() + time::Duration::minutes(15));
    Ok(Credentials::OracleResourcePrincipal { token, expiry })
}

async fn decode_oauth_response(
    response: reqwest::Response,
    label: &str,
) -> Result<OauthTokenResponse, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::internal(format!(
            "{label} returned {status}: {body}"
        )));
    }
    response
        .json()
        .await
        .map_err(|err| GatewayError::internal(format!("{label} body: {err}")))
}

fn require_env(name: &str) -> Result<String, GatewayError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GatewayError::internal(format!("{name} is not set")))
}

fn expiry_from_expires_in(expires_in: Option<u64>) -> OffsetDateTime {
    let seconds = expires_in.unwrap_or(900);
    OffsetDateTime::now_utc() + time::Duration::seconds(seconds as i64)
}

fn parse_rfc3339(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339).ok()
}

/// Expiry from a JWT's `exp` claim, without verifying the signature (the
/// issuer is trusted; only the deadline matters here).
fn jwt_expiry(token: &str) -> Option<OffsetDateTime> {
    use base64::Engine as _;

    let payload = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    OffsetDateTime::from_unix_timestamp(exp).ok()
}
