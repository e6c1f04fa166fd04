use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, SkybridgeError};

/// Top-level gateway configuration, loaded from YAML at startup. Reload
/// builds a fresh [`super::Registry`] from a new instance of this struct and
/// swaps it atomically; the config itself is never mutated in place.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub providers: Vec<ProviderInstance>,
    #[serde(default)]
    pub storage_instances: Vec<StorageInstance>,
    #[serde(default)]
    pub model_mappings: BTreeMap<String, ModelMapping>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl GatewayConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderInstance> {
        self.providers.iter().find(|instance| instance.id == id)
    }

    pub fn storage_route(&self, kind: StorageKind, route: &str) -> Option<&StorageInstance> {
        self.storage_instances
            .iter()
            .find(|instance| instance.kind == kind && instance.route == route)
    }

    /// Startup validation: unique ids, mapping targets that exist and are
    /// enabled, fallback lists free of the default and of duplicates.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for instance in &self.providers {
            if instance.id.trim().is_empty() {
                return Err(SkybridgeError::Config(
                    "provider instance id must be non-empty".to_string(),
                ));
            }
            if !seen.insert(instance.id.as_str()) {
                return Err(SkybridgeError::Config(format!(
                    "duplicate provider instance id {:?}",
                    instance.id
                )));
            }
        }

        let mut routes = std::collections::HashSet::new();
        for instance in &self.storage_instances {
            if !routes.insert((instance.kind, instance.route.as_str())) {
                return Err(SkybridgeError::Config(format!(
                    "duplicate storage route {:?} for kind {}",
                    instance.route, instance.kind
                )));
            }
            if instance.presign.max_ttl_secs == 0 {
                return Err(SkybridgeError::Config(format!(
                    "storage route {:?}: presign max_ttl_secs must be positive",
                    instance.route
                )));
            }
        }

        for (model, mapping) in &self.model_mappings {
            let default = self.provider(&mapping.default_instance).ok_or_else(|| {
                SkybridgeError::Config(format!(
                    "model {model:?}: default instance {:?} does not exist",
                    mapping.default_instance
                ))
            })?;
            if !default.enabled {
                return Err(SkybridgeError::Config(format!(
                    "model {model:?}: default instance {:?} is disabled",
                    mapping.default_instance
                )));
            }

            let mut chain = std::collections::HashSet::new();
            for fallback in &mapping.fallback_instances {
                if fallback == &mapping.default_instance {
                    return Err(SkybridgeError::Config(format!(
                        "model {model:?}: fallback list must exclude the default instance"
                    )));
                }
                if !chain.insert(fallback.as_str()) {
                    return Err(SkybridgeError::Config(format!(
                        "model {model:?}: fallback chain revisits instance {fallback:?}"
                    )));
                }
                let instance = self.provider(fallback).ok_or_else(|| {
                    SkybridgeError::Config(format!(
                        "model {model:?}: fallback instance {fallback:?} does not exist"
                    ))
                })?;
                if !instance.enabled {
                    return Err(SkybridgeError::Config(format!(
                        "model {model:?}: fallback instance {fallback:?} is disabled"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Bedrock,
    OpenAi,
    Azure,
    Anthropic,
    Vertex,
    Ibm,
    Oracle,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bedrock => "bedrock",
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
            Self::Vertex => "vertex",
            Self::Ibm => "ibm",
            Self::Oracle => "oracle",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceMode {
    #[default]
    Protocol,
    Transparent,
}

/// A named, pre-configured connection to one upstream. Immutable after
/// load; reload replaces the whole registry.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub mode: InstanceMode,
    #[serde(default = "default_strategies")]
    pub credential_strategies: Vec<CredentialStrategyKind>,
    /// Environment variable holding the static API key for this instance.
    /// Falls back to the cloud family's conventional variable when unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Vault logical path for the dynamic-secret strategy,
    /// e.g. `aws/creds/bedrock-invoke`.
    #[serde(default)]
    pub vault_path: Option<String>,
    /// Azure OpenAI deployment name. The router never parses this out of
    /// request paths; it comes exclusively from configuration.
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// GCP project (Vertex) or IBM watsonx project.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// OCI compartment for Oracle GenAI.
    #[serde(default)]
    pub compartment_id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Reject requests carrying parameters the target dialect cannot
    /// express instead of dropping them with a warning.
    #[serde(default)]
    pub strict_params: bool,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub default_params: BTreeMap<String, serde_json::Value>,
}

impl std::fmt::Debug for ProviderInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderInstance")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("mode", &self.mode)
            .field("credential_strategies", &self.credential_strategies)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStrategyKind {
    /// Platform-native workload identity (IRSA, AKS/GKE Workload Identity,
    /// OCI Resource Principal, IKS compute resource).
    WorkloadIdentity,
    /// Dynamic secret issued by Vault over HTTP.
    VaultSecret,
    /// Static material from mounted environment variables.
    StaticEnv,
}

fn default_strategies() -> Vec<CredentialStrategyKind> {
    vec![
        CredentialStrategyKind::WorkloadIdentity,
        CredentialStrategyKind::VaultSecret,
        CredentialStrategyKind::StaticEnv,
    ]
}

fn default_true() -> bool {
    true
}

fn default_max_in_flight() -> usize {
    100
}

/// Per-instance operation deadlines, seconds. Every stage is independently
/// overridable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_invoke_secs")]
    pub invoke_secs: u64,
    #[serde(default = "default_credential_refresh_secs")]
    pub credential_refresh_secs: u64,
    #[serde(default = "default_document_fetch_secs")]
    pub document_fetch_secs: u64,
    #[serde(default = "default_presign_secs")]
    pub presign_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            invoke_secs: default_invoke_secs(),
            credential_refresh_secs: default_credential_refresh_secs(),
            document_fetch_secs: default_document_fetch_secs(),
            presign_secs: default_presign_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn invoke(&self) -> Duration {
        Duration::from_secs(self.invoke_secs)
    }

    pub fn credential_refresh(&self) -> Duration {
        Duration::from_secs(self.credential_refresh_secs)
    }

    pub fn document_fetch(&self) -> Duration {
        Duration::from_secs(self.document_fetch_secs)
    }

    pub fn presign(&self) -> Duration {
        Duration::from_secs(self.presign_secs)
    }
}

fn default_invoke_secs() -> u64 {
    120
}

fn default_credential_refresh_secs() -> u64 {
    10
}

fn default_document_fetch_secs() -> u64 {
    30
}

fn default_presign_secs() -> u64 {
    5
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    S3,
    Azblob,
    Gcpblob,
    Ibmcos,
    Ociobj,
    Https,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Azblob => "azblob",
            Self::Gcpblob => "gcpblob",
            Self::Ibmcos => "ibmcos",
            Self::Ociobj => "ociobj",
            Self::Https => "https",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "s3" => Some(Self::S3),
            "azblob" => Some(Self::Azblob),
            "gcpblob" => Some(Self::Gcpblob),
            "ibmcos" => Some(Self::Ibmcos),
            "ociobj" => Some(Self::Ociobj),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageOp {
    Get,
    Put,
    Delete,
    List,
    Head,
    Presign,
}

impl StorageOp {
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "get" => Some(Self::Get),
            "put" => Some(Self::Put),
            "delete" => Some(Self::Delete),
            "list" => Some(Self::List),
            "head" => Some(Self::Head),
            "presign" => Some(Self::Presign),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Head => "head",
            Self::Presign => "presign",
        }
    }

    /// Only listing may omit the object key.
    pub fn requires_key(&self) -> bool {
        !matches!(self, Self::List)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageInstance {
    pub name: String,
    pub kind: StorageKind,
    /// Route label in the path grammar: `/-s3/{route}/…`.
    pub route: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Azure storage account name.
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default = "default_strategies")]
    pub credential_strategies: Vec<CredentialStrategyKind>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub vault_path: Option<String>,
    #[serde(default)]
    pub presign: PresignConfig,
    #[serde(default)]
    pub access: AccessControlConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl std::fmt::Debug for StorageInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageInstance")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("route", &self.route)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PresignConfig {
    #[serde(default = "default_presign_ttl")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_presign_max_ttl")]
    pub max_ttl_secs: u64,
}

impl Default for PresignConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_presign_ttl(),
            max_ttl_secs: default_presign_max_ttl(),
        }
    }
}

impl PresignConfig {
    /// Clamp a requested TTL to the instance maximum, defaulting when the
    /// caller did not ask for one.
    pub fn clamp_ttl(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_ttl_secs)
            .min(self.max_ttl_secs)
    }
}

fn default_presign_ttl() -> u64 {
    3600
}

fn default_presign_max_ttl() -> u64 {
    86_400
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessControlConfig {
    /// Empty allowlist admits every bucket.
    #[serde(default)]
    pub allowed_buckets: Vec<String>,
    #[serde(default = "default_denied_prefixes")]
    pub denied_prefixes: Vec<String>,
    /// Empty allowlist admits every operation.
    #[serde(default)]
    pub allowed_operations: Vec<StorageOp>,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            allowed_buckets: Vec::new(),
            denied_prefixes: default_denied_prefixes(),
            allowed_operations: Vec::new(),
        }
    }
}

fn default_denied_prefixes() -> Vec<String> {
    vec![
        "/secret/".to_string(),
        "/private/".to_string(),
        "/.".to_string(),
    ]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelMapping {
    pub default_instance: String,
    #[serde(default)]
    pub fallback_instances: Vec<String>,
    /// Per-instance remote model ids, keyed by instance id. Absent entries
    /// fall back to the canonical name (or the Bedrock id table).
    #[serde(default)]
    pub remote_model_ids: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> usize {
    2
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub auto_fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
providers:
  - id: bedrock_us1
    kind: bedrock
    region: us-east-1
  - id: openai_primary
    kind: openai
    credential_strategies: [static_env]
  - id: azure_backup
    kind: azure
    endpoint: https://example.openai.azure.com
    deployment: gpt-4
    api_version: 2024-02-01
storage_instances:
  - name: prod-s3
    kind: s3
    route: prod
    region: us-east-1
    presign:
      default_ttl_secs: 600
      max_ttl_secs: 3600
model_mappings:
  gpt-4:
    default_instance: openai_primary
    fallback_instances: [azure_backup]
  claude-3-sonnet:
    default_instance: bedrock_us1
routing:
  fallback:
    enabled: true
    max_attempts: 2
  features:
    auto_fallback: true
"#;

    #[test]
    fn parses_and_validates_sample() {
        let config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.providers.len(), 3);
        assert_eq!(config.provider("bedrock_us1").unwrap().kind, ProviderKind::Bedrock);
        assert!(config.routing.fallback.enabled);
        let storage = config.storage_route(StorageKind::S3, "prod").unwrap();
        assert_eq!(storage.presign.clamp_ttl(Some(7200)), 3600);
        assert_eq!(storage.presign.clamp_ttl(None), 600);
    }

    #[test]
    fn rejects_fallback_containing_default() {
        let mut config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
        config
            .model_mappings
            .get_mut("gpt-4")
            .unwrap()
            .fallback_instances
            .push("openai_primary".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_mapping_target() {
        let mut config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
        config.model_mappings.insert(
            "ghost".to_string(),
            ModelMapping {
                default_instance: "missing".to_string(),
                fallback_instances: Vec::new(),
                remote_model_ids: BTreeMap::new(),
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_fallback_entries() {
        let mut config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
        let mapping = config.model_mappings.get_mut("gpt-4").unwrap();
        mapping.fallback_instances.push("azure_backup".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn storage_op_key_rules() {
        assert!(!StorageOp::List.requires_key());
        for op in [
            StorageOp::Get,
            StorageOp::Put,
            StorageOp::Delete,
            StorageOp::Head,
            StorageOp::Presign,
        ] {
            assert!(op.requires_key());
        }
    }

    #[test]
    fn debug_redacts_sensitive_fields() {
        let config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
        let rendered = format!("{:?}", config.provider("openai_primary").unwrap());
        assert!(!rendered.contains("api_key_env"));
    }
}
