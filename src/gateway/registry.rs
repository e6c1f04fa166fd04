//! Instance registry: the immutable runtime view of one loaded config.
//!
//! A request captures an `Arc<Registry>` snapshot at ingress and keeps it
//! for its whole lifetime; reload builds a new registry and swaps the
//! pointer, so in-flight requests never observe a half-applied config.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Semaphore;

use crate::Result;

use super::config::{GatewayConfig, ProviderInstance, ProviderKind, StorageInstance, StorageKind};
use super::model_router::ModelRouter;

pub struct Registry {
    providers: HashMap<String, Arc<ProviderInstance>>,
    /// Declaration order, used when pattern routing needs "the first
    /// enabled instance of a kind".
    provider_order: Vec<String>,
    storage: HashMap<(StorageKind, String), Arc<StorageInstance>>,
    model_router: ModelRouter,
    /// Per-instance in-flight caps. Shared with every snapshot holder so a
    /// reload does not reset the counters mid-request.
    limiters: HashMap<String, Arc<Semaphore>>,
}

impl Registry {
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut providers = HashMap::new();
        let mut provider_order = Vec::new();
        let mut limiters = HashMap::new();
        for instance in &config.providers {
            provider_order.push(instance.id.clone());
            limiters.insert(
                instance.id.clone(),
                Arc::new(Semaphore::new(instance.max_in_flight.max(1))),
            );
            providers.insert(instance.id.clone(), Arc::new(instance.clone()));
        }

        let mut storage = HashMap::new();
        for instance in &config.storage_instances {
            storage.insert(
                (instance.kind, instance.route.clone()),
                Arc::new(instance.clone()),
            );
        }

        let model_router = ModelRouter::new(config.model_mappings.clone(), config.routing.clone());

        Ok(Self {
            providers,
            provider_order,
            storage,
            model_router,
            limiters,
        })
    }

    pub fn provider(&self, id: &str) -> Option<Arc<ProviderInstance>> {
        self.providers.get(id).cloned()
    }

    pub fn providers_in_order(&self) -> impl Iterator<Item = Arc<ProviderInstance>> + '_ {
        self.provider_order
            .iter()
            .filter_map(|id| self.providers.get(id).cloned())
    }

    pub fn default_for_kind(&self, kind: ProviderKind) -> Option<Arc<ProviderInstance>> {
        self.providers_in_order()
            .find(|instance| instance.kind == kind && instance.enabled)
    }

    pub fn storage(&self, kind: StorageKind, route: &str) -> Option<Arc<StorageInstance>> {
        self.storage.get(&(kind, route.to_string())).cloned()
    }

    pub fn storage_instances(&self) -> impl Iterator<Item = Arc<StorageInstance>> + '_ {
        self.storage.values().cloned()
    }

    pub fn model_router(&self) -> &ModelRouter {
        &self.model_router
    }

    pub fn limiter(&self, instance_id: &str) -> Option<Arc<Semaphore>> {
        self.limiters.get(instance_id).cloned()
    }

    pub fn instance_ids(&self) -> impl Iterator<Item = &str> {
        self.provider_order.iter().map(String::as_str)
    }
}

/// Atomic pointer to the live registry.
pub struct RegistryHandle {
    inner: RwLock<Arc<Registry>>,
}

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn snapshot(&self) -> Arc<Registry> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a freshly built registry. Limiters for instances that
    /// survived the reload are carried over so in-flight permits stay
    /// accounted.
    pub fn replace(&self, mut registry: Registry) {
        {
            let current = self.snapshot();
            for (id, limiter) in &current.limiters {
                if let Some(slot) = registry.limiters.get_mut(id) {
                    *slot = limiter.clone();
                }
            }
        }
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
providers:
  - id: a
    kind: openai
  - id: b
    kind: openai
  - id: c
    kind: bedrock
    region: us-west-2
    enabled: false
storage_instances:
  - name: prod-s3
    kind: s3
    route: prod
"#;

    fn registry() -> Registry {
        let config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
        Registry::from_config(&config).unwrap()
    }

    #[test]
    fn first_enabled_instance_of_kind_wins() {
        let registry = registry();
        assert_eq!(
            registry.default_for_kind(ProviderKind::OpenAi).unwrap().id,
            "a"
        );
        assert!(registry.default_for_kind(ProviderKind::Bedrock).is_none());
    }

    #[test]
    fn snapshot_survives_replace() {
        let handle = RegistryHandle::new(registry());
        let before = handle.snapshot();

        let replacement = GatewayConfig::from_yaml_str(
            "providers:\n  - id: only\n    kind: anthropic\n",
        )
        .unwrap();
        handle.replace(Registry::from_config(&replacement).unwrap());

        assert!(before.provider("a").is_some());
        let after = handle.snapshot();
        assert!(after.provider("a").is_none());
        assert!(after.provider("only").is_some());
    }

    #[test]
    fn limiters_carry_over_on_reload() {
        let handle = RegistryHandle::new(registry());
        let limiter_before = handle.snapshot().limiter("a").unwrap();
        let permit = limiter_before.clone().try_acquire_owned().unwrap();

        let config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
        handle.replace(Registry::from_config(&config).unwrap());

        let limiter_after = handle.snapshot().limiter("a").unwrap();
        assert!(Arc::ptr_eq(&limiter_before, &limiter_after));
        drop(permit);
    }
}
