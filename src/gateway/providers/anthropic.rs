//! Anthropic Messages adapter: `x-api-key` auth plus the pinned API
//! version header.

use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::config::{ProviderInstance, ProviderKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec};
use crate::gateway::{GatewayError, ModelInfo, RequestEnvelope, ResponseEnvelope};

use super::{join_url, ByteStream, Dispatcher, ProviderAdapter};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    instance: Arc<ProviderInstance>,
    engine: Arc<CredentialEngine>,
    dispatcher: Dispatcher,
    spec: CredentialSpec,
}

impl AnthropicAdapter {
    pub fn new(instance: Arc<ProviderInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_provider(&instance);
        let dispatcher = Dispatcher::new("anthropic", instance.timeouts.invoke());
        Self {
            instance,
            engine,
            dispatcher,
            spec,
        }
    }

    fn base_url(&self) -> &str {
        self.instance
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
    }

    async fn authorize(&self, envelope: &mut RequestEnvelope) -> Result<(), GatewayError> {
        let credentials = self.engine.credentials_for(&self.spec).await?;
        let token = credentials
            .bearer_token()
            .ok_or_else(|| GatewayError::internal("anthropic credentials missing api key"))?;
        envelope
            .headers
            .insert("x-api-key".to_string(), token.to_string());
        envelope
            .headers
            .insert("anthropic-version".to_string(), API_VERSION.to_string());
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn instance_id(&self) -> &str {
        &self.instance.id
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        self.engine.credentials_for(&self.spec).await.map(|_| ())
    }

    async fn invoke(&self, mut envelope: RequestEnvelope) -> Result<ResponseEnvelope, GatewayError> {
        self.authorize(&mut envelope).await?;
        let url = join_url(self.base_url(), &envelope.path);
        self.dispatcher.execute(&url, &envelope).await
    }

    async fn invoke_streaming(
        &self,
        mut envelope: RequestEnvelope,
    ) -> Result<ByteStream, GatewayError> {
        self.authorize(&mut envelope).await?;
        let url = join_url(self.base_url(), &envelope.path);
        self.dispatcher.execute_streaming(&url, &envelope).await
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        let entry = |id: &str, name: &str| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            provider: "anthropic".to_string(),
            context_window: Some(200_000),
            available: true,
        };
        vec![
            entry("claude-3-opus-20240229", "Claude 3 Opus"),
            entry("claude-3-sonnet-20240229", "Claude 3 Sonnet"),
            entry("claude-3-haiku-20240307", "Claude 3 Haiku"),
            entry("claude-3-5-sonnet-20240620", "Claude 3.5 Sonnet"),
        ]
    }
}
