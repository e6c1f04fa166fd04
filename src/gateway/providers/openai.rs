//! OpenAI adapter: bearer-token passthrough, no schema translation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::config::{ProviderInstance, ProviderKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec};
use crate::gateway::{GatewayError, ModelInfo, RequestEnvelope, ResponseEnvelope};

use super::{join_url, ByteStream, Dispatcher, ProviderAdapter};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    instance: Arc<ProviderInstance>,
    engine: Arc<CredentialEngine>,
    dispatcher: Dispatcher,
    spec: CredentialSpec,
}

impl OpenAiAdapter {
    pub fn new(instance: Arc<ProviderInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_provider(&instance);
        let dispatcher = Dispatcher::new("openai", instance.timeouts.invoke());
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
            .ok_or_else(|| GatewayError::internal("openai credentials missing bearer token"))?;
        envelope
            .headers
            .insert("authorization".to_string(), format!("Bearer {token}"));
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn instance_id(&self) -> &str {
        &self.instance.id
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        let mut envelope = RequestEnvelope {
            method: "GET".to_string(),
            path: "/models".to_string(),
            ..Default::default()
        };
        self.authorize(&mut envelope).await?;
        let url = join_url(self.base_url(), &envelope.path);
        self.dispatcher.execute(&url, &envelope).await.map(|_| ())
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
        let entry = |id: &str, name: &str, context_window: u32| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            provider: "openai".to_string(),
            context_window: Some(context_window),
            available: true,
        };
        vec![
            entry("gpt-4", "GPT-4", 8_192),
            entry("gpt-4-turbo", "GPT-4 Turbo", 128_000),
            entry("gpt-4o", "GPT-4o", 128_000),
            entry("gpt-4o-mini", "GPT-4o mini", 128_000),
            entry("gpt-3.5-turbo", "GPT-3.5 Turbo", 16_385),
        ]
    }
}
