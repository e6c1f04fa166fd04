//! Google Vertex AI adapter: bearer tokens from workload identity, URLs
//! scoped to the configured project and location.

use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::config::{ProviderInstance, ProviderKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec};
use crate::gateway::{GatewayError, ModelInfo, RequestEnvelope, ResponseEnvelope};

use super::{join_url, ByteStream, Dispatcher, ProviderAdapter};

const DEFAULT_LOCATION: &str = "us-central1";

pub struct VertexAdapter {
    instance: Arc<ProviderInstance>,
    engine: Arc<CredentialEngine>,
    dispatcher: Dispatcher,
    spec: CredentialSpec,
}

impl VertexAdapter {
    pub fn new(instance: Arc<ProviderInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_provider(&instance);
        let dispatcher = Dispatcher::new("vertex", instance.timeouts.invoke());
        Self {
            instance,
            engine,
            dispatcher,
            spec,
        }
    }

    fn location(&self) -> &str {
        self.instance
            .location
            .as_deref()
            .unwrap_or(DEFAULT_LOCATION)
    }

    fn base_url(&self) -> Result<String, GatewayError> {
        if let Some(endpoint) = self.instance.endpoint.as_deref() {
            return Ok(endpoint.trim_end_matches('/').to_string());
        }
        let project = self
            .instance
            .project_id
            .as_deref()
            .ok_or_else(|| GatewayError::internal("vertex instance has no project_id"))?;
        let location = self.location();
        Ok(format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}"
        ))
    }

    async fn authorize(&self, envelope: &mut RequestEnvelope) -> Result<(), GatewayError> {
        let credentials = self.engine.credentials_for(&self.spec).await?;
        let token = credentials
            .bearer_token()
            .ok_or_else(|| GatewayError::internal("vertex credentials missing bearer token"))?;
        envelope
            .headers
            .insert("authorization".to_string(), format!("Bearer {token}"));
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for VertexAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Vertex
    }

    fn instance_id(&self) -> &str {
        &self.instance.id
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        self.base_url()?;
        self.engine.credentials_for(&self.spec).await.map(|_| ())
    }

    async fn invoke(&self, mut envelope: RequestEnvelope) -> Result<ResponseEnvelope, GatewayError> {
        self.authorize(&mut envelope).await?;
        let url = join_url(&self.base_url()?, &envelope.path);
        self.dispatcher.execute(&url, &envelope).await
    }

    async fn invoke_streaming(
        &self,
        mut envelope: RequestEnvelope,
    ) -> Result<ByteStream, GatewayError> {
        self.authorize(&mut envelope).await?;
        let url = join_url(&self.base_url()?, &envelope.path);
        self.dispatcher.execute_streaming(&url, &envelope).await
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        let entry = |id: &str, name: &str, context_window: u32| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            provider: "vertex".to_string(),
            context_window: Some(context_window),
            available: true,
        };
        vec![
            entry("gemini-1.5-pro", "Gemini 1.5 Pro", 1_000_000),
            entry("gemini-1.5-flash", "Gemini 1.5 Flash", 1_000_000),
            entry("gemini-1.0-pro", "Gemini 1.0 Pro", 32_760),
            entry("text-bison", "PaLM 2 Text Bison", 8_192),
            entry("chat-bison", "PaLM 2 Chat Bison", 8_192),
        ]
    }
}
