//! Azure OpenAI adapter.
//!
//! Same dialect as OpenAI, different addressing: chat requests are
//! rewritten onto the configured deployment with an `api-version` query.
//! The deployment id comes only from instance config, never from the
//! request path.

use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::config::{ProviderInstance, ProviderKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec, Credentials};
use crate::gateway::{GatewayError, ModelInfo, RequestEnvelope, ResponseEnvelope};

use super::{join_url, ByteStream, Dispatcher, ProviderAdapter};

const DEFAULT_API_VERSION: &str = "2024-02-01";

pub struct AzureAdapter {
    instance: Arc<ProviderInstance>,
    engine: Arc<CredentialEngine>,
    dispatcher: Dispatcher,
    spec: CredentialSpec,
}

impl AzureAdapter {
    pub fn new(instance: Arc<ProviderInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_provider(&instance);
        let dispatcher = Dispatcher::new("azure", instance.timeouts.invoke());
        Self {
            instance,
            engine,
            dispatcher,
            spec,
        }
    }

    fn endpoint(&self) -> Result<&str, GatewayError> {
        self.instance
            .endpoint
            .as_deref()
            .ok_or_else(|| GatewayError::internal("azure instance has no endpoint configured"))
    }

    fn api_version(&self) -> &str {
        self.instance
            .api_version
            .as_deref()
            .unwrap_or(DEFAULT_API_VERSION)
    }

    /// Protocol envelopes arrive addressed to `/chat/completions`; rewrite
    /// them onto the deployment. Transparent remainders pass through.
    fn rewrite(&self, envelope: &mut RequestEnvelope) -> Result<(), GatewayError> {
        if envelope.path == "/chat/completions" {
            let deployment = self.instance.deployment.as_deref().ok_or_else(|| {
                GatewayError::internal("azure instance has no deployment configured")
            })?;
            envelope.path = format!("/openai/deployments/{deployment}/chat/completions");
        }
        if !envelope
            .query
            .iter()
            .any(|(name, _)| name == "api-version")
        {
            envelope
                .query
                .push(("api-version".to_string(), self.api_version().to_string()));
        }
        Ok(())
    }

    async fn authorize(&self, envelope: &mut RequestEnvelope) -> Result<(), GatewayError> {
        match self.engine.credentials_for(&self.spec).await? {
            Credentials::AzureToken { jwt, .. } => {
                envelope
                    .headers
                    .insert("authorization".to_string(), format!("Bearer {jwt}"));
            }
            Credentials::StaticBearer { token, .. } => {
                envelope.headers.insert("api-key".to_string(), token);
            }
            other => {
                return Err(GatewayError::internal(format!(
                    "unexpected credential shape for azure: {other}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for AzureAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    fn instance_id(&self) -> &str {
        &self.instance.id
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        self.endpoint()?;
        self.engine.credentials_for(&self.spec).await.map(|_| ())
    }

    async fn invoke(&self, mut envelope: RequestEnvelope) -> Result<ResponseEnvelope, GatewayError> {
        self.rewrite(&mut envelope)?;
        self.authorize(&mut envelope).await?;
        let url = join_url(self.endpoint()?, &envelope.path);
        self.dispatcher.execute(&url, &envelope).await
    }

    async fn invoke_streaming(
        &self,
        mut envelope: RequestEnvelope,
    ) -> Result<ByteStream, GatewayError> {
        self.rewrite(&mut envelope)?;
        self.authorize(&mut envelope).await?;
        let url = join_url(self.endpoint()?, &envelope.path);
        self.dispatcher.execute_streaming(&url, &envelope).await
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        // Azure exposes whatever the deployment maps to; report that.
        let deployment = self.instance.deployment.clone().unwrap_or_default();
        if deployment.is_empty() {
            return Vec::new();
        }
        vec![ModelInfo {
            id: deployment.clone(),
            name: format!("Azure deployment {deployment}"),
            provider: "azure".to_string(),
            context_window: None,
            available: true,
        }]
    }
}
