//! IBM watsonx.ai adapter.
//!
//! The chat surface is OpenAI-shaped, so requests pass through with the
//! watsonx path, a pinned `version` query, and the project id injected
//! into the body when the caller left it out.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::gateway::config::{ProviderInstance, ProviderKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec};
use crate::gateway::{GatewayError, ModelInfo, RequestEnvelope, ResponseEnvelope};

use super::{join_url, ByteStream, Dispatcher, ProviderAdapter};

const API_VERSION: &str = "2024-05-31";

pub struct IbmAdapter {
    instance: Arc<ProviderInstance>,
    engine: Arc<CredentialEngine>,
    dispatcher: Dispatcher,
    spec: CredentialSpec,
}

impl IbmAdapter {
    pub fn new(instance: Arc<ProviderInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_provider(&instance);
        let dispatcher = Dispatcher::new("ibm", instance.timeouts.invoke());
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
            .ok_or_else(|| GatewayError::internal("ibm instance has no endpoint configured"))
    }

    fn rewrite(&self, envelope: &mut RequestEnvelope) -> Result<(), GatewayError> {
        if envelope.path == "/chat/completions" {
            envelope.path = "/ml/v1/text/chat".to_string();
        }
        if !envelope.query.iter().any(|(name, _)| name == "version") {
            envelope
                .query
                .push(("version".to_string(), API_VERSION.to_string()));
        }
        if let Some(project_id) = self.instance.project_id.as_deref() {
            if let Ok(mut body) = serde_json::from_slice::<serde_json::Value>(&envelope.body) {
                if body.is_object() && body.get("project_id").is_none() {
                    body["project_id"] = serde_json::Value::String(project_id.to_string());
                    let raw = serde_json::to_vec(&body)
                        .map_err(|err| GatewayError::internal(err.to_string()))?;
                    envelope.body = Bytes::from(raw);
                }
            }
        }
        Ok(())
    }

    async fn authorize(&self, envelope: &mut RequestEnvelope) -> Result<(), GatewayError> {
        let credentials = self.engine.credentials_for(&self.spec).await?;
        let token = credentials
            .bearer_token()
            .ok_or_else(|| GatewayError::internal("ibm credentials missing bearer token"))?;
        envelope
            .headers
            .insert("authorization".to_string(), format!("Bearer {token}"));
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for IbmAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ibm
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
        let entry = |id: &str, name: &str| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            provider: "ibm".to_string(),
            context_window: Some(8_192),
            available: true,
        };
        vec![
            entry("ibm/granite-13b-chat-v2", "Granite 13B Chat v2"),
            entry("ibm/granite-20b-multilingual", "Granite 20B Multilingual"),
        ]
    }
}
