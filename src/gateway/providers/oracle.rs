//! Oracle Cloud Generative AI adapter: bearer auth with either a resource
//! principal token or a static key.

use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::config::{ProviderInstance, ProviderKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec};
use crate::gateway::{GatewayError, ModelInfo, RequestEnvelope, ResponseEnvelope};

use super::{join_url, ByteStream, Dispatcher, ProviderAdapter};

pub struct OracleAdapter {
    instance: Arc<ProviderInstance>,
    engine: Arc<CredentialEngine>,
    dispatcher: Dispatcher,
    spec: CredentialSpec,
}

impl OracleAdapter {
    pub fn new(instance: Arc<ProviderInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_provider(&instance);
        let dispatcher = Dispatcher::new("oracle", instance.timeouts.invoke());
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
            .ok_or_else(|| GatewayError::internal("oracle instance has no endpoint configured"))
    }

    async fn authorize(&self, envelope: &mut RequestEnvelope) -> Result<(), GatewayError> {
        let credentials = self.engine.credentials_for(&self.spec).await?;
        let token = credentials
            .bearer_token()
            .ok_or_else(|| GatewayError::internal("oracle credentials missing token"))?;
        envelope
            .headers
            .insert("authorization".to_string(), format!("Bearer {token}"));
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for OracleAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Oracle
    }

    fn instance_id(&self) -> &str {
        &self.instance.id
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        self.endpoint()?;
        self.engine.credentials_for(&self.spec).await.map(|_| ())
    }

    async fn invoke(&self, mut envelope: RequestEnvelope) -> Result<ResponseEnvelope, GatewayError> {
        self.authorize(&mut envelope).await?;
        let url = join_url(self.endpoint()?, &envelope.path);
        self.dispatcher.execute(&url, &envelope).await
    }

    async fn invoke_streaming(
        &self,
        _envelope: RequestEnvelope,
    ) -> Result<ByteStream, GatewayError> {
        Err(GatewayError::Upstream {
            provider: "oracle".to_string(),
            upstream_status: Some(501),
            message: "streaming is not supported by the oracle adapter".to_string(),
        })
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        let entry = |id: &str, name: &str| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            provider: "oracle".to_string(),
            context_window: Some(128_000),
            available: true,
        };
        vec![
            entry("cohere.command-r-plus", "Cohere Command R Plus"),
            entry("cohere.command-r-16k", "Cohere Command R 16K"),
            entry("meta.llama-3-70b-instruct", "Meta Llama 3 70B Instruct"),
        ]
    }
}
