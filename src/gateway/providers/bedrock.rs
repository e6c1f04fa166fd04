//! AWS Bedrock adapter: SigV4-signed dispatch to the runtime endpoint.

use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::config::{ProviderInstance, ProviderKind};
use crate::gateway::credentials::{CredentialEngine, CredentialSpec, SigV4Timestamp};
use crate::gateway::{GatewayError, ModelInfo, RequestEnvelope, ResponseEnvelope};

use super::{join_url, ByteStream, Dispatcher, ProviderAdapter};

const DEFAULT_REGION: &str = "us-east-1";
const SERVICE: &str = "bedrock";

pub struct BedrockAdapter {
    instance: Arc<ProviderInstance>,
    engine: Arc<CredentialEngine>,
    dispatcher: Dispatcher,
    spec: CredentialSpec,
}

impl BedrockAdapter {
    pub fn new(instance: Arc<ProviderInstance>, engine: Arc<CredentialEngine>) -> Self {
        let spec = CredentialSpec::for_provider(&instance);
        let dispatcher = Dispatcher::new("bedrock", instance.timeouts.invoke());
        Self {
            instance,
            engine,
            dispatcher,
            spec,
        }
    }

    fn region(&self) -> &str {
        self.instance.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    fn base_url(&self) -> String {
        match self.instance.endpoint.as_deref() {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.region()),
        }
    }

    /// Resolve signing keys and apply SigV4 headers in place.
    async fn sign(&self, url: &str, envelope: &mut RequestEnvelope) -> Result<(), GatewayError> {
        let credentials = self.engine.credentials_for(&self.spec).await?;
        let signer = credentials.sigv4_signer(self.region(), SERVICE)?;
        let signed = signer.sign(
            &envelope.method,
            url,
            &envelope.headers,
            &envelope.body,
            SigV4Timestamp::now()?,
        )?;
        signed.apply(&mut envelope.headers);
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bedrock
    }

    fn instance_id(&self) -> &str {
        &self.instance.id
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        // Healthy means we can mint signing material; the runtime endpoint
        // has no unauthenticated probe.
        self.engine.credentials_for(&self.spec).await.map(|_| ())
    }

    async fn invoke(&self, mut envelope: RequestEnvelope) -> Result<ResponseEnvelope, GatewayError> {
        let url = join_url(&self.base_url(), &envelope.path);
        self.sign(&url, &mut envelope).await?;
        self.dispatcher.execute(&url, &envelope).await
    }

    async fn invoke_streaming(
        &self,
        mut envelope: RequestEnvelope,
    ) -> Result<ByteStream, GatewayError> {
        envelope.headers.insert(
            "accept".to_string(),
            "application/vnd.amazon.eventstream".to_string(),
        );
        let url = join_url(&self.base_url(), &envelope.path);
        self.sign(&url, &mut envelope).await?;
        self.dispatcher.execute_streaming(&url, &envelope).await
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        let provider = "bedrock".to_string();
        let entry = |id: &str, name: &str, context_window: u32| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            provider: provider.clone(),
            context_window: Some(context_window),
            available: true,
        };
        vec![
            entry("claude-3-opus", "Claude 3 Opus", 200_000),
            entry("claude-3-sonnet", "Claude 3 Sonnet", 200_000),
            entry("claude-3-haiku", "Claude 3 Haiku", 200_000),
            entry("claude-3-5-sonnet", "Claude 3.5 Sonnet", 200_000),
            entry("amazon-titan-text-express", "Titan Text Express", 8_192),
            entry("amazon-titan-text-lite", "Titan Text Lite", 4_096),
            entry("llama2-13b", "Llama 2 13B Chat", 4_096),
            entry("llama2-70b", "Llama 2 70B Chat", 4_096),
            entry("mistral-7b", "Mistral 7B Instruct", 32_768),
            entry("mistral-8x7b", "Mixtral 8x7B", 32_768),
        ]
    }
}
