//! Backend adapters.
//!
//! One adapter per provider kind, all implementing the same capability
//! set. Adapters build final URLs, attach credentials, and classify
//! upstream failures; schema translation happens before the envelope
//! reaches them.

pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod ibm;
pub mod openai;
pub mod oracle;
pub mod vertex;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use super::config::{ProviderInstance, ProviderKind};
use super::credentials::CredentialEngine;
use super::{GatewayError, ModelInfo, RequestEnvelope, ResponseEnvelope};

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn instance_id(&self) -> &str;

    async fn health_check(&self) -> Result<(), GatewayError>;
    async fn invoke(&self, envelope: RequestEnvelope) -> Result<ResponseEnvelope, GatewayError>;
    async fn invoke_streaming(&self, envelope: RequestEnvelope)
        -> Result<ByteStream, GatewayError>;
    async fn list_models(&self) -> Vec<ModelInfo>;

    async fn get_model_info(&self, model: &str) -> Option<ModelInfo> {
        self.list_models()
            .await
            .into_iter()
            .find(|info| info.id == model)
    }
}

/// Construct the adapter for an instance. Tests swap these out through
/// [`super::http::GatewayState::with_adapter`].
pub fn build_adapter(
    instance: Arc<ProviderInstance>,
    engine: Arc<CredentialEngine>,
) -> Arc<dyn ProviderAdapter> {
    match instance.kind {
        ProviderKind::Bedrock => Arc::new(bedrock::BedrockAdapter::new(instance, engine)),
        ProviderKind::OpenAi => Arc::new(openai::OpenAiAdapter::new(instance, engine)),
        ProviderKind::Azure => Arc::new(azure::AzureAdapter::new(instance, engine)),
        ProviderKind::Anthropic => Arc::new(anthropic::AnthropicAdapter::new(instance, engine)),
        ProviderKind::Vertex => Arc::new(vertex::VertexAdapter::new(instance, engine)),
        ProviderKind::Ibm => Arc::new(ibm::IbmAdapter::new(instance, engine)),
        ProviderKind::Oracle => Arc::new(oracle::OracleAdapter::new(instance, engine)),
    }
}

/// Shared HTTP execution with the common failure classification: 429 maps
/// to `RateLimited`, other non-success statuses to `Upstream`, transport
/// timeouts to `Timeout`.
pub(crate) struct Dispatcher {
    client: reqwest::Client,
    provider: &'static str,
    timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(provider: &'static str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider,
            timeout,
        }
    }

    fn request(
        &self,
        url: &str,
        envelope: &RequestEnvelope,
    ) -> Result<reqwest::RequestBuilder, GatewayError> {
        let method: reqwest::Method = envelope
            .method
            .parse()
            .map_err(|_| GatewayError::invalid(format!("bad method {:?}", envelope.method)))?;
        let mut builder = self
            .client
            .request(method, url)
            .timeout(self.timeout)
            .body(envelope.body.clone());
        for (name, value) in &envelope.headers {
            builder = builder.header(name, value);
        }
        if !envelope.query.is_empty() {
            builder = builder.query(&envelope.query);
        }
        Ok(builder)
    }

    pub(crate) async fn execute(
        &self,
        url: &str,
        envelope: &RequestEnvelope,
    ) -> Result<ResponseEnvelope, GatewayError> {
        let response = self
            .request(url, envelope)?
            .send()
            .await
            .map_err(|err| self.classify_transport(err))?;

        let status = response.status();
        let headers = copy_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| self.classify_transport(err))?;

        if status.as_u16() == 429 {
            return Err(GatewayError::RateLimited {
                scope: format!("upstream:{}", self.provider),
            });
        }
        if !status.is_success() {
            return Err(GatewayError::Upstream {
                provider: self.provider.to_string(),
                upstream_status: Some(status.as_u16()),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(ResponseEnvelope {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    pub(crate) async fn execute_streaming(
        &self,
        url: &str,
        envelope: &RequestEnvelope,
    ) -> Result<ByteStream, GatewayError> {
        let response = self
            .request(url, envelope)?
            .send()
            .await
            .map_err(|err| self.classify_transport(err))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GatewayError::RateLimited {
                scope: format!("upstream:{}", self.provider),
            });
        }
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                provider: self.provider.to_string(),
                upstream_status: Some(status.as_u16()),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        Ok(stream)
    }

    fn classify_transport(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout {
                operation: format!("upstream invoke ({})", self.provider),
            }
        } else {
            GatewayError::Upstream {
                provider: self.provider.to_string(),
                upstream_status: None,
                message: err.to_string(),
            }
        }
    }
}

pub(crate) fn copy_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.insert(name.as_str().to_string(), value.to_string());
        }
    }
    out
}

/// Join a base URL and an envelope path, tolerating slashes on either side.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("https://a/", "/b/c"), "https://a/b/c");
        assert_eq!(join_url("https://a", "b"), "https://a/b");
    }
}
