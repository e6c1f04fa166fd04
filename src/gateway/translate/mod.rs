//! Schema translation between the OpenAI dialect and backend-native shapes.
//!
//! Translators are pure functions: request conversion produces a
//! [`RequestEnvelope`], response conversion produces the pivot
//! [`ChatCompletionResponse`]. Nothing here talks to the network; the
//! handler picks a [`TranslationPlan`] and the adapters move bytes.

pub mod anthropic;
pub mod bedrock;
pub mod oracle;
pub mod vertex;

use bytes::Bytes;

use crate::openai::{ChatCompletionRequest, ChatCompletionResponse};

use super::config::{ProviderInstance, ProviderKind};
use super::{GatewayError, RequestEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    BedrockConverse,
    AnthropicMessages,
    VertexGemini,
    OracleGenai,
}

/// Derived per request from (mode, backend kind). Stateless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationPlan {
    pub request_from: Dialect,
    pub request_to: Dialect,
    pub response_from: Dialect,
    pub response_to: Dialect,
}

impl TranslationPlan {
    pub fn for_backend(kind: ProviderKind) -> Self {
        let backend = match kind {
            ProviderKind::Bedrock => Dialect::BedrockConverse,
            ProviderKind::Anthropic => Dialect::AnthropicMessages,
            ProviderKind::Vertex => Dialect::VertexGemini,
            ProviderKind::Oracle => Dialect::OracleGenai,
            ProviderKind::OpenAi | ProviderKind::Azure | ProviderKind::Ibm => Dialect::OpenAi,
        };
        Self {
            request_from: Dialect::OpenAi,
            request_to: backend,
            response_from: backend,
            response_to: Dialect::OpenAi,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.request_to == Dialect::OpenAi
    }
}

/// Apply the parameter policy before translating: parameters no backend
/// dialect can express are rejected under strict mode and logged otherwise.
pub fn enforce_parameter_policy(
    request: &ChatCompletionRequest,
    instance: &ProviderInstance,
) -> Result<(), GatewayError> {
    let plan = TranslationPlan::for_backend(instance.kind);
    if plan.is_passthrough() {
        return Ok(());
    }
    let dropped = request.unsupported_parameters();
    if dropped.is_empty() {
        return Ok(());
    }
    if instance.strict_params {
        return Err(GatewayError::invalid(format!(
            "parameters not supported by {}: {}",
            instance.kind,
            dropped.join(", ")
        )));
    }
    tracing::warn!(
        instance = %instance.id,
        backend = %instance.kind,
        dropped = dropped.join(","),
        "dropping parameters the backend dialect cannot express"
    );
    Ok(())
}

/// Convert the inbound request into the backend's native envelope.
/// `remote_model` is the model id the backend expects.
pub fn translate_request(
    plan: TranslationPlan,
    request: &ChatCompletionRequest,
    instance: &ProviderInstance,
    remote_model: &str,
) -> Result<RequestEnvelope, GatewayError> {
    match plan.request_to {
        Dialect::OpenAi => {
            let mut passthrough = request.clone();
            passthrough.model = remote_model.to_string();
            let body = serde_json::to_vec(&passthrough)
                .map_err(|err| GatewayError::translation(err.to_string()))?;
            Ok(RequestEnvelope::post_json(
                "/chat/completions",
                Bytes::from(body),
            ))
        }
        Dialect::BedrockConverse => bedrock::to_converse(request, remote_model),
        Dialect::AnthropicMessages => anthropic::to_messages(request, remote_model),
        Dialect::VertexGemini => vertex::to_generate_content(request, remote_model),
        Dialect::OracleGenai => oracle::to_chat(
            request,
            remote_model,
            instance.compartment_id.as_deref().unwrap_or_default(),
        ),
    }
}

/// Convert the backend response body back into the pivot dialect.
/// `created` is the request start time in Unix seconds; the zero timestamp
/// never reaches a caller.
pub fn translate_response(
    plan: TranslationPlan,
    body: &[u8],
    model: &str,
    completion_id: &str,
    created: i64,
) -> Result<Bytes, GatewayError> {
    let response: ChatCompletionResponse = match plan.response_from {
        Dialect::OpenAi => return Ok(Bytes::copy_from_slice(body)),
        Dialect::BedrockConverse => bedrock::response_to_openai(body, model, completion_id, created)?,
        Dialect::AnthropicMessages => {
            anthropic::response_to_openai(body, model, completion_id, created)?
        }
        Dialect::VertexGemini => vertex::response_to_openai(body, model, completion_id, created)?,
        Dialect::OracleGenai => oracle::response_to_openai(body, model, completion_id, created)?,
    };
    let body = serde_json::to_vec(&response)
        .map_err(|err| GatewayError::translation(err.to_string()))?;
    Ok(Bytes::from(body))
}

pub(crate) fn parse_backend_json<T: serde::de::DeserializeOwned>(
    body: &[u8],
    dialect: &str,
) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|err| {
        GatewayError::translation(format!("unparseable {dialect} response: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_pivot_through_openai() {
        let plan = TranslationPlan::for_backend(ProviderKind::Bedrock);
        assert_eq!(plan.request_from, Dialect::OpenAi);
        assert_eq!(plan.request_to, Dialect::BedrockConverse);
        assert_eq!(plan.response_to, Dialect::OpenAi);
        assert!(!plan.is_passthrough());

        for kind in [ProviderKind::OpenAi, ProviderKind::Azure, ProviderKind::Ibm] {
            assert!(TranslationPlan::for_backend(kind).is_passthrough());
        }
    }

    #[test]
    fn passthrough_response_is_untouched() {
        let plan = TranslationPlan::for_backend(ProviderKind::OpenAi);
        let body = br#"{"id":"x"}"#;
        let out = translate_response(plan, body, "gpt-4", "chatcmpl-1", 1).unwrap();
        assert_eq!(out.as_ref(), body);
    }
}
