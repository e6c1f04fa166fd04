//! Path classifier: the first routing decision for every request.
//!
//! Grammar:
//! - storage:     `/-{type}/{route}/{op}/{bucket}[/{key…}]`
//! - transparent: `/transparent/{instance}/{passthrough…}`
//! - protocol:    `/{protocol}/{instance}/{endpoint…}` (OpenAI-style default)

use super::config::{StorageKind, StorageOp};
use super::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Storage {
        kind: StorageKind,
        route: String,
        op: StorageOp,
        bucket: String,
        key: String,
    },
    TransparentAi {
        instance: String,
        remainder: String,
    },
    ProtocolAi {
        protocol: AiProtocol,
        /// Present when the URL names an instance; absent when the tail
        /// went straight to the endpoint and routing falls to the model
        /// mapping.
        instance: Option<String>,
        endpoint: ProtocolEndpoint,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProtocol {
    OpenAi,
    Anthropic,
    BedrockNative,
}

impl AiProtocol {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "bedrock-native" => Some(Self::BedrockNative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolEndpoint {
    ChatCompletions,
    Messages,
    Converse,
}

impl ProtocolEndpoint {
    /// Match a path tail against the endpoints a protocol understands.
    /// A leading `v1/` is tolerated, matching what OpenAI-dialect clients
    /// send when pointed at a custom base URL.
    fn from_tail(protocol: AiProtocol, tail: &str) -> Option<Self> {
        let tail = tail.strip_prefix("v1/").unwrap_or(tail);
        match (protocol, tail) {
            (AiProtocol::OpenAi, "chat/completions") => Some(Self::ChatCompletions),
            (AiProtocol::Anthropic, "messages") => Some(Self::Messages),
            (AiProtocol::BedrockNative, "converse") => Some(Self::Converse),
            _ => None,
        }
    }
}

/// Classify a request path. Paths handled by dedicated routes (`/health`,
/// `/auth/…`, `/v1/models`) never reach this function.
pub fn classify(path: &str) -> Result<RouteDecision, GatewayError> {
    let path = path.trim_start_matches('/');

    if let Some(rest) = path.strip_prefix('-') {
        return classify_storage(rest);
    }

    if let Some(rest) = path.strip_prefix("transparent/") {
        let (instance, remainder) = rest.split_once('/').ok_or_else(|| {
            GatewayError::invalid("transparent path needs /transparent/{instance}/{path}")
        })?;
        if instance.is_empty() || remainder.is_empty() {
            return Err(GatewayError::invalid(
                "transparent path needs /transparent/{instance}/{path}",
            ));
        }
        return Ok(RouteDecision::TransparentAi {
            instance: instance.to_string(),
            remainder: format!("/{remainder}"),
        });
    }

    let (protocol_segment, rest) = path
        .split_once('/')
        .ok_or_else(|| GatewayError::invalid("unknown path"))?;
    let protocol = AiProtocol::from_segment(protocol_segment)
        .ok_or_else(|| GatewayError::invalid(format!("unknown protocol {protocol_segment:?}")))?;

    // `/{protocol}/{endpoint}` routes by model mapping; with one more
    // segment the URL names the instance explicitly.
    if let Some(endpoint) = ProtocolEndpoint::from_tail(protocol, rest) {
        return Ok(RouteDecision::ProtocolAi {
            protocol,
            instance: None,
            endpoint,
        });
    }

    let (instance, tail) = rest
        .split_once('/')
        .ok_or_else(|| GatewayError::invalid("unknown protocol endpoint"))?;
    let endpoint = ProtocolEndpoint::from_tail(protocol, tail)
        .ok_or_else(|| GatewayError::invalid(format!("unknown protocol endpoint {tail:?}")))?;

    Ok(RouteDecision::ProtocolAi {
        protocol,
        instance: Some(instance.to_string()),
        endpoint,
    })
}

fn classify_storage(rest: &str) -> Result<RouteDecision, GatewayError> {
    let mut segments = rest.splitn(4, '/');
    let kind_segment = segments.next().unwrap_or_default();
    let kind = StorageKind::from_path_segment(kind_segment)
        .ok_or_else(|| GatewayError::invalid(format!("unknown storage type {kind_segment:?}")))?;

    let route = segments
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| GatewayError::invalid("storage path missing route"))?;

    let op_segment = segments
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| GatewayError::invalid("storage path missing operation"))?;
    let op = StorageOp::from_path_segment(op_segment)
        .ok_or_else(|| GatewayError::invalid(format!("unknown storage operation {op_segment:?}")))?;

    let bucket_and_key = segments.next().unwrap_or_default();
    let (bucket, key) = match bucket_and_key.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (bucket_and_key, ""),
    };
    if bucket.is_empty() {
        return Err(GatewayError::invalid("storage path missing bucket"));
    }
    if key.is_empty() && op.requires_key() {
        return Err(GatewayError::invalid(format!(
            "object key is required for {} operation",
            op.as_str()
        )));
    }

    Ok(RouteDecision::Storage {
        kind,
        route: route.to_string(),
        op,
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}
