//! OpenAI chat-completion dialect.
//!
//! This is the pivot schema for every translation the gateway performs:
//! inbound requests in other dialects are never accepted, and every backend
//! response is converted back into these types before it reaches the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// Legacy pre-tools field; accepted with the same mapping as `tools`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    /// Parameters the non-OpenAI dialects cannot represent. Each name is
    /// reported when the field is set so strict mode can reject the request
    /// and lenient mode can log what was dropped.
    pub fn unsupported_parameters(&self) -> Vec<&'static str> {
        let mut dropped = Vec::new();
        if self.n.is_some() {
            dropped.push("n");
        }
        if self.frequency_penalty.is_some() {
            dropped.push("frequency_penalty");
        }
        if self.presence_penalty.is_some() {
            dropped.push("presence_penalty");
        }
        if self.logit_bias.is_some() {
            dropped.push("logit_bias");
        }
        if self.seed.is_some() {
            dropped.push("seed");
        }
        if self.response_format.is_some() {
            dropped.push("response_format");
        }
        if self.user.is_some() {
            dropped.push("user");
        }
        dropped
    }

    /// Tools from both the current and the legacy field, in submission order.
    pub fn all_tools(&self) -> Vec<&FunctionDefinition> {
        let mut out: Vec<&FunctionDefinition> = self
            .tools
            .iter()
            .filter(|tool| tool.kind == "function")
            .map(|tool| &tool.function)
            .collect();
        out.extend(self.functions.iter());
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// OpenAI allows `content` to be a bare string or an array of typed parts.
/// The variant never crosses a translator boundary: every translator either
/// collapses it with [`MessageContent::collapsed_text`] or walks
/// [`MessageContent::parts`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl MessageContent {
    /// Collapse to plain text: strings pass through, part arrays concatenate
    /// their text parts. Non-text parts are ignored.
    pub fn collapsed_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    if let ContentPart::Text { text } = part {
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }

    pub fn parts(&self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) => vec![ContentPart::Text { text: text.clone() }],
            Self::Parts(parts) => parts.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    /// Parts the gateway does not understand are carried but ignored by
    /// every translator.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A decoded `data:image/…;base64,…` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    /// Full media type, e.g. `image/png`.
    pub media_type: String,
    /// Short format label, e.g. `png`.
    pub format: String,
    /// Base64 payload, still encoded.
    pub data: String,
}

/// Split an inline data URL into its media type and payload. Anything that
/// is not a base64 image data URL yields `None`; callers skip those parts.
pub fn parse_image_data_url(url: &str) -> Option<InlineImage> {
    let rest = url.strip_prefix("data:image/")?;
    let (subtype_and_params, data) = rest.split_once(',')?;
    let subtype = subtype_and_params
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    if subtype.is_empty() || !subtype_and_params.contains("base64") {
        return None;
    }
    let format = match subtype {
        "jpg" | "jpeg" => "jpeg",
        other => other,
    };
    Some(InlineImage {
        media_type: format!("image/{subtype}"),
        format: format.to_string(),
        data: data.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// `"auto"`, `"none"`, `"required"`, or the `"any"` alias.
    Mode(String),
    Function {
        #[serde(rename = "type")]
        kind: String,
        function: ToolChoiceFunction,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as the OpenAI wire format requires.
    pub arguments: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Server-assigned completion id: `chatcmpl-` plus eight random hex chars.
pub fn completion_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut suffix = String::with_capacity(8);
    for _ in 0..8 {
        let nibble: u8 = rng.gen_range(0..16);
        suffix.push(char::from_digit(u32::from(nibble), 16).unwrap_or('0'));
    }
    format!("chatcmpl-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_deserializes_from_string_and_parts() {
        let message: ChatMessage =
            serde_json::from_value(serde_json::json!({"role": "user", "content": "hi"})).unwrap();
        assert_eq!(message.content.collapsed_text(), "hi");

        let message: ChatMessage = serde_json::from_value(serde_json::json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "look at "},
                {"type": "text", "text": "this"},
                {"type": "input_audio", "input_audio": {"data": "x"}},
            ]
        }))
        .unwrap();
        assert_eq!(message.content.collapsed_text(), "look at this");
    }

    #[test]
    fn unknown_parts_are_tolerated() {
        let content: MessageContent =
            serde_json::from_value(serde_json::json!([{"type": "video", "url": "v"}])).unwrap();
        assert!(matches!(content.parts().as_slice(), [ContentPart::Unknown]));
    }

    #[test]
    fn image_data_url_parsing() {
        let image = parse_image_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(image.format, "png");
        assert_eq!(image.media_type, "image/png");
        assert_eq!(image.data, "aGVsbG8=");

        let image = parse_image_data_url("data:image/jpg;base64,Zm9v").unwrap();
        assert_eq!(image.format, "jpeg");

        assert!(parse_image_data_url("https://example.com/cat.png").is_none());
        assert!(parse_image_data_url("data:text/plain;base64,eA==").is_none());
    }

    #[test]
    fn unsupported_parameters_are_reported() {
        let request: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "messages": [],
            "n": 2,
            "seed": 7,
        }))
        .unwrap();
        assert_eq!(request.unsupported_parameters(), vec!["n", "seed"]);
    }

    #[test]
    fn completion_ids_have_fixed_shape() {
        let id = completion_id();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(id.len(), "chatcmpl-".len() + 8);
    }
}
