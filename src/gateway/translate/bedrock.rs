//! OpenAI ↔ Bedrock Converse translation.
//!
//! The Converse API is Bedrock's unified chat surface; the request carries
//! the model id in the path, system text in its own block list, and sampling
//! parameters under `inferenceConfig`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::openai::{
    parse_image_data_url, AssistantMessage, ChatCompletionChoice, ChatCompletionRequest,
    ChatCompletionResponse, ChatMessage, ContentPart, FunctionCall, ToolCall, ToolChoice, Usage,
};

use crate::gateway::{GatewayError, RequestEnvelope};

use super::parse_backend_json;

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    pub messages: Vec<ConverseMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<SystemBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_config: Option<InferenceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use: Option<ToolUseBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    pub format: String,
    pub source: ImageSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    pub bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlock {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub tools: Vec<ConverseTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ConverseToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseTool {
    pub tool_spec: ToolSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: ToolInputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    pub json: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConverseToolChoice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolChoiceTool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceTool {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseResponse {
    pub output: ConverseOutput,
    #[serde(default)]
    pub stop_reason: String,
    #[serde(default)]
    pub usage: ConverseUsage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConverseOutput {
    #[serde(default)]
    pub message: Option<ConverseMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Canonical name → full Bedrock model id. Names already carrying a vendor
/// prefix pass through untouched.
pub fn bedrock_model_id(model: &str) -> Option<String> {
    const VENDOR_PREFIXES: &[&str] = &["anthropic.", "amazon.", "meta.", "mistral.", "ai21.", "cohere."];
    if VENDOR_PREFIXES
        .iter()
        .any(|prefix| model.starts_with(prefix))
    {
        return Some(model.to_string());
    }

    const MODEL_IDS: &[(&str, &str)] = &[
        ("claude-3-opus", "anthropic.claude-3-opus-20240229-v1:0"),
        ("claude-3-opus-20240229", "anthropic.claude-3-opus-20240229-v1:0"),
        ("claude-3-sonnet", "anthropic.claude-3-sonnet-20240229-v1:0"),
        ("claude-3-sonnet-20240229", "anthropic.claude-3-sonnet-20240229-v1:0"),
        ("claude-3-haiku", "anthropic.claude-3-haiku-20240307-v1:0"),
        ("claude-3-haiku-20240307", "anthropic.claude-3-haiku-20240307-v1:0"),
        ("claude-3-5-sonnet", "anthropic.claude-3-5-sonnet-20240620-v1:0"),
        ("claude-3-5-sonnet-20240620", "anthropic.claude-3-5-sonnet-20240620-v1:0"),
        ("amazon-titan-text-express", "amazon.titan-text-express-v1"),
        ("amazon-titan-text-lite", "amazon.titan-text-lite-v1"),
        ("llama2-13b", "meta.llama2-13b-chat-v1"),
        ("llama2-70b", "meta.llama2-70b-chat-v1"),
        ("mistral-7b", "mistral.mistral-7b-instruct-v0:2"),
        ("mistral-8x7b", "mistral.mixtral-8x7b-instruct-v0:1"),
    ];
    MODEL_IDS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, id)| (*id).to_string())
}

/// Build the Converse envelope. Streaming swaps the endpoint; the stream
/// body itself is forwarded verbatim by the adapter.
pub fn to_converse(
    request: &ChatCompletionRequest,
    remote_model: &str,
) -> Result<RequestEnvelope, GatewayError> {
    let model_id = bedrock_model_id(remote_model).ok_or_else(|| {
        GatewayError::translation(format!("model {remote_model:?} not supported on Bedrock"))
    })?;

    let mut system = Vec::new();
    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role.as_str() {
            "system" => system.push(SystemBlock {
                text: message.content.collapsed_text(),
            }),
            "user" | "assistant" => {
                let content = content_blocks(message);
                if content.is_empty() {
                    continue;
                }
                messages.push(ConverseMessage {
                    role: message.role.clone(),
                    content,
                });
            }
            // tool results have no Converse counterpart on this path
            _ => {}
        }
    }

    let inference_config = InferenceConfig {
        max_tokens: Some(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone().unwrap_or_default(),
    };

    let converse = ConverseRequest {
        messages,
        system,
        inference_config: Some(inference_config),
        tool_config: tool_config(request),
    };

    let body = serde_json::to_vec(&converse)
        .map_err(|err| GatewayError::translation(err.to_string()))?;

    let action = if request.stream {
        "converse-stream"
    } else {
        "converse"
    };
    Ok(RequestEnvelope::post_json(
        format!("/model/{model_id}/{action}"),
        Bytes::from(body),
    ))
}

fn content_blocks(message: &ChatMessage) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    for part in message.content.parts() {
        match part {
            ContentPart::Text { text } => blocks.push(ContentBlock {
                text: Some(text),
                ..Default::default()
            }),
            ContentPart::ImageUrl { image_url } => {
                if let Some(image) = parse_image_data_url(&image_url.url) {
                    blocks.push(ContentBlock {
                        image: Some(ImageBlock {
                            format: image.format,
                            source: ImageSource { bytes: image.data },
                        }),
                        ..Default::default()
                    });
                }
            }
            ContentPart::Unknown => {}
        }
    }
    blocks
}

fn tool_config(request: &ChatCompletionRequest) -> Option<ToolConfig> {
    let tools: Vec<ConverseTool> = request
        .all_tools()
        .into_iter()
        .map(|function| ConverseTool {
            tool_spec: ToolSpec {
                name: function.name.clone(),
                description: function.description.clone(),
                input_schema: ToolInputSchema {
                    json: function.parameters.clone(),
                },
            },
        })
        .collect();
    if tools.is_empty() {
        return None;
    }

    Some(ToolConfig {
        tools,
        tool_choice: request.tool_choice.as_ref().and_then(convert_tool_choice),
    })
}

fn convert_tool_choice(choice: &ToolChoice) -> Option<ConverseToolChoice> {
    match choice {
        ToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Some(ConverseToolChoice {
                auto: Some(Value::Object(Default::default())),
                ..Default::default()
            }),
            "required" | "any" => Some(ConverseToolChoice {
                any: Some(Value::Object(Default::default())),
                ..Default::default()
            }),
            "none" => None,
            _ => Some(ConverseToolChoice {
                auto: Some(Value::Object(Default::default())),
                ..Default::default()
            }),
        },
        ToolChoice::Function { kind, function } if kind == "function" => Some(ConverseToolChoice {
            tool: Some(ToolChoiceTool {
                name: function.name.clone(),
            }),
            ..Default::default()
        }),
        ToolChoice::Function { .. } => Some(ConverseToolChoice {
            auto: Some(Value::Object(Default::default())),
            ..Default::default()
        }),
    }
}

pub fn response_to_openai(
    body: &[u8],
    model: &str,
    completion_id: &str,
    created: i64,
) -> Result<ChatCompletionResponse, GatewayError> {
    let response: ConverseResponse = parse_backend_json(body, "converse")?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    if let Some(message) = response.output.message {
        for block in message.content {
            if let Some(text) = block.text {
                content.push_str(&text);
            }
            if let Some(tool_use) = block.tool_use {
                let arguments = serde_json::to_string(&tool_use.input)
                    .map_err(|err| GatewayError::translation(err.to_string()))?;
                tool_calls.push(ToolCall {
                    id: tool_use.tool_use_id,
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: tool_use.name,
                        arguments,
                    },
                });
            }
        }
    }

    let finish_reason = match response.stop_reason.as_str() {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "content_filtered" => "content_filter",
        _ => "stop",
    };

    let total_tokens = if response.usage.total_tokens > 0 {
        response.usage.total_tokens
    } else {
        response.usage.input_tokens + response.usage.output_tokens
    };

    Ok(ChatCompletionResponse {
        id: completion_id.to_string(),
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: if content.is_empty() {
                    None
                } else {
                    Some(content)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: finish_reason.to_string(),
        }],
        usage: Some(Usage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens,
        }),
    })
}
