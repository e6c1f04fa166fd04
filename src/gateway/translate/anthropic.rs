//! OpenAI ↔ Anthropic Messages translation.
//!
//! System messages move to the top-level `system` string and `max_tokens`
//! is mandatory on this API, so a default is supplied when the caller
//! omitted it.

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

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<MessageBody>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<AnthropicToolChoice>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct MessageBody {
    role: String,
    content: Value,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicToolChoice {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub fn to_messages(
    request: &ChatCompletionRequest,
    remote_model: &str,
) -> Result<RequestEnvelope, GatewayError> {
    let mut system = String::new();
    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role.as_str() {
            "system" => {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(&message.content.collapsed_text());
            }
            "user" | "assistant" => {
                let content = message_content(message)?;
                messages.push(MessageBody {
                    role: message.role.clone(),
                    content,
                });
            }
            _ => {}
        }
    }

    let tools: Vec<AnthropicTool> = request
        .all_tools()
        .into_iter()
        .map(|function| AnthropicTool {
            name: function.name.clone(),
            description: function.description.clone(),
            input_schema: function.parameters.clone(),
        })
        .collect();

    let body = MessagesRequest {
        model: remote_model.to_string(),
        messages,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: if system.is_empty() {
            None
        } else {
            Some(system)
        },
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone().unwrap_or_default(),
        tools,
        tool_choice: request.tool_choice.as_ref().and_then(convert_tool_choice),
        stream: request.stream,
    };

    let body =
        serde_json::to_vec(&body).map_err(|err| GatewayError::translation(err.to_string()))?;
    Ok(RequestEnvelope::post_json("/v1/messages", Bytes::from(body)))
}

/// Flatten to a single string unless the message is multimodal.
fn message_content(message: &ChatMessage) -> Result<Value, GatewayError> {
    let parts = message.content.parts();
    let multimodal = parts
        .iter()
        .any(|part| matches!(part, ContentPart::ImageUrl { .. }));
    if !multimodal {
        return Ok(Value::String(message.content.collapsed_text()));
    }

    let mut blocks = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text } => {
                blocks.push(serde_json::json!({"type": "text", "text": text}));
            }
            ContentPart::ImageUrl { image_url } => {
                if let Some(image) = parse_image_data_url(&image_url.url) {
                    blocks.push(serde_json::json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.media_type,
                            "data": image.data,
                        },
                    }));
                }
            }
            ContentPart::Unknown => {}
        }
    }
    Ok(Value::Array(blocks))
}

fn convert_tool_choice(choice: &ToolChoice) -> Option<AnthropicToolChoice> {
    match choice {
        ToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Some(AnthropicToolChoice {
                kind: "auto".to_string(),
                name: None,
            }),
            "required" | "any" => Some(AnthropicToolChoice {
                kind: "any".to_string(),
                name: None,
            }),
            _ => None,
        },
        ToolChoice::Function { kind, function } if kind == "function" => Some(AnthropicToolChoice {
            kind: "tool".to_string(),
            name: Some(function.name.clone()),
        }),
        ToolChoice::Function { .. } => None,
    }
}

pub fn response_to_openai(
    body: &[u8],
    model: &str,
    completion_id: &str,
    created: i64,
) -> Result<ChatCompletionResponse, GatewayError> {
    let response: MessagesResponse = parse_backend_json(body, "anthropic messages")?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ResponseBlock::Text { text } => content.push_str(&text),
            ResponseBlock::ToolUse { id, name, input } => {
                let arguments = serde_json::to_string(&input)
                    .map_err(|err| GatewayError::translation(err.to_string()))?;
                tool_calls.push(ToolCall {
                    id,
                    kind: "function".to_string(),
                    function: FunctionCall { name, arguments },
                });
            }
            ResponseBlock::Unknown => {}
        }
    }

    let finish_reason = match response.stop_reason.as_deref() {
        Some("end_turn") | Some("stop_sequence") => "stop",
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
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
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn system_extracts_and_max_tokens_defaults() {
        let envelope = to_messages(
            &request(json!({
                "model": "claude-3-opus",
                "messages": [
                    {"role": "system", "content": "short answers"},
                    {"role": "user", "content": "hi"},
                ],
            })),
            "claude-3-opus-20240229",
        )
        .unwrap();
        assert_eq!(envelope.path, "/v1/messages");
        let body: Value = serde_json::from_slice(&envelope.body).unwrap();
        assert_eq!(body["system"], "short answers");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["model"], "claude-3-opus-20240229");
    }

    #[test]
    fn multimodal_content_stays_blocked() {
        let envelope = to_messages(
            &request(json!({
                "model": "claude-3-opus",
                "messages": [{"role": "user", "content": [
                    {"type": "text", "text": "describe"},
                    {"type": "image_url", "image_url": {"url": "data:image/webp;base64,eg=="}},
                ]}],
            })),
            "claude-3-opus",
        )
        .unwrap();
        let body: Value = serde_json::from_slice(&envelope.body).unwrap();
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content[1]["source"]["media_type"], "image/webp");
    }

    #[test]
    fn tool_choice_maps_to_anthropic_shapes() {
        let base = json!({
            "model": "claude-3-opus",
            "messages": [{"role": "user", "content": "x"}],
            "tools": [{"type": "function", "function": {"name": "f", "parameters": {}}}],
        });
        for (choice, expected_kind) in [
            (json!("auto"), "auto"),
            (json!("required"), "any"),
            (json!({"type": "function", "function": {"name": "f"}}), "tool"),
        ] {
            let mut value = base.clone();
            value["tool_choice"] = choice;
            let envelope = to_messages(&request(value), "claude-3-opus").unwrap();
            let body: Value = serde_json::from_slice(&envelope.body).unwrap();
            assert_eq!(body["tool_choice"]["type"], expected_kind);
        }
    }

    #[test]
    fn response_concatenates_text_and_maps_tool_use() {
        let upstream = json!({
            "content": [
                {"type": "text", "text": "the answer "},
                {"type": "text", "text": "is 4"},
                {"type": "tool_use", "id": "toolu_1", "name": "calc", "input": {"a": 2}},
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 4},
        });
        let response = response_to_openai(
            serde_json::to_vec(&upstream).unwrap().as_slice(),
            "claude-3-opus",
            "chatcmpl-abc12345",
            7,
        )
        .unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("the answer is 4")
        );
        assert_eq!(response.choices[0].finish_reason, "tool_calls");
        assert_eq!(response.usage.unwrap().total_tokens, 14);
        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_1");
    }

    #[test]
    fn stop_reason_table() {
        for (upstream, expected) in [
            ("end_turn", "stop"),
            ("max_tokens", "length"),
            ("tool_use", "tool_calls"),
        ] {
            let body = json!({
                "content": [{"type": "text", "text": "x"}],
                "stop_reason": upstream,
                "usage": {},
            });
            let response = response_to_openai(
                serde_json::to_vec(&body).unwrap().as_slice(),
                "m",
                "chatcmpl-abc12345",
                1,
            )
            .unwrap();
            assert_eq!(response.choices[0].finish_reason, expected);
        }
    }
}
