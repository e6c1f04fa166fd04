//! OpenAI ↔ Vertex Gemini translation.
//!
//! Gemini renames the assistant role to `model`, hoists system text into
//! `systemInstruction`, and nests sampling parameters under
//! `generationConfig`. Function declarations all live in a single tools
//! entry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::openai::{
    parse_image_data_url, AssistantMessage, ChatCompletionChoice, ChatCompletionRequest,
    ChatCompletionResponse, ContentPart, FunctionCall, ToolCall, Usage,
};

use crate::gateway::{GatewayError, RequestEnvelope};

use super::parse_backend_json;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
struct FunctionDeclaration {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

pub fn to_generate_content(
    request: &ChatCompletionRequest,
    remote_model: &str,
) -> Result<RequestEnvelope, GatewayError> {
    let mut system_instruction = None;
    let mut contents = Vec::new();

    for message in &request.messages {
        if message.role == "system" {
            // Gemini has no system role; the instruction block carries it.
            system_instruction = Some(Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: Some(message.content.collapsed_text()),
                    ..Default::default()
                }],
            });
            continue;
        }
        if message.role != "user" && message.role != "assistant" {
            continue;
        }
        let role = if message.role == "assistant" {
            "model"
        } else {
            "user"
        };
        let parts = message_parts(&message.content.parts());
        if parts.is_empty() {
            continue;
        }
        contents.push(Content {
            role: role.to_string(),
            parts,
        });
    }

    let tools = {
        let declarations: Vec<FunctionDeclaration> = request
            .all_tools()
            .into_iter()
            .map(|function| FunctionDeclaration {
                name: function.name.clone(),
                description: function.description.clone(),
                parameters: function.parameters.clone(),
            })
            .collect();
        if declarations.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTool {
                function_declarations: declarations,
            }]
        }
    };

    let body = GeminiRequest {
        contents,
        system_instruction,
        tools,
        generation_config: GenerationConfig {
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone().unwrap_or_default(),
        },
    };

    let body =
        serde_json::to_vec(&body).map_err(|err| GatewayError::translation(err.to_string()))?;

    let action = if request.stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    Ok(RequestEnvelope::post_json(
        format!("/publishers/google/models/{remote_model}:{action}"),
        Bytes::from(body),
    ))
}

fn message_parts(parts: &[ContentPart]) -> Vec<Part> {
    let mut out = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text } => out.push(Part {
                text: Some(text.clone()),
                ..Default::default()
            }),
            ContentPart::ImageUrl { image_url } => {
                if let Some(image) = parse_image_data_url(&image_url.url) {
                    out.push(Part {
                        inline_data: Some(InlineData {
                            mime_type: image.media_type,
                            data: image.data,
                        }),
                        ..Default::default()
                    });
                }
            }
            ContentPart::Unknown => {}
        }
    }
    out
}

pub fn response_to_openai(
    body: &[u8],
    model: &str,
    completion_id: &str,
    created: i64,
) -> Result<ChatCompletionResponse, GatewayError> {
    let response: GeminiResponse = parse_backend_json(body, "gemini")?;

    let mut content = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut finish_reason = "stop".to_string();

    if let Some(candidate) = response.candidates.into_iter().next() {
        if let Some(candidate_content) = candidate.content {
            for part in candidate_content.parts {
                if let Some(text) = part.text {
                    content.push_str(&text);
                }
                if let Some(call) = part.function_call {
                    let arguments = serde_json::to_string(&call.args)
                        .map_err(|err| GatewayError::translation(err.to_string()))?;
                    // Gemini does not assign call ids; synthesise stable ones.
                    tool_calls.push(ToolCall {
                        id: format!("call_{}", tool_calls.len()),
                        kind: "function".to_string(),
                        function: FunctionCall {
                            name: call.name,
                            arguments,
                        },
                    });
                }
            }
        }
        finish_reason = match candidate.finish_reason.as_deref() {
            Some("STOP") | None => "stop",
            Some("MAX_TOKENS") => "length",
            Some("SAFETY") => "content_filter",
            Some(_) => "stop",
        }
        .to_string();
        if !tool_calls.is_empty() {
            finish_reason = "tool_calls".to_string();
        }
    }

    let usage = response.usage_metadata.unwrap_or_default();

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
            finish_reason,
        }],
        usage: Some(Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
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
    fn roles_remap_and_system_hoists() {
        let envelope = to_generate_content(
            &request(json!({
                "model": "gemini-1.5-pro",
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "hello"},
                    {"role": "assistant", "content": "hi"},
                ],
                "max_tokens": 64,
                "temperature": 0.5,
            })),
            "gemini-1.5-pro",
        )
        .unwrap();

        assert_eq!(
            envelope.path,
            "/publishers/google/models/gemini-1.5-pro:generateContent"
        );
        let body: Value = serde_json::from_slice(&envelope.body).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
    }

    #[test]
    fn tools_collapse_into_one_declaration_list() {
        let envelope = to_generate_content(
            &request(json!({
                "model": "gemini-1.5-pro",
                "messages": [{"role": "user", "content": "x"}],
                "tools": [
                    {"type": "function", "function": {"name": "a", "parameters": {}}},
                    {"type": "function", "function": {"name": "b", "parameters": {}}},
                ],
            })),
            "gemini-1.5-pro",
        )
        .unwrap();
        let body: Value = serde_json::from_slice(&envelope.body).unwrap();
        let declarations = body["tools"][0]["functionDeclarations"].as_array().unwrap();
        assert_eq!(declarations.len(), 2);
        assert!(body["tools"].as_array().unwrap().len() == 1);
    }

    #[test]
    fn pure_text_response_round_trips() {
        let source = request(json!({
            "model": "gemini-1.5-pro",
            "messages": [{"role": "user", "content": "say exactly: hello world"}],
        }));
        let _ = to_generate_content(&source, "gemini-1.5-pro").unwrap();

        let upstream = json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "hello world"}]},
                            "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 6, "candidatesTokenCount": 2, "totalTokenCount": 8},
        });
        let response = response_to_openai(
            serde_json::to_vec(&upstream).unwrap().as_slice(),
            "gemini-1.5-pro",
            "chatcmpl-abc12345",
            5,
        )
        .unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("hello world")
        );
        assert_eq!(response.choices[0].finish_reason, "stop");
    }

    #[test]
    fn function_calls_get_synthesised_ids() {
        let upstream = json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "first", "args": {"x": 1}}},
                {"functionCall": {"name": "second", "args": {}}},
            ]}, "finishReason": "STOP"}],
        });
        let response = response_to_openai(
            serde_json::to_vec(&upstream).unwrap().as_slice(),
            "gemini-1.5-pro",
            "chatcmpl-abc12345",
            1,
        )
        .unwrap();
        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[1].id, "call_1");
        assert_eq!(response.choices[0].finish_reason, "tool_calls");
    }

    #[test]
    fn finish_reason_table() {
        for (upstream, expected) in [
            ("STOP", "stop"),
            ("MAX_TOKENS", "length"),
            ("SAFETY", "content_filter"),
        ] {
            let body = json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "x"}]},
                                "finishReason": upstream}],
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
