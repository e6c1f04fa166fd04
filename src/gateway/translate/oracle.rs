//! OpenAI ↔ Oracle GenAI translation.
//!
//! OCI Generative AI uppercases roles, wraps text in typed content blocks,
//! and addresses the model through an on-demand serving mode plus a
//! compartment id.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::openai::{
    AssistantMessage, ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse, Usage,
};

use crate::gateway::{GatewayError, RequestEnvelope};

use super::parse_backend_json;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OracleRequest {
    compartment_id: String,
    serving_mode: ServingMode,
    chat_request: OracleChatRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServingMode {
    serving_type: String,
    model_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OracleChatRequest {
    messages: Vec<OracleMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OracleMessage {
    role: String,
    content: Vec<OracleContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OracleContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OracleResponse {
    chat_response: OracleChatResponse,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OracleChatResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    choices: Vec<OracleChoice>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OracleChoice {
    #[serde(default)]
    message: Option<OracleMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

pub fn to_chat(
    request: &ChatCompletionRequest,
    remote_model: &str,
    compartment_id: &str,
) -> Result<RequestEnvelope, GatewayError> {
    let messages = request
        .messages
        .iter()
        .filter(|message| matches!(message.role.as_str(), "system" | "user" | "assistant"))
        .map(|message| OracleMessage {
            role: message.role.to_uppercase(),
            content: vec![OracleContent {
                kind: "TEXT".to_string(),
                text: message.content.collapsed_text(),
            }],
        })
        .collect();

    let body = OracleRequest {
        compartment_id: compartment_id.to_string(),
        serving_mode: ServingMode {
            serving_type: "ON_DEMAND".to_string(),
            model_id: remote_model.to_string(),
        },
        chat_request: OracleChatRequest {
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop.clone().unwrap_or_default(),
        },
    };

    let body =
        serde_json::to_vec(&body).map_err(|err| GatewayError::translation(err.to_string()))?;
    Ok(RequestEnvelope::post_json(
        "/20231130/actions/chat",
        Bytes::from(body),
    ))
}

pub fn response_to_openai(
    body: &[u8],
    model: &str,
    completion_id: &str,
    created: i64,
) -> Result<ChatCompletionResponse, GatewayError> {
    let response: OracleResponse = parse_backend_json(body, "oracle genai")?;

    let mut content = String::new();
    let mut finish_reason = "stop".to_string();

    if let Some(choice) = response.chat_response.choices.into_iter().next() {
        if let Some(message) = choice.message {
            for block in message.content {
                if block.kind == "TEXT" {
                    content.push_str(&block.text);
                }
            }
        }
        finish_reason = match choice.finish_reason.as_deref() {
            Some("FINISH") | Some("COMPLETE") | None => "stop",
            Some("LENGTH") => "length",
            Some("CONTENT_FILTER") => "content_filter",
            Some(_) => "stop",
        }
        .to_string();
    } else if let Some(text) = response.chat_response.text {
        content = text;
    }

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
                tool_calls: None,
            },
            finish_reason,
        }],
        usage: Some(Usage::default()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn request(value: Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn roles_uppercase_and_serving_mode_is_on_demand() {
        let envelope = to_chat(
            &request(json!({
                "model": "cohere.command-r-plus",
                "messages": [
                    {"role": "system", "content": "be nice"},
                    {"role": "user", "content": "hello"},
                ],
                "max_tokens": 32,
            })),
            "cohere.command-r-plus",
            "ocid1.compartment.oc1..xyz",
        )
        .unwrap();

        assert_eq!(envelope.path, "/20231130/actions/chat");
        let body: Value = serde_json::from_slice(&envelope.body).unwrap();
        assert_eq!(body["compartmentId"], "ocid1.compartment.oc1..xyz");
        assert_eq!(body["servingMode"]["servingType"], "ON_DEMAND");
        assert_eq!(body["servingMode"]["modelId"], "cohere.command-r-plus");
        assert_eq!(body["chatRequest"]["messages"][0]["role"], "SYSTEM");
        assert_eq!(body["chatRequest"]["messages"][1]["role"], "USER");
        assert_eq!(
            body["chatRequest"]["messages"][1]["content"][0]["type"],
            "TEXT"
        );
    }

    #[test]
    fn response_concatenates_text_blocks() {
        let upstream = json!({
            "chatResponse": {
                "choices": [{"message": {"role": "ASSISTANT", "content": [
                    {"type": "TEXT", "text": "part one "},
                    {"type": "TEXT", "text": "part two"},
                ]}, "finishReason": "COMPLETE"}],
            },
        });
        let response = response_to_openai(
            serde_json::to_vec(&upstream).unwrap().as_slice(),
            "cohere.command-r-plus",
            "chatcmpl-abc12345",
            9,
        )
        .unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("part one part two")
        );
        assert_eq!(response.choices[0].finish_reason, "stop");
    }

    #[test]
    fn finish_reason_table() {
        for (upstream, expected) in [
            ("FINISH", "stop"),
            ("COMPLETE", "stop"),
            ("LENGTH", "length"),
            ("CONTENT_FILTER", "content_filter"),
        ] {
            let body = json!({
                "chatResponse": {"choices": [{
                    "message": {"role": "ASSISTANT", "content": [{"type": "TEXT", "text": "x"}]},
                    "finishReason": upstream,
                }]},
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
