// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Chat Completions backend for the routing stages.
//!
//! Query rewriting, server selection, tool selection and argument
//! refinement each send one request here. Tools travel as `function` tools
//! and tool output goes back as `tool` role messages, which is the dialect
//! OpenAI, Ollama (`/v1`) and self-hosted gateways all accept.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use tracing::debug;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::ProviderType;
use crate::error::ProviderError;
use crate::types::{
    ContentBlockType, Message, MessageContent, Provider, ProviderConfig, ProviderResponse, Role,
    StopReason, TokenUsage, ToolCall, ToolDefinition,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Decisions are short; this only caps runaway replies.
const DEFAULT_MAX_TOKENS: u32 = 1024;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Decision model reached over a Chat Completions endpoint.
pub struct OpenAIProvider {
    client: Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
    max_tokens: u32,
    temperature: Option<f32>,
    kind: ProviderType,
}

impl OpenAIProvider {
    /// `base_url` is the API root; `/chat/completions` is appended to it.
    pub fn new(
        kind: ProviderType,
        api_key: Option<String>,
        model: impl Into<String>,
        base_url: &str,
        config: ProviderConfig,
    ) -> Self {
        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            model: model.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: config.temperature,
            kind,
        }
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
    ) -> ChatRequest {
        let system = system_prompt.map(|text| ChatMessage {
            role: "system".to_string(),
            content: Some(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
        let api_messages: Vec<ChatMessage> = system
            .into_iter()
            .chain(messages.iter().map(ChatMessage::from))
            .collect();

        // An empty tool list is rejected by some servers
        let tools_json: Option<Vec<ChatTool>> = tools
            .filter(|t| !t.is_empty())
            .map(|t| t.iter().map(ChatTool::from).collect());

        ChatRequest {
            model: self.model.clone(),
            messages: api_messages,
            tools: tools_json,
            max_tokens: Some(self.max_tokens),
            temperature: self.temperature,
        }
    }
}

/// Map a non-success reply to a [`ProviderError`], preferring the error
/// `type` in the body over the status code.
fn error_from_response(status_code: u16, body: &str) -> ProviderError {
    let (message, error_type) = match serde_json::from_str::<ApiError>(body) {
        Ok(error) => (error.error.message, error.error.error_type),
        Err(_) => (body.to_string(), None),
    };

    match (error_type.as_deref(), status_code) {
        (Some("authentication_error" | "invalid_api_key"), _) => ProviderError::AuthError(message),
        (Some("rate_limit_error" | "rate_limit_exceeded"), _) => ProviderError::RateLimited(message),
        (Some("model_not_found"), _) => ProviderError::ModelNotFound(message),
        (_, 401 | 403) => ProviderError::AuthError(message),
        (_, 429) => ProviderError::RateLimited(message),
        _ => ProviderError::api(message, status_code),
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = self.build_request(messages, tools, system_prompt);
        let start = Instant::now();
        #[cfg(feature = "telemetry")]
        let operation_name = format!("{}.chat", self.kind.to_string().to_lowercase());

        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "Sending chat request"
        );

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.header("authorization", format!("Bearer {}", api_key));
        }

        let response = req.json(&request).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(start.elapsed().as_millis() as u64)
            } else {
                ProviderError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            #[cfg(feature = "telemetry")]
            GLOBAL_METRICS.record_operation(&operation_name, start.elapsed());
            return Err(error_from_response(status.as_u16(), &error_text));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let provider_response: ProviderResponse = api_response.into();

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_operation(&operation_name, start.elapsed());
            if let Some(ref usage) = provider_response.usage {
                GLOBAL_METRICS.record_tokens(usage.input_tokens as u64, usage.output_tokens as u64);
            }
        }

        Ok(provider_response)
    }

    fn name(&self) -> &str {
        match self.kind {
            ProviderType::OpenAI => "OpenAI",
            ProviderType::Ollama => "Ollama",
            ProviderType::OpenAICompatible => "OpenAI-Compatible",
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    call_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<ChatFunction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatToolFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Error body, as far as OpenAI and Ollama agree on it.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

// ============================================================================
// Conversation <-> wire
// ============================================================================

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };

        let blocks = match &msg.content {
            MessageContent::Text(s) => {
                return Self {
                    role: role.to_string(),
                    content: Some(s.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                }
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();

        for block in blocks {
            match block.block_type {
                ContentBlockType::Text => {
                    if let Some(ref text) = block.text {
                        texts.push(text.clone());
                    }
                }
                ContentBlockType::ToolUse => {
                    tool_calls.push(ChatToolCall {
                        id: block.id.clone(),
                        call_type: Some("function".to_string()),
                        function: Some(ChatFunction {
                            name: block.name.clone(),
                            arguments: block.input.as_ref().map(|v| v.to_string()),
                        }),
                    });
                }
                ContentBlockType::ToolResult => {
                    // Tool output travels as its own "tool" role message
                    return Self {
                        role: "tool".to_string(),
                        content: Some(block.content.clone().unwrap_or_default()),
                        tool_calls: None,
                        tool_call_id: block.tool_use_id.clone(),
                    };
                }
            }
        }

        Self {
            role: role.to_string(),
            content: if texts.is_empty() { None } else { Some(texts.join("\n")) },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        }
    }
}

impl From<&ToolDefinition> for ChatTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ChatToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: serde_json::to_value(&tool.input_schema).unwrap_or_default(),
            },
        }
    }
}

impl From<ChatResponse> for ProviderResponse {
    fn from(response: ChatResponse) -> Self {
        let choice = response.choices.into_iter().next();

        let (content, tool_calls, stop_reason) = if let Some(choice) = choice {
            let content = choice.message.content.unwrap_or_default();

            let tool_calls = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .filter_map(|tc| {
                    let id = tc.id?;
                    let func = tc.function?;
                    let name = func.name?;
                    let input: serde_json::Value = func
                        .arguments
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_else(|| serde_json::json!({}));
                    Some(ToolCall { id, name, input })
                })
                .collect();

            let stop_reason = match choice.finish_reason.as_deref() {
                Some("tool_calls") => StopReason::ToolUse,
                Some("length") => StopReason::MaxTokens,
                _ => StopReason::EndTurn,
            };

            (content, tool_calls, stop_reason)
        } else {
            (String::new(), Vec::new(), StopReason::EndTurn)
        };

        Self {
            content,
            tool_calls,
            stop_reason,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(kind: ProviderType, base_url: &str) -> OpenAIProvider {
        OpenAIProvider::new(kind, None, "gpt-4o-mini", base_url, ProviderConfig::default())
    }

    #[test]
    fn test_provider_identity() {
        let provider = provider(ProviderType::Ollama, OLLAMA_BASE_URL);
        assert_eq!(provider.name(), "Ollama");
        assert_eq!(provider.model(), "gpt-4o-mini");
        assert_eq!(provider.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_endpoint_ignores_trailing_slash() {
        let provider = provider(ProviderType::OpenAICompatible, "https://llm.internal/v1/");
        assert_eq!(provider.endpoint, "https://llm.internal/v1/chat/completions");
        assert_eq!(provider.name(), "OpenAI-Compatible");
    }

    #[test]
    fn test_message_conversion() {
        let msg = Message::user("Hello!");
        let chat_msg: ChatMessage = (&msg).into();
        assert_eq!(chat_msg.role, "user");
        assert_eq!(chat_msg.content.as_deref(), Some("Hello!"));
    }

    #[test]
    fn test_tool_call_message_conversion() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "get_forecast".to_string(),
            input: json!({"city": "Paris"}),
        };
        let msg = Message::assistant_tool_calls("", &[call]);
        let chat_msg: ChatMessage = (&msg).into();

        assert_eq!(chat_msg.role, "assistant");
        assert!(chat_msg.content.is_none());
        let calls = chat_msg.tool_calls.unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        let args = calls[0].function.as_ref().unwrap().arguments.as_deref().unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(args).unwrap()["city"], "Paris");
    }

    #[test]
    fn test_tool_result_message_conversion() {
        let msg = Message::tool_result("call_1", "Sunny", false);
        let chat_msg: ChatMessage = (&msg).into();
        assert_eq!(chat_msg.role, "tool");
        assert_eq!(chat_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(chat_msg.content.as_deref(), Some("Sunny"));
    }

    #[test]
    fn test_tool_conversion() {
        let tool = ToolDefinition::new("test_tool", "A test tool");
        let chat_tool: ChatTool = (&tool).into();
        assert_eq!(chat_tool.tool_type, "function");
        assert_eq!(chat_tool.function.name, "test_tool");
        assert_eq!(chat_tool.function.parameters["type"], "object");
    }

    #[test]
    fn test_build_request_system_prompt_and_empty_tools() {
        let provider = provider(ProviderType::OpenAI, OPENAI_BASE_URL);
        let request = provider.build_request(&[Message::user("hi")], Some(&[]), Some("be brief"));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.tools.is_none());
    }

    #[test]
    fn test_response_conversion_with_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "search_query", "arguments": "{\"query\":\"weather paris\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5}
        });
        let response: ChatResponse = serde_json::from_value(body).unwrap();
        let response: ProviderResponse = response.into();

        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls[0].name, "search_query");
        assert_eq!(response.tool_calls[0].input["query"], "weather paris");
        assert_eq!(response.usage.unwrap().total(), 17);
    }

    #[test]
    fn test_response_conversion_bad_arguments_default_to_object() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{"id": "c", "function": {"name": "t", "arguments": "not json"}}]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let response: ChatResponse = serde_json::from_value(body).unwrap();
        let response: ProviderResponse = response.into();
        assert_eq!(response.tool_calls[0].input, json!({}));
    }

    #[test]
    fn test_error_mapping() {
        let err = error_from_response(
            401,
            r#"{"error": {"message": "bad key", "type": "invalid_api_key"}}"#,
        );
        assert!(matches!(err, ProviderError::AuthError(ref m) if m == "bad key"));

        let err = error_from_response(429, "slow down");
        assert!(matches!(err, ProviderError::RateLimited(_)));

        let err = error_from_response(500, "boom");
        assert!(matches!(err, ProviderError::ApiError { status_code: Some(500), .. }));
    }

    #[test]
    fn test_error_type_wins_over_status() {
        let err = error_from_response(
            404,
            r#"{"error": {"message": "model 'qwen9' not found", "type": "model_not_found"}}"#,
        );
        assert!(matches!(err, ProviderError::ModelNotFound(_)));

        let err = error_from_response(
            400,
            r#"{"error": {"message": "too many requests", "type": "rate_limit_exceeded"}}"#,
        );
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }
}
