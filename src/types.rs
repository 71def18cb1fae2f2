// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types shared by the router, the orchestrator and the providers.
//!
//! Messages follow the block layout used by most chat APIs: plain text, or a
//! list of blocks carrying text, tool calls and tool results. Every message
//! has a stable id so a tool call can be rewritten in place without losing
//! its position in the conversation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Type of content block within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBlockType {
    Text,
    ToolUse,
    ToolResult,
}

/// A block of content within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: ContentBlockType,

    /// Text content (for text blocks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Unique identifier for tool_use blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Tool name for tool_use blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Input parameters for tool_use blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Associated tool_use_id for tool_result blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,

    /// Result content for tool_result blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Whether this tool_result represents an error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ContentBlock {
    /// Create a text content block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: ContentBlockType::Text,
            text: Some(text.into()),
            id: None,
            name: None,
            input: None,
            tool_use_id: None,
            content: None,
            is_error: None,
        }
    }

    /// Create a tool_use content block.
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            block_type: ContentBlockType::ToolUse,
            text: None,
            id: Some(id.into()),
            name: Some(name.into()),
            input: Some(input),
            tool_use_id: None,
            content: None,
            is_error: None,
        }
    }

    /// Create a tool_result content block.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            block_type: ContentBlockType::ToolResult,
            text: None,
            id: None,
            name: None,
            input: None,
            tool_use_id: Some(tool_use_id.into()),
            content: Some(content.into()),
            is_error: if is_error { Some(true) } else { None },
        }
    }

    /// View a tool_use block as a [`ToolCall`].
    pub fn as_tool_call(&self) -> Option<ToolCall> {
        if self.block_type != ContentBlockType::ToolUse {
            return None;
        }
        Some(ToolCall {
            id: self.id.clone()?,
            name: self.name.clone()?,
            input: self.input.clone().unwrap_or_else(|| Value::Object(Map::new())),
        })
    }
}

/// Message content - either a simple string or structured content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        MessageContent::Blocks(blocks)
    }
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identity; survives in-place rewrites of tool calls.
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a user message with text content.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(content.into()))
    }

    /// Create an assistant message with text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(content.into()))
    }

    /// Create a system message with text content.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(content.into()))
    }

    /// Create a message with content blocks.
    pub fn with_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self::new(role, MessageContent::Blocks(blocks))
    }

    /// Create an assistant message that carries tool calls.
    pub fn assistant_tool_calls(text: &str, calls: &[ToolCall]) -> Self {
        let mut blocks = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            blocks.push(ContentBlock::text(text));
        }
        blocks.extend(
            calls
                .iter()
                .map(|c| ContentBlock::tool_use(&c.id, &c.name, c.input.clone())),
        );
        Self::with_blocks(Role::Assistant, blocks)
    }

    /// Create the message that feeds a tool's output back to the model.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::with_blocks(
            Role::User,
            vec![ContentBlock::tool_result(tool_use_id, content, is_error)],
        )
    }

    fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: new_message_id(),
            role,
            content,
        }
    }

    /// Get text content if this message has simple text content.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(s) => Some(s),
            MessageContent::Blocks(_) => None,
        }
    }

    /// Get content blocks if this message has structured content.
    pub fn as_blocks(&self) -> Option<&[ContentBlock]> {
        match &self.content {
            MessageContent::Text(_) => None,
            MessageContent::Blocks(blocks) => Some(blocks),
        }
    }

    /// Human-readable content: plain text, text blocks, or tool output.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b.block_type {
                    ContentBlockType::Text => b.text.as_deref(),
                    ContentBlockType::ToolResult => b.content.as_deref(),
                    ContentBlockType::ToolUse => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Tool calls carried by this message, in order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.as_blocks()
            .map(|blocks| blocks.iter().filter_map(ContentBlock::as_tool_call).collect())
            .unwrap_or_default()
    }

    /// The tool_result block, if this message feeds tool output back.
    pub fn tool_result_block(&self) -> Option<&ContentBlock> {
        self.as_blocks()?
            .iter()
            .find(|b| b.block_type == ContentBlockType::ToolResult)
    }

    pub fn is_tool_result(&self) -> bool {
        self.tool_result_block().is_some()
    }
}

// ============================================================================
// Tool Definitions
// ============================================================================

/// JSON Schema for tool input parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String, // Always "object"
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    /// Remaining root keywords (`$defs`, `additionalProperties`, ...),
    /// passed through so local references keep resolving.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputSchema {
    /// Create a new input schema with object type.
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: Map::new(),
            required: None,
            extra: Map::new(),
        }
    }

    /// Add a property to the schema.
    pub fn with_property(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Mark properties as required.
    pub fn with_required(mut self, required: Vec<String>) -> Self {
        self.required = Some(required);
        self
    }

    /// Build from an arbitrary JSON Schema value.
    ///
    /// The root is always an object schema; every other root keyword is
    /// kept as is. A non-object value becomes an empty schema.
    pub fn from_json_schema(schema: &Value) -> Self {
        let mut input_schema = Self::new();

        if let Some(root) = schema.as_object() {
            input_schema.extra = root
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "type" | "properties" | "required"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
        }

        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            input_schema.properties = props.clone();
        }

        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            let fields: Vec<String> = required
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
            if !fields.is_empty() {
                input_schema.required = Some(fields);
            }
        }

        input_schema
    }
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Definition of a tool that can be bound to a model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: InputSchema::new(),
        }
    }

    /// Set the input schema for this tool.
    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.input_schema = schema;
        self
    }
}

/// A call to a tool made by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

// ============================================================================
// Token Usage & Provider Response
// ============================================================================

/// Token usage information from a provider response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Get total tokens (input + output).
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Reason why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Response from a decision provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Main text content of the response
    pub content: String,
    /// Tool calls made by the model
    pub tool_calls: Vec<ToolCall>,
    /// Reason for stopping generation
    pub stop_reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ProviderResponse {
    /// Create a text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: None,
        }
    }

    /// Create a response carrying a single tool call.
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                input,
            }],
            stop_reason: StopReason::ToolUse,
            usage: None,
        }
    }

    /// Check if this response contains tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for a provider instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL for the API endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model identifier to use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Sampling temperature (0.0 - 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Request timeout in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ProviderConfig {
    /// Create a new provider config with API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            model: Some(model.into()),
            ..Default::default()
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

use crate::error::ProviderError;
use async_trait::async_trait;

/// The decision collaborator: a chat model that may call bound tools.
///
/// The router and the orchestrator only ever see this trait, so tests can
/// script replies without a network.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send a chat completion request to the model.
    ///
    /// # Arguments
    /// * `messages` - Conversation history
    /// * `tools` - Optional tool definitions for function calling
    /// * `system_prompt` - Optional system prompt
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Get the name of this provider for display purposes.
    fn name(&self) -> &str;

    /// Get the current model being used.
    fn model(&self) -> &str;
}

/// A boxed provider for dynamic dispatch.
pub type BoxedProvider = Box<dyn Provider>;

/// Arc-wrapped provider for shared ownership.
pub type SharedProvider = std::sync::Arc<dyn Provider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello, world!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.as_text(), Some("Hello, world!"));
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::user("a");
        let b = Message::user("a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_assistant_tool_calls() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "get_forecast".to_string(),
            input: serde_json::json!({"city": "Paris"}),
        };
        let msg = Message::assistant_tool_calls("", &[call.clone()]);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.tool_calls(), vec![call]);
        assert_eq!(msg.as_blocks().unwrap().len(), 1);
    }

    #[test]
    fn test_tool_result_message() {
        let msg = Message::tool_result("call_1", "sunny", false);
        assert!(msg.is_tool_result());
        assert_eq!(msg.text(), "sunny");
        let block = msg.tool_result_block().unwrap();
        assert_eq!(block.tool_use_id.as_deref(), Some("call_1"));
        assert_eq!(block.is_error, None);
    }

    #[test]
    fn test_text_skips_tool_use() {
        let msg = Message::with_blocks(
            Role::Assistant,
            vec![
                ContentBlock::text("checking"),
                ContentBlock::tool_use("1", "lookup", serde_json::json!({})),
            ],
        );
        assert_eq!(msg.text(), "checking");
        assert!(!msg.is_tool_result());
    }

    #[test]
    fn test_input_schema_from_json_schema() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "city": {"type": "string"},
                "days": {"type": "integer"}
            },
            "required": ["city"]
        });
        let input = InputSchema::from_json_schema(&schema);
        assert_eq!(input.properties.len(), 2);
        assert_eq!(input.required, Some(vec!["city".to_string()]));

        let keys: Vec<_> = input.properties.keys().cloned().collect();
        assert_eq!(keys, vec!["city", "days"]);
    }

    #[test]
    fn test_input_schema_from_non_object() {
        let input = InputSchema::from_json_schema(&serde_json::json!("nope"));
        assert!(input.properties.is_empty());
        assert!(input.required.is_none());
    }

    #[test]
    fn test_provider_response() {
        let response = ProviderResponse::text("Hello!");
        assert_eq!(response.content, "Hello!");
        assert!(!response.has_tool_calls());
        assert_eq!(response.stop_reason, StopReason::EndTurn);

        let call = ProviderResponse::tool_call("c1", "t", serde_json::json!({}));
        assert!(call.has_tool_calls());
        assert_eq!(call.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_message_serialization_roundtrips_id() {
        let msg = Message::user("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, msg.id);
    }

    #[test]
    fn test_message_without_id_gets_one() {
        let back: Message = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert!(!back.id.is_empty());
    }
}
