// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire-level MCP types for capability listings and tool results.
//!
//! Field names follow the protocol (`inputSchema`, `mimeType`, `isError`)
//! so list replies deserialize directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A tool as listed by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for tool input.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

impl McpToolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema: empty_object_schema(),
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// A prompt as listed by `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpPromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl McpPromptInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
        }
    }
}

/// A resource as listed by `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResourceInfo {
    #[serde(default)]
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl McpResourceInfo {
    pub fn new(uri: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: Some(description.into()),
            mime_type: None,
        }
    }
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolResult {
    /// Result content (text, images, etc.).
    pub content: Vec<McpContent>,

    /// Whether the server reported an execution error.
    #[serde(default)]
    pub is_error: bool,
}

impl McpToolResult {
    /// Create a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Render the content as the observation text fed back to the model.
    ///
    /// Images are summarized by mime type; resources contribute their text
    /// or, failing that, their URI.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                McpContent::Text { text } => text.clone(),
                McpContent::Image { mime_type, .. } => format!("[image: {}]", mime_type),
                McpContent::Resource { uri, text, .. } => {
                    text.clone().unwrap_or_else(|| format!("[resource: {}]", uri))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content types that can be returned by MCP tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    /// Plain text content.
    Text {
        /// The text content.
        text: String,
    },

    /// Image content.
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type of the image.
        mime_type: String,
    },

    /// Resource reference.
    Resource {
        uri: String,
        mime_type: Option<String>,
        text: Option<String>,
    },
}

impl McpContent {
    /// Parse one entry of a `tools/call` result's `content` array.
    pub fn from_wire(value: &Value) -> Option<Self> {
        match value.get("type")?.as_str()? {
            "text" => Some(Self::Text {
                text: value.get("text")?.as_str()?.to_string(),
            }),
            "image" => Some(Self::Image {
                data: value.get("data")?.as_str()?.to_string(),
                mime_type: value.get("mimeType")?.as_str()?.to_string(),
            }),
            "resource" => {
                let resource = value.get("resource")?;
                Some(Self::Resource {
                    uri: resource.get("uri")?.as_str()?.to_string(),
                    mime_type: resource
                        .get("mimeType")
                        .and_then(|m| m.as_str())
                        .map(String::from),
                    text: resource
                        .get("text")
                        .and_then(|t| t.as_str())
                        .map(String::from),
                })
            }
            _ => None,
        }
    }
}

/// Server information reported during initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub protocol_version: Option<String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "0.0.0".to_string(),
            protocol_version: None,
        }
    }
}
