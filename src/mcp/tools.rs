// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Uniform callable-tool schema.
//!
//! Native servers describe their tools directly; adapted servers get their
//! schemas from an OpenAPI document (see [`super::openapi`]). Both end up as
//! a [`ToolSchema`] that the orchestrator binds to the model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::openapi::ToolParameters;
use super::types::McpToolInfo;
use crate::types::{InputSchema, ToolDefinition};

/// Longest tool description passed on to the model, in characters.
pub const MAX_TOOL_DESCRIPTION_CHARS: usize = 1024;

/// Appended to descriptions cut at [`MAX_TOOL_DESCRIPTION_CHARS`].
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// A tool as presented to the decision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema object for the arguments.
    pub parameters: Value,
    /// Adapter data for tools derived from an interface description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: &str, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: truncate_description(description),
            parameters: normalize_parameters(parameters),
            metadata: None,
        }
    }

    /// Build the schema for a tool listed by a native server.
    pub fn from_native(info: McpToolInfo) -> Self {
        Self::new(
            info.name,
            info.description.as_deref().unwrap_or_default(),
            info.input_schema,
        )
    }

    /// Build the schema for a listed tool whose parameters were resolved
    /// from an interface description.
    pub fn from_adapted(info: McpToolInfo, resolved: ToolParameters) -> Self {
        let mut schema = Self::new(
            info.name,
            info.description.as_deref().unwrap_or_default(),
            resolved.schema,
        );
        schema.metadata = Some(resolved.metadata);
        schema
    }

    /// Whether this tool came from an interface description.
    pub fn is_adapted(&self) -> bool {
        self.metadata.is_some()
    }

    /// Convert to a provider tool definition.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, &self.description)
            .with_schema(InputSchema::from_json_schema(&self.parameters))
    }
}

/// Cut `description` to the character limit, marking the cut.
pub fn truncate_description(description: &str) -> String {
    if description.chars().count() <= MAX_TOOL_DESCRIPTION_CHARS {
        return description.to_string();
    }
    let mut truncated: String = description.chars().take(MAX_TOOL_DESCRIPTION_CHARS).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

fn normalize_parameters(parameters: Value) -> Value {
    match parameters {
        Value::Object(map) if !map.is_empty() => Value::Object(map),
        _ => serde_json::json!({"type": "object", "properties": {}}),
    }
}
