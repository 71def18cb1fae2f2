// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAPI-backed tool schemas.
//!
//! Servers launched through the OpenAPI adapter expose one tool per
//! operation but publish thin input schemas. The real parameter shapes are
//! recovered from the interface description: path-level and
//! operation-level parameters plus the JSON request body are flattened into
//! one object schema, with local `$ref`s inlined.
//!
//! Everything here is pure apart from [`InterfaceSpec::load`].

use std::path::Path;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::warn;

use super::tools::ToolSchema;
use super::types::McpToolInfo;

/// HTTP methods that can carry an operation, in the order they are scanned.
const HTTP_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Parameter locations merged into the flat schema.
const PARAMETER_LOCATIONS: &[&str] = &["path", "query", "header", "cookie"];

/// Limit on nested `$ref` expansion; deeper references become `{}`.
const MAX_REF_DEPTH: usize = 16;

/// Errors turning an interface description into tool parameters.
#[derive(Debug, Error)]
pub enum SchemaResolutionError {
    #[error("Failed to read interface description {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid interface description: {0}")]
    Parse(String),

    #[error("Operation '{0}' not found in interface description")]
    OperationNotFound(String),
}

/// A parsed OpenAPI document.
#[derive(Debug, Clone)]
pub struct InterfaceSpec {
    document: Value,
}

impl InterfaceSpec {
    pub fn from_value(document: Value) -> Self {
        Self { document }
    }

    /// Parse a JSON or YAML document.
    pub fn parse(text: &str) -> Result<Self, SchemaResolutionError> {
        // YAML is a superset of JSON, one parser covers both
        let document: Value =
            serde_yaml::from_str(text).map_err(|e| SchemaResolutionError::Parse(e.to_string()))?;
        if !document.is_object() {
            return Err(SchemaResolutionError::Parse(
                "document root is not a mapping".to_string(),
            ));
        }
        Ok(Self { document })
    }

    /// Read and parse a document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaResolutionError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SchemaResolutionError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Every operation in document order.
    pub fn operations(&self) -> Vec<OperationRef<'_>> {
        let Some(paths) = self.document.get("paths").and_then(Value::as_object) else {
            return Vec::new();
        };

        let mut operations = Vec::new();
        for (path, item) in paths {
            for (method, operation) in item.as_object().into_iter().flatten() {
                if !HTTP_METHODS.contains(&method.as_str()) || !operation.is_object() {
                    continue;
                }
                let operation_id = operation
                    .get("operationId")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| synthesize_operation_id(method, path));
                operations.push(OperationRef {
                    operation_id,
                    path,
                    method,
                    path_item: item,
                    operation,
                });
            }
        }
        operations
    }

    /// Inline a local reference, following chains up to the depth limit.
    fn deref<'a>(&'a self, value: &'a Value, depth: usize) -> Option<&'a Value> {
        match value.get("$ref").and_then(Value::as_str) {
            Some(reference) if depth < MAX_REF_DEPTH => {
                let target = self.document.pointer(reference.strip_prefix('#')?)?;
                self.deref(target, depth + 1)
            }
            Some(_) => None,
            None => Some(value),
        }
    }

    /// Recursively inline every local `$ref` within `value`.
    ///
    /// A reference already being expanded further up the same path is a
    /// cycle and becomes `{}`, so recursive schemas inline one level deep.
    fn inline_refs(&self, value: &Value) -> Value {
        self.inline_on_path(value, &mut Vec::new())
    }

    fn inline_on_path(&self, value: &Value, active: &mut Vec<String>) -> Value {
        match value {
            Value::Object(map) => {
                if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                    if active.len() >= MAX_REF_DEPTH || active.iter().any(|r| r == reference) {
                        return json!({});
                    }
                    let Some(target) = reference
                        .strip_prefix('#')
                        .and_then(|pointer| self.document.pointer(pointer))
                    else {
                        return json!({});
                    };
                    active.push(reference.to_string());
                    let inlined = self.inline_on_path(target, active);
                    active.pop();
                    return inlined;
                }
                let inlined: Map<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), self.inline_on_path(v, active)))
                    .collect();
                Value::Object(inlined)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.inline_on_path(v, active))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// One operation located in an [`InterfaceSpec`].
#[derive(Debug, Clone)]
pub struct OperationRef<'a> {
    pub operation_id: String,
    pub path: &'a str,
    pub method: &'a str,
    path_item: &'a Value,
    operation: &'a Value,
}

/// Flattened argument schema plus the operation it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameters {
    pub schema: Value,
    /// `operationId`, `path`, `method` and the raw `operation` object.
    pub metadata: Value,
}

/// Resolve the parameters of one operation by id.
pub fn resolve_operation(
    spec: &InterfaceSpec,
    operation_id: &str,
) -> Result<ToolParameters, SchemaResolutionError> {
    spec.operations()
        .iter()
        .find(|op| op.operation_id == operation_id)
        .map(|op| build_parameters(spec, op))
        .ok_or_else(|| SchemaResolutionError::OperationNotFound(operation_id.to_string()))
}

/// Parameters for every operation, in document order.
pub fn derive_tools(spec: &InterfaceSpec) -> Vec<ToolParameters> {
    spec.operations()
        .iter()
        .map(|op| build_parameters(spec, op))
        .collect()
}

/// Combine the tools a server listed with schemas from its interface
/// description.
///
/// A listed name that is an operation id is matched by name. Remaining
/// tools are paired with operations by position; anything left over keeps
/// its native schema.
pub fn adapt_tools(spec: &InterfaceSpec, listed: Vec<McpToolInfo>) -> Vec<ToolSchema> {
    let derived = derive_tools(spec);
    if derived.len() != listed.len() {
        warn!(
            listed = listed.len(),
            derived = derived.len(),
            "Tool count differs from interface description"
        );
    }

    listed
        .into_iter()
        .enumerate()
        .map(|(position, info)| match resolve_operation(spec, &info.name) {
            Ok(resolved) => ToolSchema::from_adapted(info, resolved),
            Err(_) => match derived.get(position) {
                Some(resolved) => ToolSchema::from_adapted(info, resolved.clone()),
                None => ToolSchema::from_native(info),
            },
        })
        .collect()
}

fn build_parameters(spec: &InterfaceSpec, op: &OperationRef<'_>) -> ToolParameters {
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();

    let path_level = op.path_item.get("parameters").and_then(Value::as_array);
    let op_level = op.operation.get("parameters").and_then(Value::as_array);

    // Operation-level parameters override path-level ones with the same name
    for param in path_level.into_iter().chain(op_level).flatten() {
        let Some(param) = spec.deref(param, 0) else {
            continue;
        };
        let Some(name) = param.get("name").and_then(Value::as_str) else {
            continue;
        };
        let location = param.get("in").and_then(Value::as_str).unwrap_or("query");
        if !PARAMETER_LOCATIONS.contains(&location) {
            continue;
        }

        let mut schema = param
            .get("schema")
            .map(|s| spec.inline_refs(s))
            .unwrap_or_else(|| json!({"type": "string"}));
        if let (Some(description), Some(obj)) = (param.get("description"), schema.as_object_mut()) {
            obj.entry("description").or_insert_with(|| description.clone());
        }
        properties.insert(name.to_string(), schema);

        let is_required = location == "path"
            || param.get("required").and_then(Value::as_bool).unwrap_or(false);
        required.retain(|r| r != name);
        if is_required {
            required.push(name.to_string());
        }
    }

    if let Some(body) = op.operation.get("requestBody").and_then(|b| spec.deref(b, 0)) {
        merge_request_body(spec, body, &mut properties, &mut required);
    }

    ToolParameters {
        schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
        metadata: json!({
            "operationId": op.operation_id,
            "path": op.path,
            "method": op.method,
            "operation": op.operation,
        }),
    }
}

fn merge_request_body(
    spec: &InterfaceSpec,
    body: &Value,
    properties: &mut Map<String, Value>,
    required: &mut Vec<String>,
) {
    let Some(content) = body.get("content").and_then(Value::as_object) else {
        return;
    };
    let media = content
        .get("application/json")
        .or_else(|| content.values().next());
    let Some(schema) = media.and_then(|m| m.get("schema")) else {
        return;
    };
    let schema = spec.inline_refs(schema);
    let body_required = body.get("required").and_then(Value::as_bool).unwrap_or(false);

    match schema.get("properties").and_then(Value::as_object) {
        Some(body_props) => {
            for (name, prop) in body_props {
                properties.insert(name.clone(), prop.clone());
            }
            let names = schema
                .get("required")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str);
            for name in names {
                if !required.iter().any(|r| r == name) {
                    required.push(name.to_string());
                }
            }
        }
        None => {
            properties.insert("body".to_string(), schema);
            if body_required && !required.iter().any(|r| r == "body") {
                required.push("body".to_string());
            }
        }
    }
}

/// Id for operations that do not declare one, e.g. `get_pets_petId`.
fn synthesize_operation_id(method: &str, path: &str) -> String {
    let mut id = method.to_string();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        id.push('_');
        id.extend(
            segment
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_'),
        );
    }
    id
}
