// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One-shot capability sessions.
//!
//! A session launches a server, performs the handshake, runs exactly one
//! [`SessionOperation`], and closes the connection on every exit path.
//! Nothing is shared between sessions: each call gets its own process and
//! pipes.
//!
//! Cancellation: if the future returned by [`with_session`] is dropped, the
//! boxed client is dropped with it and the client's `Drop` kills the process.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::client::{CapabilityClient, SessionLauncher};
use super::config::ServerConfig;
use super::enumerate::describe_capabilities;
use super::error::{McpError, SessionError};
use super::openapi::{adapt_tools, InterfaceSpec};
use super::tools::ToolSchema;
use super::types::McpToolResult;

/// The single operation a session performs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOperation {
    /// List tools, prompts and resources and render the capability
    /// description.
    EnumerateCapabilities,
    /// List tools as uniform schemas.
    ListTools,
    /// List tools and take their parameters from an OpenAPI document.
    ListOpenApiTools { interface_spec: String },
    /// Call one tool.
    InvokeTool { name: String, arguments: Value },
}

impl SessionOperation {
    /// Short name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EnumerateCapabilities => "enumerate",
            Self::ListTools => "list_tools",
            Self::ListOpenApiTools { .. } => "list_openapi_tools",
            Self::InvokeTool { .. } => "invoke_tool",
        }
    }
}

/// What a session produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    Capabilities(String),
    Tools(Vec<ToolSchema>),
    ToolResult(McpToolResult),
}

/// Run `operation` against server `name` in a fresh session.
pub async fn with_session(
    launcher: &dyn SessionLauncher,
    name: &str,
    config: &ServerConfig,
    operation: SessionOperation,
) -> Result<SessionOutput, SessionError> {
    let start = Instant::now();
    let kind = operation.kind();
    info!(server = name, operation = kind, "Starting session");

    let mut client = launcher
        .launch(name, config)
        .await
        .map_err(|source| SessionError::Launch {
            server: name.to_string(),
            source,
        })?;

    let result = run_operation(client.as_mut(), name, operation).await;

    // close() is infallible, so the operation's error is what surfaces
    client.close().await;

    #[cfg(feature = "telemetry")]
    GLOBAL_METRICS.record_operation(&format!("mcp.session.{}", kind), start.elapsed());

    info!(
        server = name,
        operation = kind,
        ok = result.is_ok(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Session closed"
    );

    result
}

async fn run_operation(
    client: &mut dyn CapabilityClient,
    name: &str,
    operation: SessionOperation,
) -> Result<SessionOutput, SessionError> {
    let server_info = client.initialize().await.map_err(|source| SessionError::Handshake {
        server: name.to_string(),
        source,
    })?;
    debug!(server = name, remote = %server_info.name, version = %server_info.version, "Handshake complete");

    let operation_error = |source: McpError| SessionError::Operation {
        server: name.to_string(),
        source,
    };

    match operation {
        SessionOperation::EnumerateCapabilities => {
            Ok(SessionOutput::Capabilities(describe_capabilities(client, name).await))
        }
        SessionOperation::ListTools => {
            let tools = client.list_tools().await.map_err(operation_error)?;
            Ok(SessionOutput::Tools(
                tools.into_iter().map(ToolSchema::from_native).collect(),
            ))
        }
        SessionOperation::ListOpenApiTools { interface_spec } => {
            let listed = client.list_tools().await.map_err(operation_error)?;
            let spec = InterfaceSpec::load(&interface_spec)
                .map_err(|e| operation_error(McpError::Schema(e)))?;
            Ok(SessionOutput::Tools(adapt_tools(&spec, listed)))
        }
        SessionOperation::InvokeTool { name: tool, arguments } => {
            let result = client.call_tool(&tool, arguments).await.map_err(operation_error)?;
            Ok(SessionOutput::ToolResult(result))
        }
    }
}

fn unexpected_output(name: &str, output: SessionOutput) -> SessionError {
    SessionError::Operation {
        server: name.to_string(),
        source: McpError::InvalidResponse(format!("unexpected session output: {:?}", output)),
    }
}

/// Render the capability description of one server.
pub async fn enumerate_capabilities(
    launcher: &dyn SessionLauncher,
    name: &str,
    config: &ServerConfig,
) -> Result<String, SessionError> {
    match with_session(launcher, name, config, SessionOperation::EnumerateCapabilities).await? {
        SessionOutput::Capabilities(description) => Ok(description),
        other => Err(unexpected_output(name, other)),
    }
}

/// Fetch the tool schemas of one server, using its interface description
/// when it is launched through the OpenAPI adapter.
pub async fn list_tool_schemas(
    launcher: &dyn SessionLauncher,
    name: &str,
    config: &ServerConfig,
) -> Result<Vec<ToolSchema>, SessionError> {
    let operation = match config.interface_spec_path() {
        Some(path) => SessionOperation::ListOpenApiTools {
            interface_spec: path.to_string_lossy().into_owned(),
        },
        None => SessionOperation::ListTools,
    };
    match with_session(launcher, name, config, operation).await? {
        SessionOutput::Tools(tools) => Ok(tools),
        other => Err(unexpected_output(name, other)),
    }
}

/// Call one tool on one server.
pub async fn invoke_tool(
    launcher: &dyn SessionLauncher,
    name: &str,
    config: &ServerConfig,
    tool: &str,
    arguments: Value,
) -> Result<McpToolResult, SessionError> {
    let operation = SessionOperation::InvokeTool {
        name: tool.to_string(),
        arguments,
    };
    match with_session(launcher, name, config, operation).await? {
        SessionOutput::ToolResult(result) => Ok(result),
        other => Err(unexpected_output(name, other)),
    }
}
