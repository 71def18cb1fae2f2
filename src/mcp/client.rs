// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP client over a child process's stdio.
//!
//! Requests are newline-delimited JSON-RPC 2.0 objects written to the
//! child's stdin; replies are read line by line from its stdout until the
//! one carrying the request id shows up. Server-initiated notifications in
//! between are skipped.
//!
//! [`CapabilityClient`] and [`SessionLauncher`] are the seams the session
//! layer is written against, so the lifecycle logic can be exercised with
//! in-memory clients.

use std::process::Stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::config::ServerConfig;
use super::error::McpError;
use super::types::{McpContent, McpPromptInfo, McpResourceInfo, McpToolInfo, McpToolResult, ServerInfo};

/// Protocol revision sent in the initialize request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on followed `nextCursor` pages for one list request.
const MAX_LIST_PAGES: usize = 64;

/// One live connection to one capability server.
///
/// Implementations must release every OS resource in [`close`](Self::close)
/// and also when dropped without being closed.
#[async_trait]
pub trait CapabilityClient: Send {
    /// Perform the initialize handshake.
    async fn initialize(&mut self) -> Result<ServerInfo, McpError>;

    async fn list_tools(&mut self) -> Result<Vec<McpToolInfo>, McpError>;

    async fn list_prompts(&mut self) -> Result<Vec<McpPromptInfo>, McpError>;

    async fn list_resources(&mut self) -> Result<Vec<McpResourceInfo>, McpError>;

    /// Call a tool. Execution errors reported by the server come back as
    /// `Ok` with `is_error` set.
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<McpToolResult, McpError>;

    /// Tear the connection down. Idempotent.
    async fn close(&mut self);
}

/// Starts capability server connections.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Start the server process and return a client that has not yet
    /// performed the handshake.
    async fn launch(&self, name: &str, config: &ServerConfig) -> Result<Box<dyn CapabilityClient>, McpError>;
}

/// Launches servers as child processes speaking JSON-RPC over stdio.
#[derive(Debug, Clone, Default)]
pub struct StdioLauncher;

impl StdioLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionLauncher for StdioLauncher {
    async fn launch(&self, name: &str, config: &ServerConfig) -> Result<Box<dyn CapabilityClient>, McpError> {
        Ok(Box::new(StdioClient::spawn(name, config)?))
    }
}

/// Client for a single MCP server reached through a child process.
pub struct StdioClient {
    name: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    request_id: u64,
}

impl StdioClient {
    /// Spawn the configured process with piped stdin/stdout.
    ///
    /// The child is killed if this client is dropped before
    /// [`close`](CapabilityClient::close) runs.
    pub fn spawn(name: &str, config: &ServerConfig) -> Result<Self, McpError> {
        if config.command.trim().is_empty() {
            return Err(McpError::Config(format!("server '{}' has no command", name)));
        }

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        for (key, value) in config.expanded_env() {
            cmd.env(key, value);
        }

        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::connection_failed(name, e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connection_failed(name, "Failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connection_failed(name, "Failed to get stdout"))?;

        debug!(server = name, command = %config.command, "Spawned MCP server");

        Ok(Self {
            name: name.to_string(),
            child: Some(child),
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
            request_id: 0,
        })
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_request_id(&mut self) -> u64 {
        self.request_id += 1;
        self.request_id
    }

    async fn write_message(&mut self, message: &Value) -> Result<(), McpError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| McpError::Transport(format!("connection to '{}' is closed", self.name)))?;

        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        stdin.flush().await.map_err(|e| McpError::Transport(e.to_string()))?;
        Ok(())
    }

    /// Send a request and wait for the reply with the same id.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_request_id();
        let mut request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            request["params"] = params;
        }

        debug!(server = %self.name, method, id, "MCP request");
        self.write_message(&request).await?;

        let name = self.name.clone();
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| McpError::Transport(format!("connection to '{}' is closed", name)))?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| McpError::Transport(e.to_string()))?;
            if read == 0 {
                return Err(McpError::Transport(format!(
                    "'{}' closed its output while waiting for {}",
                    name, method
                )));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    warn!(server = %name, error = %e, "Skipping non-JSON line from server");
                    continue;
                }
            };

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                // Notification or a reply to something else
                continue;
            }

            if let Some(error) = message.get("error") {
                let code = error
                    .get("code")
                    .and_then(Value::as_i64)
                    .and_then(|c| i32::try_from(c).ok())
                    .unwrap_or(-1);
                let message = error
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown error");
                return Err(McpError::protocol(code, message));
            }

            return message
                .get("result")
                .cloned()
                .ok_or_else(|| McpError::InvalidResponse(format!("Missing result in {} response", method)));
        }
    }

    /// Run a paginated list request and collect every item under `key`.
    async fn list_all<T: DeserializeOwned>(&mut self, method: &str, key: &str) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request(method, params).await?;

            let page = result.get(key).cloned().unwrap_or(Value::Array(Vec::new()));
            let page: Vec<T> = serde_json::from_value(page)
                .map_err(|e| McpError::InvalidResponse(format!("{}: {}", method, e)))?;
            items.extend(page);

            let next = result
                .get("nextCursor")
                .and_then(|c| c.as_str())
                .map(String::from);
            match next {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        warn!(server = %self.name, method, "Stopped following list pagination");
        Ok(items)
    }
}

#[async_trait]
impl CapabilityClient for StdioClient {
    async fn initialize(&mut self) -> Result<ServerInfo, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcp-router",
                "version": crate::VERSION
            }
        });

        let result = self
            .request("initialize", Some(params))
            .await
            .map_err(|e| McpError::init_failed(&self.name, e.to_string()))?;

        let server_info = ServerInfo {
            name: result
                .get("serverInfo")
                .and_then(|s| s.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            version: result
                .get("serverInfo")
                .and_then(|s| s.get("version"))
                .and_then(|v| v.as_str())
                .unwrap_or("0.0.0")
                .to_string(),
            protocol_version: result
                .get("protocolVersion")
                .and_then(|v| v.as_str())
                .map(String::from),
        };

        self.write_message(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .await
        .map_err(|e| McpError::init_failed(&self.name, e.to_string()))?;

        Ok(server_info)
    }

    async fn list_tools(&mut self) -> Result<Vec<McpToolInfo>, McpError> {
        self.list_all("tools/list", "tools").await
    }

    async fn list_prompts(&mut self) -> Result<Vec<McpPromptInfo>, McpError> {
        self.list_all("prompts/list", "prompts").await
    }

    async fn list_resources(&mut self) -> Result<Vec<McpResourceInfo>, McpError> {
        self.list_all("resources/list", "resources").await
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        let params = json!({
            "name": name,
            "arguments": arguments
        });

        let result = match self.request("tools/call", Some(params)).await {
            Ok(result) => result,
            Err(McpError::Protocol { message, .. }) => return Ok(McpToolResult::error(message)),
            Err(e) => return Err(e),
        };

        let is_error = result
            .get("isError")
            .and_then(|e| e.as_bool())
            .unwrap_or(false);

        let content = result
            .get("content")
            .and_then(|c| c.as_array())
            .map(|items| items.iter().filter_map(McpContent::from_wire).collect())
            .unwrap_or_default();

        Ok(McpToolResult { content, is_error })
    }

    async fn close(&mut self) {
        // Closing stdin lets well-behaved servers exit on their own
        self.stdin.take();
        self.stdout.take();

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!(server = %self.name, error = %e, "Process already exited");
            }
            if let Err(e) = child.wait().await {
                warn!(server = %self.name, error = %e, "Failed to reap MCP server process");
            }
        }
    }
}

impl Drop for StdioClient {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}
