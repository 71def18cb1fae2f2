// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP error types.

use thiserror::Error;

use super::openapi::SchemaResolutionError;

/// Errors raised while talking to a single capability server.
#[derive(Debug, Error)]
pub enum McpError {
    /// Process could not be spawned or its pipes were unavailable.
    #[error("Failed to connect to MCP server '{server}': {message}")]
    ConnectionFailed { server: String, message: String },

    /// Initialization failed.
    #[error("Failed to initialize MCP server '{server}': {message}")]
    InitializationFailed { server: String, message: String },

    /// Invalid response from server.
    #[error("Invalid response from MCP server: {0}")]
    InvalidResponse(String),

    /// Transport error (broken pipe, closed stream).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol error (JSON-RPC).
    #[error("Protocol error: code={code}, message={message}")]
    Protocol { code: i32, message: String },

    /// Interface description could not be turned into tool schemas.
    #[error(transparent)]
    Schema(#[from] SchemaResolutionError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a connection failed error.
    pub fn connection_failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create an initialization failed error.
    pub fn init_failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(code: i32, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }
}

/// Failure of one session. Fatal to that session only.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server process could not be started.
    #[error("Failed to launch '{server}': {source}")]
    Launch {
        server: String,
        #[source]
        source: McpError,
    },

    /// The process started but the initialize handshake failed.
    #[error("Handshake with '{server}' failed: {source}")]
    Handshake {
        server: String,
        #[source]
        source: McpError,
    },

    /// The single operation of the session failed.
    #[error("Operation on '{server}' failed: {source}")]
    Operation {
        server: String,
        #[source]
        source: McpError,
    },
}

impl SessionError {
    /// Name of the server whose session failed.
    pub fn server(&self) -> &str {
        match self {
            Self::Launch { server, .. }
            | Self::Handshake { server, .. }
            | Self::Operation { server, .. } => server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::protocol(-32600, "Invalid Request");
        assert!(err.to_string().contains("-32600"));
        assert!(err.to_string().contains("Invalid Request"));
    }

    #[test]
    fn test_error_helpers() {
        let err = McpError::connection_failed("server", "connection refused");
        assert!(matches!(err, McpError::ConnectionFailed { .. }));

        let err = McpError::init_failed("server", "handshake failed");
        assert!(matches!(err, McpError::InitializationFailed { .. }));
    }

    #[test]
    fn test_session_error_server() {
        let err = SessionError::Handshake {
            server: "weather".to_string(),
            source: McpError::init_failed("weather", "bad version"),
        };
        assert_eq!(err.server(), "weather");
        assert!(err.to_string().contains("Handshake with 'weather'"));
    }
}
