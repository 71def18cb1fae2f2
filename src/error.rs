// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the router.
//!
//! Errors that belong to one layer live next to it (`mcp::McpError`,
//! `mcp::SessionError`, `index::IndexError`, ...). This module holds the
//! ones shared across layers plus [`RoutingError`], the error a turn can
//! surface to its caller.

use thiserror::Error;

use crate::index::IndexError;

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("API error: {message}")]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl ProviderError {
    /// Create an API error with status code.
    pub fn api(message: impl Into<String>, status_code: u16) -> Self {
        Self::ApiError {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::NetworkError(_) | Self::Timeout(_)
        )
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors that end a routing turn early.
///
/// Session failures, tool failures and malformed model replies never show
/// up here; they degrade into conversation text instead.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_retryable() {
        assert!(ProviderError::RateLimited("wait 1s".to_string()).is_retryable());
        assert!(ProviderError::NetworkError("timeout".to_string()).is_retryable());
        assert!(ProviderError::Timeout(30000).is_retryable());
        assert!(!ProviderError::AuthError("invalid key".to_string()).is_retryable());
        assert!(!ProviderError::ModelNotFound("gpt-5".to_string()).is_retryable());
    }

    #[test]
    fn test_provider_error_api() {
        let err = ProviderError::api("Bad request", 400);
        match err {
            ProviderError::ApiError { message, status_code } => {
                assert_eq!(message, "Bad request");
                assert_eq!(status_code, Some(400));
            }
            _ => panic!("Expected ApiError"),
        }
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let config_err: ConfigError = result.unwrap_err().into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_config_error_from_io_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_routing_error_from_provider() {
        let err: RoutingError = ProviderError::AuthError("invalid".to_string()).into();
        assert!(matches!(err, RoutingError::Provider(_)));
        assert!(err.to_string().contains("invalid"));
    }
}
