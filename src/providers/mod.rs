// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Decision providers.
//!
//! Routing decisions, query rewriting and tool selection are all made by a
//! chat model behind the [`Provider`](crate::types::Provider) trait. The one
//! concrete backend is [`openai::OpenAIProvider`], which covers OpenAI,
//! Ollama and any OpenAI-compatible endpoint.
//!
//! ```rust,ignore
//! use mcp_router::providers::{create_provider, ProviderType};
//! use mcp_router::types::ProviderConfig;
//!
//! let config = ProviderConfig::new("your-api-key", "gpt-4o");
//! let provider = create_provider(ProviderType::OpenAI, config)?;
//! ```

pub mod openai;

pub use openai::OpenAIProvider;

use crate::config::ResolvedConfig;
use crate::error::ProviderError;
use crate::types::{BoxedProvider, ProviderConfig};

/// Supported provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    /// OpenAI GPT models
    OpenAI,
    /// Ollama local models
    Ollama,
    /// Any OpenAI-compatible API
    OpenAICompatible,
}

impl ProviderType {
    /// Get the default model for this provider.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o",
            Self::Ollama => "llama3.2",
            Self::OpenAICompatible => "gpt-4o",
        }
    }

    /// Get the default base URL for this provider.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => openai::OPENAI_BASE_URL,
            Self::Ollama => openai::OLLAMA_BASE_URL,
            Self::OpenAICompatible => openai::OPENAI_BASE_URL,
        }
    }

    /// Check if this provider requires an API key.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAI)
    }
}

/// Error type for parsing a provider type from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseProviderTypeError;

impl std::fmt::Display for ParseProviderTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid provider type")
    }
}

impl std::error::Error for ParseProviderTypeError {}

impl std::str::FromStr for ProviderType {
    type Err = ParseProviderTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "gpt" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "openai-compatible" | "openai_compatible" => Ok(Self::OpenAICompatible),
            _ => Err(ParseProviderTypeError),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "OpenAI"),
            Self::Ollama => write!(f, "Ollama"),
            Self::OpenAICompatible => write!(f, "OpenAI-Compatible"),
        }
    }
}

/// Create a provider instance from type and configuration.
///
/// # Errors
///
/// Returns [`ProviderError::NotConfigured`] when OpenAI has no API key or an
/// OpenAI-compatible provider has no base URL.
pub fn create_provider(
    provider_type: ProviderType,
    config: ProviderConfig,
) -> Result<BoxedProvider, ProviderError> {
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| provider_type.default_model().to_string());

    match provider_type {
        ProviderType::OpenAI => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| ProviderError::NotConfigured("API key required for OpenAI".to_string()))?;

            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| provider_type.default_base_url().to_string());

            Ok(Box::new(OpenAIProvider::new(provider_type, Some(api_key), model, &base_url, config)))
        }
        ProviderType::Ollama => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| provider_type.default_base_url().to_string());

            Ok(Box::new(OpenAIProvider::new(provider_type, None, model, &base_url, config)))
        }
        ProviderType::OpenAICompatible => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                ProviderError::NotConfigured("base_url required for OpenAI-Compatible".to_string())
            })?;

            let api_key = config.api_key.clone();
            Ok(Box::new(OpenAIProvider::new(provider_type, api_key, model, &base_url, config)))
        }
    }
}

/// Create a provider from a resolved configuration.
///
/// `model_override` replaces the configured model; it is how per-stage
/// models (query rewriting, server selection, tool selection) are applied.
pub fn create_provider_from_config(
    config: &ResolvedConfig,
    model_override: Option<&str>,
) -> Result<BoxedProvider, ProviderError> {
    let provider_type: ProviderType = config.provider.parse().map_err(|_| {
        ProviderError::NotConfigured(format!("Unknown provider: {}", config.provider))
    })?;

    let provider_config = ProviderConfig {
        model: model_override.map(String::from).or_else(|| config.model.clone()),
        base_url: config.base_url.clone(),
        api_key: match provider_type {
            ProviderType::OpenAI | ProviderType::OpenAICompatible => {
                std::env::var("OPENAI_API_KEY").ok()
            }
            ProviderType::Ollama => None,
        },
        ..Default::default()
    };

    create_provider(provider_type, provider_config)
}
