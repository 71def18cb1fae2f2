// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedding providers for the capability index.
//!
//! Provides abstraction over different embedding APIs (OpenAI, Ollama).

mod base;
mod ollama;
mod openai;

use std::sync::Arc;

pub use base::EmbeddingProvider;
pub use ollama::{OllamaEmbeddingProvider, DEFAULT_OLLAMA_EMBEDDING_MODEL};
pub use openai::{OpenAIEmbeddingProvider, DEFAULT_OPENAI_EMBEDDING_MODEL};

use crate::config::ResolvedEmbeddingConfig;

use super::IndexError;

/// Supported embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProviderType {
    OpenAI,
    Ollama,
}

impl std::str::FromStr for EmbeddingProviderType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "openai-compatible" | "openai_compatible" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            other => Err(IndexError::NotConfigured(format!(
                "Unknown embedding provider: {}",
                other
            ))),
        }
    }
}

/// Create an embedding provider based on configuration.
pub fn create_embedding_provider(
    config: &ResolvedEmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, IndexError> {
    match config.provider.parse::<EmbeddingProviderType>()? {
        EmbeddingProviderType::OpenAI => {
            let model = config
                .model
                .as_deref()
                .unwrap_or(DEFAULT_OPENAI_EMBEDDING_MODEL);
            let provider = OpenAIEmbeddingProvider::new(model, None, config.base_url.as_deref())?;
            Ok(Arc::new(provider))
        }
        EmbeddingProviderType::Ollama => {
            let model = config
                .model
                .as_deref()
                .unwrap_or(DEFAULT_OLLAMA_EMBEDDING_MODEL);
            Ok(Arc::new(OllamaEmbeddingProvider::new(
                model,
                config.base_url.as_deref(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_from_str() {
        assert_eq!("ollama".parse::<EmbeddingProviderType>().unwrap(), EmbeddingProviderType::Ollama);
        assert_eq!("OpenAI".parse::<EmbeddingProviderType>().unwrap(), EmbeddingProviderType::OpenAI);
        assert!("voyage".parse::<EmbeddingProviderType>().is_err());
    }

    #[test]
    fn test_create_ollama_default_model() {
        let config = ResolvedEmbeddingConfig {
            provider: "ollama".to_string(),
            model: None,
            base_url: None,
        };
        let provider = create_embedding_provider(&config).unwrap();
        assert_eq!(provider.name(), "Ollama");
        assert_eq!(provider.model(), DEFAULT_OLLAMA_EMBEDDING_MODEL);
    }
}
