// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ollama embedding provider.

use std::sync::Arc;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::index::IndexError;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::base::EmbeddingProvider;

/// Default Ollama embedding model.
pub const DEFAULT_OLLAMA_EMBEDDING_MODEL: &str = "nomic-embed-text";

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Ollama embedding provider. Ollama embeds one text per request, so
/// batches fan out with bounded concurrency.
#[derive(Clone)]
pub struct OllamaEmbeddingProvider {
    client: Client,
    model: String,
    base_url: String,
    request_semaphore: Arc<Semaphore>,
}

impl OllamaEmbeddingProvider {
    /// Max concurrent requests to Ollama.
    const MAX_CONCURRENT_REQUESTS: usize = 5;

    /// Create a new Ollama embedding provider.
    pub fn new(model: &str, base_url: Option<&str>) -> Self {
        let base_url = base_url
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/');

        Self {
            client: Client::new(),
            model: model.to_string(),
            base_url: base_url.to_string(),
            request_semaphore: Arc::new(Semaphore::new(Self::MAX_CONCURRENT_REQUESTS)),
        }
    }

    async fn request_embedding(&self, text: String) -> Result<Vec<f32>, IndexError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let _permit = self.request_semaphore.acquire().await.map_err(|e| {
            IndexError::Embedding(format!("Failed to acquire request permit: {}", e))
        })?;

        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::Embedding(format!("Ollama API request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IndexError::Embedding(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(IndexError::Embedding(format!(
                "Ollama API error ({}): {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            IndexError::Embedding(format!("Failed to parse embedding response: {}", e))
        })?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("index.embeddings.ollama.request", start.elapsed());

        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut tasks = JoinSet::new();
        for (idx, text) in texts.iter().enumerate() {
            let provider = self.clone();
            let text = text.clone();
            tasks.spawn(async move { (idx, provider.request_embedding(text).await) });
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        while let Some(joined) = tasks.join_next().await {
            let (idx, result) =
                joined.map_err(|e| IndexError::Embedding(format!("Embedding task failed: {}", e)))?;
            results[idx] = Some(result?);
        }

        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.ok_or_else(|| IndexError::Embedding(format!("Missing embedding for text {}", i)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_base_url() {
        let provider = OllamaEmbeddingProvider::new("test", Some("http://custom:8080/"));
        assert_eq!(provider.base_url, "http://custom:8080");
    }

    #[test]
    fn test_default_base_url() {
        let provider = OllamaEmbeddingProvider::new(DEFAULT_OLLAMA_EMBEDDING_MODEL, None);
        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(provider.model(), "nomic-embed-text");
    }

    #[tokio::test]
    async fn test_embed_empty() {
        let provider = OllamaEmbeddingProvider::new("m", Some("http://127.0.0.1:9"));
        assert!(provider.embed(&[]).await.unwrap().is_empty());
    }
}
