// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAI embedding provider.

#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::index::IndexError;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::base::EmbeddingProvider;

/// Default OpenAI embedding model.
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Inputs per `/embeddings` request.
const BATCH_SIZE: usize = 100;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// OpenAI embedding provider. Also serves any OpenAI-compatible endpoint.
pub struct OpenAIEmbeddingProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIEmbeddingProvider {
    /// Create a new provider; the key falls back to `OPENAI_API_KEY`.
    pub fn new(model: &str, api_key: Option<&str>, base_url: Option<&str>) -> Result<Self, IndexError> {
        let api_key = match api_key {
            Some(key) => key.to_string(),
            None => std::env::var("OPENAI_API_KEY").map_err(|_| {
                IndexError::NotConfigured("OPENAI_API_KEY environment variable not set".to_string())
            })?,
        };

        Ok(Self {
            client: Client::new(),
            api_key,
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::Embedding(format!("OpenAI API request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IndexError::Embedding(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(IndexError::Embedding(format!(
                    "OpenAI API error: {}",
                    error_response.error.message
                )));
            }
            return Err(IndexError::Embedding(format!(
                "OpenAI API error ({}): {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            IndexError::Embedding(format!("Failed to parse embedding response: {}", e))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(IndexError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("index.embeddings.openai.request", start.elapsed());

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn name(&self) -> &str {
        "OpenAI"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            embeddings.extend(self.request_embeddings(chunk).await?);
        }
        Ok(embeddings)
    }
}
