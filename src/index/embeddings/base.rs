// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Base trait for embedding providers.

use async_trait::async_trait;

use crate::index::IndexError;

/// Turns capability descriptions and routing queries into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Get the model name.
    fn model(&self) -> &str;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;

    /// Generate embedding for a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let results = self.embed(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("No embedding returned".to_string()))
    }
}
