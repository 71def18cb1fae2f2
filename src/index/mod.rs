// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Capability index.
//!
//! Maps server identities to their capability descriptions and answers
//! similarity queries over them. The router only sees the
//! [`CapabilityIndex`] trait; [`VectorIndex`] is the embedding-backed
//! implementation persisted in SQLite.
//!
//! ```text
//! IndexBuilder ──enumerate──▶ descriptions ──upsert_batch──▶ VectorIndex
//!                                                              │
//!                                     EmbeddingProvider ◀──────┤
//!                                     ServerStore (SQLite) ◀───┘
//! ```

pub mod builder;
pub mod embeddings;
pub mod store;

pub use builder::{BuildResult, BuildStatus, IndexBuilder};
pub use embeddings::{create_embedding_provider, EmbeddingProvider};
pub use store::ServerStore;

use std::sync::Arc;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::mcp::SessionError;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use store::{hash_description, StoredServer};

/// Errors raised by the capability index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index not configured: {0}")]
    NotConfigured(String),
}

/// Why a build failed.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A server's enumeration session failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The batch could not be committed.
    #[error("Failed to commit index: {0}")]
    Commit(#[from] IndexError),

    /// An enumeration task panicked or was cancelled.
    #[error("Enumeration task failed: {0}")]
    Task(String),
}

/// One server's capability description, as written to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub server: String,
    pub description: String,
}

impl IndexEntry {
    pub fn new(server: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            description: description.into(),
        }
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedServer {
    pub server: String,
    pub description: String,
    pub score: f32,
}

/// Similarity index over capability descriptions.
#[async_trait]
pub trait CapabilityIndex: Send + Sync {
    /// Insert or overwrite entries; all of them or none.
    async fn upsert_batch(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// The `top_k` entries most similar to `query`, best first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<IndexedServer>, IndexError>;

    /// Look up one server's entry.
    async fn get(&self, server: &str) -> Result<Option<IndexEntry>, IndexError>;
}

/// Embedding-backed index stored in SQLite.
pub struct VectorIndex {
    store: Mutex<ServerStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl VectorIndex {
    pub fn new(store: ServerStore, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store: Mutex::new(store),
            embedder,
        }
    }

    /// Number of indexed servers.
    pub async fn len(&self) -> Result<usize, IndexError> {
        self.store.lock().await.count()
    }

    pub async fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl CapabilityIndex for VectorIndex {
    async fn upsert_batch(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        // Reuse stored vectors for descriptions that did not change
        let mut rows = Vec::with_capacity(entries.len());
        let mut to_embed = Vec::new();
        {
            let store = self.store.lock().await;
            for entry in entries {
                let hash = hash_description(&entry.description);
                let reused = match store.description_hash(&entry.server)? {
                    Some(existing) if existing == hash => store.get(&entry.server)?.map(|s| s.embedding),
                    _ => None,
                };
                if reused.is_none() {
                    to_embed.push(rows.len());
                }
                rows.push(StoredServer {
                    name: entry.server,
                    description: entry.description,
                    description_hash: hash,
                    embedding: reused.unwrap_or_default(),
                    indexed_at: Utc::now(),
                });
            }
        }

        debug!(
            total = rows.len(),
            embedding = to_embed.len(),
            provider = self.embedder.name(),
            "Upserting index entries"
        );

        if !to_embed.is_empty() {
            let texts: Vec<String> = to_embed.iter().map(|&i| rows[i].description.clone()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            if embeddings.len() != texts.len() {
                return Err(IndexError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    embeddings.len()
                )));
            }
            for (i, embedding) in to_embed.into_iter().zip(embeddings) {
                rows[i].embedding = embedding;
            }
        }

        self.store.lock().await.upsert_batch(&rows)?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("index.upsert_batch", start.elapsed());

        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<IndexedServer>, IndexError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let embedding = self.embedder.embed_one(query).await?;
        let hits = self.store.lock().await.search(&embedding, top_k)?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("index.search", start.elapsed());

        Ok(hits
            .into_iter()
            .map(|(server, score)| IndexedServer {
                server: server.name,
                description: server.description,
                score,
            })
            .collect())
    }

    async fn get(&self, server: &str) -> Result<Option<IndexEntry>, IndexError> {
        Ok(self
            .store
            .lock()
            .await
            .get(server)?
            .map(|s| IndexEntry::new(s.name, s.description)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::KeywordEmbedder;

    fn index_with(embedder: Arc<KeywordEmbedder>) -> VectorIndex {
        VectorIndex::new(ServerStore::open_in_memory().unwrap(), embedder)
    }

    #[tokio::test]
    async fn test_search_prefers_matching_description() {
        let index = index_with(Arc::new(KeywordEmbedder::new()));
        index
            .upsert_batch(vec![
                IndexEntry::new("weather", "Provides tools:\n- get_forecast: weather forecast for a city\n---\n"),
                IndexEntry::new("sqlite", "Provides tools:\n- query: run sql against a database\n---\n"),
            ])
            .await
            .unwrap();

        let hits = index.search("what is the weather forecast", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].server, "weather");
    }

    #[tokio::test]
    async fn test_rebuild_keeps_one_entry_per_server() {
        let index = index_with(Arc::new(KeywordEmbedder::new()));
        for _ in 0..3 {
            index
                .upsert_batch(vec![IndexEntry::new("weather", "forecast"), IndexEntry::new("sqlite", "sql")])
                .await
                .unwrap();
        }
        assert_eq!(index.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_descriptions_are_not_re_embedded() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let index = index_with(embedder.clone());

        index.upsert_batch(vec![IndexEntry::new("weather", "forecast")]).await.unwrap();
        assert_eq!(embedder.embedded_texts(), 1);

        index
            .upsert_batch(vec![IndexEntry::new("weather", "forecast"), IndexEntry::new("sqlite", "sql")])
            .await
            .unwrap();
        assert_eq!(embedder.embedded_texts(), 2);

        index.upsert_batch(vec![IndexEntry::new("weather", "forecast alerts")]).await.unwrap();
        assert_eq!(embedder.embedded_texts(), 3);
    }

    #[tokio::test]
    async fn test_get_entry() {
        let index = index_with(Arc::new(KeywordEmbedder::new()));
        index.upsert_batch(vec![IndexEntry::new("weather", "forecast")]).await.unwrap();
        assert_eq!(
            index.get("weather").await.unwrap(),
            Some(IndexEntry::new("weather", "forecast"))
        );
        assert_eq!(index.get("github").await.unwrap(), None);
        assert!(!index.is_empty().await.unwrap());
    }
}
