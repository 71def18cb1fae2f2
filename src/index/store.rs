// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite storage for indexed servers.
//!
//! One row per server identity. Embeddings are stored as little-endian
//! `f32` blobs and searched by brute-force cosine similarity; fleets are
//! small enough that a scan beats maintaining an ANN structure.

use std::path::Path;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::IndexError;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// One stored server row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredServer {
    pub name: String,
    pub description: String,
    pub description_hash: String,
    pub embedding: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

/// SQLite-backed server table.
pub struct ServerStore {
    conn: Connection,
}

impl ServerStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    IndexError::Storage(format!("Failed to create index directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| IndexError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| IndexError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let store = Self { conn };
        store.create_schema()?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("index.store.open", start.elapsed());

        Ok(store)
    }

    /// Open a store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| IndexError::Storage(format!("Failed to open database: {}", e)))?;
        let store = Self { conn };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<(), IndexError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS servers (
                    name TEXT PRIMARY KEY,
                    description TEXT NOT NULL,
                    description_hash TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    indexed_at TEXT NOT NULL
                );",
            )
            .map_err(|e| IndexError::Storage(format!("Failed to create schema: {}", e)))
    }

    /// Write all rows in one transaction; on failure nothing is written.
    pub fn upsert_batch(&mut self, rows: &[StoredServer]) -> Result<(), IndexError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let tx = self
            .conn
            .transaction()
            .map_err(|e| IndexError::Storage(format!("Failed to begin transaction: {}", e)))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO servers
                     (name, description, description_hash, embedding, indexed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(|e| IndexError::Storage(format!("Failed to prepare statement: {}", e)))?;

            for row in rows {
                stmt.execute(params![
                    row.name,
                    row.description,
                    row.description_hash,
                    serialize_embedding(&row.embedding),
                    row.indexed_at.to_rfc3339(),
                ])
                .map_err(|e| {
                    IndexError::Storage(format!("Failed to write server '{}': {}", row.name, e))
                })?;
            }
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit()
            .map_err(|e| IndexError::Storage(format!("Failed to commit transaction: {}", e)))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("index.store.upsert_batch", start.elapsed());

        Ok(())
    }

    /// Fetch one server row.
    pub fn get(&self, name: &str) -> Result<Option<StoredServer>, IndexError> {
        self.conn
            .query_row(
                "SELECT name, description, description_hash, embedding, indexed_at
                 FROM servers WHERE name = ?1",
                params![name],
                read_row,
            )
            .optional()
            .map_err(|e| IndexError::Storage(format!("Failed to read server '{}': {}", name, e)))
    }

    /// Description hash of a server, if indexed.
    pub fn description_hash(&self, name: &str) -> Result<Option<String>, IndexError> {
        self.conn
            .query_row(
                "SELECT description_hash FROM servers WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| IndexError::Storage(format!("Failed to read hash: {}", e)))
    }

    /// The `top_k` servers most similar to `embedding`, best first.
    pub fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<(StoredServer, f32)>, IndexError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, description, description_hash, embedding, indexed_at
                 FROM servers ORDER BY name",
            )
            .map_err(|e| IndexError::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], read_row)
            .map_err(|e| IndexError::Storage(format!("Failed to query servers: {}", e)))?;

        let mut results = Vec::new();
        for row in rows {
            let server = row.map_err(|e| IndexError::Storage(format!("Failed to read row: {}", e)))?;
            let score = cosine_similarity(embedding, &server.embedding);
            results.push((server, score));
        }

        // Stable sort keeps name order among equal scores
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("index.store.search", start.elapsed());

        Ok(results)
    }

    /// Number of indexed servers.
    pub fn count(&self) -> Result<usize, IndexError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM servers", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| IndexError::Storage(format!("Failed to count servers: {}", e)))
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredServer> {
    let embedding_bytes: Vec<u8> = row.get(3)?;
    let indexed_at: String = row.get(4)?;
    Ok(StoredServer {
        name: row.get(0)?,
        description: row.get(1)?,
        description_hash: row.get(2)?,
        embedding: deserialize_embedding(&embedding_bytes),
        indexed_at: DateTime::parse_from_rfc3339(&indexed_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}

/// SHA-256 of a description, hex encoded.
pub fn hash_description(description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(name: &str, description: &str, embedding: Vec<f32>) -> StoredServer {
        StoredServer {
            name: name.to_string(),
            description: description.to_string(),
            description_hash: hash_description(description),
            embedding,
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let embedding = vec![0.25, -1.5, 3.0];
        assert_eq!(deserialize_embedding(&serialize_embedding(&embedding)), embedding);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_upsert_overwrites_same_identity() {
        let mut store = ServerStore::open_in_memory().unwrap();
        store.upsert_batch(&[row("weather", "v1", vec![1.0, 0.0])]).unwrap();
        store
            .upsert_batch(&[row("weather", "v2", vec![0.0, 1.0]), row("sqlite", "db", vec![1.0, 1.0])])
            .unwrap();

        assert_eq!(store.count().unwrap(), 2);
        let weather = store.get("weather").unwrap().unwrap();
        assert_eq!(weather.description, "v2");
        assert_eq!(weather.embedding, vec![0.0, 1.0]);
        assert_eq!(store.description_hash("weather").unwrap(), Some(hash_description("v2")));
        assert!(store.get("github").unwrap().is_none());
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut store = ServerStore::open_in_memory().unwrap();
        store
            .upsert_batch(&[
                row("a", "a", vec![1.0, 0.0]),
                row("b", "b", vec![0.7, 0.7]),
                row("c", "c", vec![0.0, 1.0]),
            ])
            .unwrap();

        let results = store.search(&[0.0, 1.0], 2).unwrap();
        let names: Vec<_> = results.iter().map(|(s, _)| s.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);
        assert!(results[0].1 >= results[1].1);
    }

    #[test]
    fn test_store_persists_on_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("index.db");
        {
            let mut store = ServerStore::open(&path).unwrap();
            store.upsert_batch(&[row("weather", "forecasts", vec![0.5])]).unwrap();
        }
        let store = ServerStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("weather").unwrap().unwrap().description, "forecasts");
    }

    #[test]
    fn test_hash_description_is_stable() {
        assert_eq!(hash_description("x"), hash_description("x"));
        assert_ne!(hash_description("x"), hash_description("y"));
        assert_eq!(hash_description("").len(), 64);
    }
}
