// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Index builder.
//!
//! Enumerates every enabled server concurrently and commits one entry per
//! server in a single batch. The first session failure aborts the rest and
//! fails the build without touching previously committed entries.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::mcp::{enumerate_capabilities, McpConfig, SessionLauncher};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::{BuildError, CapabilityIndex, IndexEntry};

/// Build outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Success,
    Failure,
}

/// What the build entrypoint reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: BuildStatus,
    /// Servers committed by this build.
    #[serde(skip)]
    pub indexed: usize,
    /// Failure cause, for logs.
    #[serde(skip)]
    pub error: Option<String>,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success
    }
}

/// Builds the capability index from the configured fleet.
pub struct IndexBuilder {
    launcher: Arc<dyn SessionLauncher>,
    index: Arc<dyn CapabilityIndex>,
}

impl IndexBuilder {
    pub fn new(launcher: Arc<dyn SessionLauncher>, index: Arc<dyn CapabilityIndex>) -> Self {
        Self { launcher, index }
    }

    /// Build the index and report `success` or `failure`.
    pub async fn build(&self, servers: &McpConfig) -> BuildResult {
        let start = Instant::now();
        let outcome = self.try_build(servers).await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("index.build", start.elapsed());

        match outcome {
            Ok(indexed) => {
                info!(indexed, duration_ms = start.elapsed().as_millis() as u64, "Index build succeeded");
                BuildResult {
                    status: BuildStatus::Success,
                    indexed,
                    error: None,
                }
            }
            Err(e) => {
                error!(error = %e, "Index build failed");
                BuildResult {
                    status: BuildStatus::Failure,
                    indexed: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Build the index, returning the number of servers committed.
    pub async fn try_build(&self, servers: &McpConfig) -> Result<usize, BuildError> {
        let mut tasks = JoinSet::new();
        for (name, config) in servers.enabled_servers() {
            let launcher = Arc::clone(&self.launcher);
            let name = name.clone();
            let config = config.clone();
            tasks.spawn(async move {
                let description = enumerate_capabilities(launcher.as_ref(), &name, &config).await?;
                Ok::<_, crate::mcp::SessionError>(IndexEntry::new(name, description))
            });
        }

        let mut entries = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(entry)) => {
                    entries.push(entry);
                    continue;
                }
                Ok(Err(e)) => BuildError::Session(e),
                Err(e) => BuildError::Task(e.to_string()),
            };

            tasks.abort_all();
            // Drain so aborted sessions finish tearing down before we return
            while tasks.join_next().await.is_some() {}
            return Err(failure);
        }

        entries.sort_by(|a, b| a.server.cmp(&b.server));
        let indexed = entries.len();
        self.index.upsert_batch(entries).await?;
        Ok(indexed)
    }
}
