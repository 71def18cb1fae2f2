// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`RouterConfig`] is what a config file holds: every field optional, keys
//! in camelCase. [`ResolvedConfig`] is the result of layering files and CLI
//! flags over the defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::mcp::ServerConfig;

/// Default number of servers retrieved per routing query.
pub const DEFAULT_TOP_K: usize = 3;

/// Default bound on tool-selection rounds within one turn.
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;

/// Default bound on re-routes within one turn.
pub const DEFAULT_MAX_REROUTES: usize = 2;

/// Default server map file, relative to the workspace root.
pub const DEFAULT_SERVERS_FILE: &str = "mcp-servers-config.json";

/// Router configuration as written in `.mcp-router.json` / `.mcp-router.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    /// Provider to use (openai, ollama, openai-compatible)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model name to use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Custom base URL for API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Per-stage model overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<StageModels>,

    /// Embedding backend for the capability index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingConfig>,

    /// SQLite file holding the capability index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_iterations: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reroutes: Option<usize>,

    /// File with the `mcpServers` map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers_file: Option<PathBuf>,

    /// Servers declared inline; they win over the servers file on name clash
    #[serde(
        rename = "mcpServers",
        alias = "mcp_servers",
        skip_serializing_if = "Option::is_none"
    )]
    pub mcp_servers: Option<BTreeMap<String, ServerConfig>>,
}

/// Model overrides for the three decision stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageModels {
    /// Rewrites the conversation into a search query
    #[serde(default, alias = "routing_query", skip_serializing_if = "Option::is_none")]
    pub routing_query: Option<String>,

    /// Picks a server from the retrieved candidates
    #[serde(default, alias = "routing_response", skip_serializing_if = "Option::is_none")]
    pub routing_response: Option<String>,

    /// Picks tools and arguments on the selected server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator: Option<String>,
}

/// Embedding backend settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    /// openai or ollama
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Fully resolved configuration with all defaults applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub models: StageModels,
    pub embedding: ResolvedEmbeddingConfig,
    pub index_path: PathBuf,
    pub top_k: usize,
    pub max_tool_iterations: usize,
    pub max_reroutes: usize,
    pub servers_file: PathBuf,
    /// Whether `servers_file` was set explicitly (a missing file is then an error)
    #[serde(skip)]
    pub servers_file_explicit: bool,
    pub mcp_servers: BTreeMap<String, ServerConfig>,
}

/// Resolved embedding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEmbeddingConfig {
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for ResolvedEmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            base_url: None,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            base_url: None,
            models: StageModels::default(),
            embedding: ResolvedEmbeddingConfig::default(),
            index_path: default_index_path(),
            top_k: DEFAULT_TOP_K,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            max_reroutes: DEFAULT_MAX_REROUTES,
            servers_file: PathBuf::from(DEFAULT_SERVERS_FILE),
            servers_file_explicit: false,
            mcp_servers: BTreeMap::new(),
        }
    }
}

/// `~/.mcp-router/index.db`, or `./.mcp-router/index.db` without a home dir.
pub fn default_index_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-router")
        .join("index.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_camel_case() {
        let json = r#"{
            "provider": "ollama",
            "baseUrl": "http://gpu-box:11434/v1",
            "topK": 5,
            "maxToolIterations": 4,
            "models": {"routingQuery": "llama3.2", "orchestrator": "qwen2.5"},
            "embedding": {"provider": "ollama", "model": "nomic-embed-text"},
            "mcpServers": {"weather": {"command": "weather-server"}}
        }"#;
        let config: RouterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://gpu-box:11434/v1"));
        assert_eq!(config.top_k, Some(5));
        assert_eq!(config.max_tool_iterations, Some(4));
        let models = config.models.unwrap();
        assert_eq!(models.routing_query.as_deref(), Some("llama3.2"));
        assert_eq!(models.orchestrator.as_deref(), Some("qwen2.5"));
        assert!(config.mcp_servers.unwrap().contains_key("weather"));
    }

    #[test]
    fn test_stage_models_snake_case_alias() {
        let models: StageModels =
            serde_json::from_str(r#"{"routing_query": "a", "routing_response": "b"}"#).unwrap();
        assert_eq!(models.routing_query.as_deref(), Some("a"));
        assert_eq!(models.routing_response.as_deref(), Some("b"));
    }

    #[test]
    fn test_resolved_defaults() {
        let config = ResolvedConfig::default();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.top_k, 3);
        assert_eq!(config.max_tool_iterations, 10);
        assert_eq!(config.max_reroutes, 2);
        assert!(config.index_path.ends_with(".mcp-router/index.db"));
        assert_eq!(config.servers_file, PathBuf::from("mcp-servers-config.json"));
    }

    #[test]
    fn test_router_config_serialization_skips_none() {
        let json = serde_json::to_string(&RouterConfig::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
