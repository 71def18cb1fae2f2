// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use super::types::{ResolvedConfig, RouterConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub servers_file: Option<PathBuf>,
    pub index_path: Option<PathBuf>,
    pub top_k: Option<usize>,
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.mcp-router.local.json)
/// 3. Workspace config (.mcp-router.json)
/// 4. Global config (~/.mcp-router/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<RouterConfig>,
    workspace: Option<RouterConfig>,
    local: Option<RouterConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = ResolvedConfig::default();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_router_config(&mut result, config);
    }

    apply_cli_options(&mut result, cli);

    result
}

fn apply_router_config(result: &mut ResolvedConfig, config: RouterConfig) {
    if let Some(provider) = config.provider {
        result.provider = provider;
    }

    if config.model.is_some() {
        result.model = config.model;
    }

    if config.base_url.is_some() {
        result.base_url = config.base_url;
    }

    if let Some(models) = config.models {
        if models.routing_query.is_some() {
            result.models.routing_query = models.routing_query;
        }
        if models.routing_response.is_some() {
            result.models.routing_response = models.routing_response;
        }
        if models.orchestrator.is_some() {
            result.models.orchestrator = models.orchestrator;
        }
    }

    if let Some(embedding) = config.embedding {
        if let Some(provider) = embedding.provider {
            result.embedding.provider = provider;
        }
        if embedding.model.is_some() {
            result.embedding.model = embedding.model;
        }
        if embedding.base_url.is_some() {
            result.embedding.base_url = embedding.base_url;
        }
    }

    if let Some(path) = config.index_path {
        result.index_path = path;
    }

    if let Some(top_k) = config.top_k {
        result.top_k = top_k;
    }

    if let Some(iterations) = config.max_tool_iterations {
        result.max_tool_iterations = iterations;
    }

    if let Some(reroutes) = config.max_reroutes {
        result.max_reroutes = reroutes;
    }

    if let Some(path) = config.servers_file {
        result.servers_file = path;
        result.servers_file_explicit = true;
    }

    if let Some(servers) = config.mcp_servers {
        // Later layers replace same-named servers
        result.mcp_servers.extend(servers);
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: CliOptions) {
    if let Some(provider) = cli.provider {
        result.provider = provider;
    }

    if cli.model.is_some() {
        result.model = cli.model;
    }

    if cli.base_url.is_some() {
        result.base_url = cli.base_url;
    }

    if let Some(path) = cli.servers_file {
        result.servers_file = path;
        result.servers_file_explicit = true;
    }

    if let Some(path) = cli.index_path {
        result.index_path = path;
    }

    if let Some(top_k) = cli.top_k {
        result.top_k = top_k;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::StageModels;
    use crate::mcp::ServerConfig;
    use std::collections::BTreeMap;

    #[test]
    fn test_merge_defaults() {
        let result = merge_config(None, None, None, CliOptions::default());
        assert_eq!(result.provider, "openai");
        assert_eq!(result.top_k, 3);
        assert!(!result.servers_file_explicit);
    }

    #[test]
    fn test_merge_config_precedence() {
        let global = RouterConfig {
            provider: Some("ollama".to_string()),
            model: Some("global-model".to_string()),
            ..Default::default()
        };

        let workspace = RouterConfig {
            model: Some("workspace-model".to_string()),
            top_k: Some(5),
            ..Default::default()
        };

        let local = RouterConfig {
            model: Some("local-model".to_string()),
            ..Default::default()
        };

        let cli = CliOptions {
            provider: Some("openai".to_string()),
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(workspace), Some(local), cli);

        assert_eq!(result.provider, "openai");
        assert_eq!(result.model, Some("local-model".to_string()));
        assert_eq!(result.top_k, 5);
    }

    #[test]
    fn test_merge_stage_models_field_by_field() {
        let workspace = RouterConfig {
            models: Some(StageModels {
                routing_query: Some("small".to_string()),
                orchestrator: Some("large".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let local = RouterConfig {
            models: Some(StageModels {
                orchestrator: Some("larger".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = merge_config(None, Some(workspace), Some(local), CliOptions::default());
        assert_eq!(result.models.routing_query.as_deref(), Some("small"));
        assert_eq!(result.models.routing_response, None);
        assert_eq!(result.models.orchestrator.as_deref(), Some("larger"));
    }

    #[test]
    fn test_merge_inline_servers() {
        let mut global_servers = BTreeMap::new();
        global_servers.insert("a".to_string(), ServerConfig::stdio("a-v1"));
        global_servers.insert("b".to_string(), ServerConfig::stdio("b"));
        let mut local_servers = BTreeMap::new();
        local_servers.insert("a".to_string(), ServerConfig::stdio("a-v2"));

        let global = RouterConfig {
            mcp_servers: Some(global_servers),
            ..Default::default()
        };
        let local = RouterConfig {
            mcp_servers: Some(local_servers),
            ..Default::default()
        };

        let result = merge_config(Some(global), None, Some(local), CliOptions::default());
        assert_eq!(result.mcp_servers.len(), 2);
        assert_eq!(result.mcp_servers["a"].command, "a-v2");
    }

    #[test]
    fn test_cli_servers_file_is_explicit() {
        let cli = CliOptions {
            servers_file: Some(PathBuf::from("fleet.json")),
            index_path: Some(PathBuf::from("/tmp/idx.db")),
            ..Default::default()
        };
        let result = merge_config(None, None, None, cli);
        assert!(result.servers_file_explicit);
        assert_eq!(result.servers_file, PathBuf::from("fleet.json"));
        assert_eq!(result.index_path, PathBuf::from("/tmp/idx.db"));
    }
}
