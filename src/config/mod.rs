// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for the router.
//!
//! Handles loading and merging configuration from multiple sources:
//! - Global config: ~/.mcp-router/config.json
//! - Workspace config: .mcp-router.json, .mcp-router.yaml, or mcp-router.config.json
//! - Local config: .mcp-router.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).
//! The server map lives in its own file (`mcp-servers-config.json` by default)
//! and is loaded separately with [`load_servers`].

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_global_config_dir, load_config_file, load_global_config,
    load_local_config, load_servers, load_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR,
    GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{merge_config, CliOptions};

pub use types::{
    default_index_path, EmbeddingConfig, ResolvedConfig, ResolvedEmbeddingConfig, RouterConfig,
    StageModels, DEFAULT_MAX_REROUTES, DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_SERVERS_FILE,
    DEFAULT_TOP_K,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
///
/// When `explicit_config` is given it takes the place of the workspace
/// config file search.
pub fn load_config(
    workspace_root: &Path,
    explicit_config: Option<&Path>,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = match explicit_config {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            Some(load_config_file(path)?)
        }
        None => load_workspace_config(workspace_root)?,
    };
    let local = load_local_config(workspace_root)?;

    Ok(merge_config(global, workspace, local, cli_options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_no_files() {
        let temp = TempDir::new().unwrap();
        let config = load_config(temp.path(), None, CliOptions::default()).unwrap();
        // Provider could come from a global config on the test machine
        assert!(!config.provider.is_empty());
    }

    #[test]
    fn test_load_config_local_overrides_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".mcp-router.json"),
            r#"{"model": "gpt-4o", "maxToolIterations": 6}"#,
        )
        .unwrap();
        std::fs::write(
            temp.path().join(".mcp-router.local.json"),
            r#"{"model": "gpt-4o-mini"}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), None, CliOptions::default()).unwrap();
        assert_eq!(config.model, Some("gpt-4o-mini".to_string()));
        assert_eq!(config.max_tool_iterations, 6);
    }

    #[test]
    fn test_load_config_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.yaml");
        std::fs::write(&path, "topK: 7\n").unwrap();

        let config = load_config(temp.path(), Some(&path), CliOptions::default()).unwrap();
        assert_eq!(config.top_k, 7);

        let missing = temp.path().join("missing.json");
        assert!(matches!(
            load_config(temp.path(), Some(&missing), CliOptions::default()),
            Err(ConfigError::NotFound(_))
        ));
    }
}
