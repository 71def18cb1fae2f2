// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading router configuration and the server map from JSON and
//! YAML files.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;
use crate::mcp::McpConfig;

use super::types::{ResolvedConfig, RouterConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    ".mcp-router.json",
    ".mcp-router.yaml",
    "mcp-router.config.json",
];

/// Local config file name (for per-directory overrides).
pub const LOCAL_CONFIG_FILE: &str = ".mcp-router.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".mcp-router";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Load global configuration from ~/.mcp-router/config.json.
pub fn load_global_config() -> Result<Option<RouterConfig>, ConfigError> {
    let path = match get_global_config_dir() {
        Some(dir) => dir.join(GLOBAL_CONFIG_FILE),
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the first of [`CONFIG_FILES`] present.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<RouterConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            debug!(path = %path.display(), "Loading workspace config");
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load local configuration from .mcp-router.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<RouterConfig>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<RouterConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        if CONFIG_FILES.iter().any(|f| current.join(f).exists()) {
            return Some(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Load the server map: the servers file overlaid with inline servers.
///
/// A relative servers file is resolved against `workspace_root`. A missing
/// file is only an error when it was named explicitly.
pub fn load_servers(config: &ResolvedConfig, workspace_root: &Path) -> Result<McpConfig, ConfigError> {
    let path = if config.servers_file.is_absolute() {
        config.servers_file.clone()
    } else {
        workspace_root.join(&config.servers_file)
    };

    let mut servers = if path.exists() {
        debug!(path = %path.display(), "Loading server map");
        McpConfig::load_from_file(&path)
            .map_err(|e| ConfigError::InvalidFormat(format!("{}: {}", path.display(), e)))?
    } else if config.servers_file_explicit {
        return Err(ConfigError::NotFound(path.display().to_string()));
    } else {
        McpConfig::new()
    };

    for (name, server) in &config.mcp_servers {
        servers.add_server(name.clone(), server.clone());
    }

    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::ServerConfig;
    use tempfile::TempDir;

    #[test]
    fn test_config_files_order() {
        assert_eq!(CONFIG_FILES.len(), 3);
        assert_eq!(CONFIG_FILES[0], ".mcp-router.json");
    }

    #[test]
    fn test_global_config_dir() {
        let dir = get_global_config_dir().unwrap();
        assert!(dir.ends_with(".mcp-router"));
    }

    #[test]
    fn test_load_workspace_config_not_found() {
        let temp = TempDir::new().unwrap();
        let result = load_workspace_config(temp.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_workspace_config_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".mcp-router.json"),
            r#"{"provider": "openai", "model": "gpt-4o", "topK": 2}"#,
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.provider, Some("openai".to_string()));
        assert_eq!(config.top_k, Some(2));
    }

    #[test]
    fn test_load_workspace_config_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".mcp-router.yaml"),
            "provider: ollama\nmodel: llama3.2\nmaxReroutes: 1\n",
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.provider, Some("ollama".to_string()));
        assert_eq!(config.max_reroutes, Some(1));
    }

    #[test]
    fn test_load_config_file_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config_file(&path), Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn test_find_workspace_root() {
        let temp = TempDir::new().unwrap();
        let subdir = temp.path().join("a").join("b");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(temp.path().join(".mcp-router.json"), "{}").unwrap();

        assert_eq!(find_workspace_root(&subdir).unwrap(), temp.path());
    }

    #[test]
    fn test_load_servers_overlays_inline() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("mcp-servers-config.json"),
            r#"{"mcpServers": {
                "weather": {"command": "weather-server"},
                "sqlite": {"command": "uvx", "args": ["mcp-server-sqlite"]}
            }}"#,
        )
        .unwrap();

        let mut config = ResolvedConfig::default();
        config
            .mcp_servers
            .insert("weather".to_string(), ServerConfig::stdio("weather-v2"));

        let servers = load_servers(&config, temp.path()).unwrap();
        assert_eq!(servers.servers.len(), 2);
        assert_eq!(servers.get("weather").unwrap().command, "weather-v2");
        assert_eq!(servers.get("sqlite").unwrap().command, "uvx");
    }

    #[test]
    fn test_load_servers_missing_default_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let servers = load_servers(&ResolvedConfig::default(), temp.path()).unwrap();
        assert!(servers.servers.is_empty());
    }

    #[test]
    fn test_load_servers_missing_explicit_file_errors() {
        let temp = TempDir::new().unwrap();
        let config = ResolvedConfig {
            servers_file: PathBuf::from("servers.json"),
            servers_file_explicit: true,
            ..Default::default()
        };
        assert!(matches!(
            load_servers(&config, temp.path()),
            Err(ConfigError::NotFound(_))
        ));
    }
}
