// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Capability server configuration.
//!
//! The server map uses the layout shared by most MCP hosts:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "sqlite": {
//!       "command": "uvx",
//!       "args": ["mcp-server-sqlite", "--db-path", "/tmp/test.db"]
//!     },
//!     "petstore": {
//!       "command": "npx",
//!       "args": ["-y", "openapi-mcp-server", "/specs/petstore.yaml"],
//!       "env": { "API_KEY": "${PETSTORE_KEY}" }
//!     }
//!   }
//! }
//! ```
//!
//! Servers launched through `openapi-mcp-server` are adapted: their tool
//! schemas come from the interface description named by the next argument.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::error::McpError;

/// Launcher executable that marks a server as backed by an OpenAPI document.
pub const OPENAPI_ADAPTER_MARKER: &str = "openapi-mcp-server";

/// All configured capability servers, keyed by identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default, rename = "mcpServers", alias = "mcp_servers")]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl McpConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON or YAML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, McpError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            McpError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| McpError::Config(format!("Invalid YAML: {}", e))),
            _ => Self::from_json(&content),
        }
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, McpError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Get enabled servers in identity order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.servers.iter().filter(|(_, c)| c.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    /// Add a server configuration.
    pub fn add_server(&mut self, name: impl Into<String>, config: ServerConfig) {
        self.servers.insert(name.into(), config);
    }
}

/// Launch settings of one capability server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable to spawn.
    pub command: String,

    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides (supports ${ENV_VAR} expansion).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Whether this server takes part in indexing and routing.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    /// Create a configuration that spawns `command`.
    pub fn stdio(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            enabled: true,
        }
    }

    /// Add command arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set environment variables.
    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Set working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Path of the OpenAPI document when this server is adapted.
    ///
    /// A leading `-y` (package-runner confirmation flag) is ignored; then the
    /// first argument must be the adapter executable and the second one is
    /// the document path.
    pub fn interface_spec(&self) -> Option<&str> {
        let mut args = self.args.iter().map(String::as_str);
        let mut first = args.next()?;
        if first == "-y" {
            first = args.next()?;
        }
        if first != OPENAPI_ADAPTER_MARKER {
            return None;
        }
        args.next()
    }

    /// The interface document path as the server process sees it: relative
    /// paths are taken from the server's `cwd` when one is set.
    pub fn interface_spec_path(&self) -> Option<PathBuf> {
        let spec = Path::new(self.interface_spec()?);
        match &self.cwd {
            Some(cwd) if spec.is_relative() => Some(Path::new(cwd).join(spec)),
            _ => Some(spec.to_path_buf()),
        }
    }

    /// Whether tool schemas come from an interface description.
    pub fn is_adapted(&self) -> bool {
        self.interface_spec().is_some()
    }

    /// Environment with `${VAR}` references expanded from the host.
    pub fn expanded_env(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect()
    }
}

/// Expand `${VAR}` references; unknown variables become empty.
pub fn expand_env_vars(value: &str) -> String {
    let mut result = value.to_string();
    let mut search_from = 0;
    while let Some(offset) = result[search_from..].find("${") {
        let start = search_from + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        search_from = start + value.len();
    }
    result
}
