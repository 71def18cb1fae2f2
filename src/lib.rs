// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! mcp-router - capability routing across Model Context Protocol servers.
//!
//! Given a fleet of MCP servers, the router builds a searchable index of
//! what each server can do, picks the right server for each conversation
//! turn, and drives that server's tools until the turn can be answered.
//!
//! # Architecture
//!
//! - [`mcp`] - Server configuration, one-shot sessions, capability
//!   descriptions and tool schemas (native and OpenAPI-derived)
//! - [`index`] - Capability index: embeddings, SQLite store, index builder
//! - [`routing`] - Router and orchestrator state machines, the turn entrypoint
//! - [`providers`] - Decision models behind the [`Provider`] trait
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing setup, correlation ids and metrics
//! - [`types`] - Messages, tool definitions and provider responses
//! - [`error`] - Error types shared across layers
//! - `testing` - In-memory fakes for servers, models and the index
//!   (`test-util` feature)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mcp_router::config::{load_config, load_servers, CliOptions};
//! use mcp_router::routing::{Assistant, RoutingTurnState, StageProviders};
//!
//! let config = load_config(".".as_ref(), None, CliOptions::default())?;
//! let servers = load_servers(&config, ".".as_ref())?;
//! let assistant = Assistant::new(
//!     &config,
//!     StageProviders::from_config(&config)?,
//!     index,
//!     Arc::new(StdioLauncher::new()),
//!     servers,
//! );
//!
//! let state = assistant.ask(RoutingTurnState::new(), "Weather in Paris?").await?;
//! println!("{}", state.final_reply().unwrap_or_default());
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod mcp;
pub mod providers;
pub mod routing;
pub mod telemetry;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ConfigError, ProviderError, Result, RoutingError};
pub use index::{CapabilityIndex, IndexBuilder, VectorIndex};
pub use mcp::{McpConfig, ServerConfig, SessionLauncher, StdioLauncher, ToolSchema};
pub use providers::{create_provider, OpenAIProvider, ProviderType};
pub use routing::{Assistant, RoutingTurnState, StageProviders};
pub use types::{
    // Message types
    ContentBlock, Message, MessageContent, Role,
    // Tool types
    ToolCall, ToolDefinition,
    // Provider types
    BoxedProvider, Provider, ProviderConfig, ProviderResponse, SharedProvider, StopReason,
    TokenUsage,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
