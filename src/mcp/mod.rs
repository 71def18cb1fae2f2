// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model Context Protocol (MCP) capability sessions.
//!
//! Every interaction with a capability server is a short-lived session:
//! launch the process, handshake, run one operation, tear down.
//!
//! # Architecture
//!
//! ```text
//!  with_session(launcher, name, config, operation)
//!        │
//!        ▼
//! ┌──────────────┐  launch   ┌──────────────────┐
//! │SessionLauncher│─────────▶│ CapabilityClient │  (StdioClient in production)
//! └──────────────┘           └────────┬─────────┘
//!                                     │ JSON-RPC 2.0 over stdio
//!                            ┌────────▼─────────┐
//!                            │  server process  │
//!                            └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_router::mcp::{list_tool_schemas, McpConfig, StdioLauncher};
//!
//! let config = McpConfig::load_from_file("mcp-servers-config.json")?;
//! let launcher = StdioLauncher::new();
//! for (name, server) in config.enabled_servers() {
//!     let tools = list_tool_schemas(&launcher, name, server).await?;
//!     println!("{}: {} tools", name, tools.len());
//! }
//! ```

pub mod client;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod openapi;
pub mod session;
pub mod tools;
pub mod types;

pub use client::{CapabilityClient, SessionLauncher, StdioClient, StdioLauncher};
pub use config::{McpConfig, ServerConfig, OPENAPI_ADAPTER_MARKER};
pub use enumerate::{describe_capabilities, render_description};
pub use error::{McpError, SessionError};
pub use openapi::{adapt_tools, derive_tools, resolve_operation, InterfaceSpec, SchemaResolutionError, ToolParameters};
pub use session::{
    enumerate_capabilities, invoke_tool, list_tool_schemas, with_session, SessionOperation,
    SessionOutput,
};
pub use tools::{ToolSchema, MAX_TOOL_DESCRIPTION_CHARS, TRUNCATION_MARKER};
pub use types::*;
