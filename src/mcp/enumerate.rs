// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Capability descriptions.
//!
//! A server's description is what gets embedded into the routing index.
//! It has up to three sections in fixed order:
//!
//! ```text
//! Provides tools:
//! - get_forecast: Forecast for a city
//! ---
//! Provides prompts:
//! - summarize: Summarize a forecast
//! ---
//! ```
//!
//! Sections with no items, or whose list request failed, are left out.

use tracing::warn;

use super::client::CapabilityClient;
use super::types::{McpPromptInfo, McpResourceInfo, McpToolInfo};

const SECTION_SEPARATOR: &str = "---";

/// Query every capability list and render the description.
///
/// A failing list request is logged and contributes nothing.
pub async fn describe_capabilities(client: &mut dyn CapabilityClient, server: &str) -> String {
    let tools = client.list_tools().await.unwrap_or_else(|e| {
        warn!(server, error = %e, "Failed to list tools");
        Vec::new()
    });
    let prompts = client.list_prompts().await.unwrap_or_else(|e| {
        warn!(server, error = %e, "Failed to list prompts");
        Vec::new()
    });
    let resources = client.list_resources().await.unwrap_or_else(|e| {
        warn!(server, error = %e, "Failed to list resources");
        Vec::new()
    });

    render_description(&tools, &prompts, &resources)
}

/// Render a description from already fetched lists.
pub fn render_description(
    tools: &[McpToolInfo],
    prompts: &[McpPromptInfo],
    resources: &[McpResourceInfo],
) -> String {
    let mut content = String::new();
    push_section(
        &mut content,
        "tools",
        tools.iter().map(|t| (t.name.as_str(), t.description.as_deref())),
    );
    push_section(
        &mut content,
        "prompts",
        prompts.iter().map(|p| (p.name.as_str(), p.description.as_deref())),
    );
    push_section(
        &mut content,
        "resources",
        resources.iter().map(|r| (r.name.as_str(), r.description.as_deref())),
    );
    content
}

fn push_section<'a>(
    content: &mut String,
    kind: &str,
    items: impl Iterator<Item = (&'a str, Option<&'a str>)>,
) {
    let mut items = items.peekable();
    if items.peek().is_none() {
        return;
    }

    content.push_str("Provides ");
    content.push_str(kind);
    content.push_str(":\n");
    for (name, description) in items {
        content.push_str("- ");
        content.push_str(name);
        content.push_str(": ");
        content.push_str(description.unwrap_or_default());
        content.push('\n');
    }
    content.push_str(SECTION_SEPARATOR);
    content.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;
    use crate::mcp::McpError;

    fn weather_tools() -> Vec<McpToolInfo> {
        vec![
            McpToolInfo::new("get_forecast", "Forecast for a city"),
            McpToolInfo::new("get_alerts", "Active weather alerts"),
        ]
    }

    #[test]
    fn test_render_all_sections() {
        let description = render_description(
            &weather_tools(),
            &[McpPromptInfo::new("summarize", "Summarize a forecast")],
            &[McpResourceInfo::new("weather://stations", "stations", "Station list")],
        );

        assert_eq!(
            description,
            "Provides tools:\n\
             - get_forecast: Forecast for a city\n\
             - get_alerts: Active weather alerts\n\
             ---\n\
             Provides prompts:\n\
             - summarize: Summarize a forecast\n\
             ---\n\
             Provides resources:\n\
             - stations: Station list\n\
             ---\n"
        );
    }

    #[test]
    fn test_render_skips_empty_sections() {
        let description = render_description(&[], &[McpPromptInfo::new("p", "prompt")], &[]);
        assert_eq!(description, "Provides prompts:\n- p: prompt\n---\n");
        assert_eq!(render_description(&[], &[], &[]), "");
    }

    #[test]
    fn test_render_missing_description() {
        let tool: McpToolInfo = serde_json::from_value(serde_json::json!({"name": "ping"})).unwrap();
        assert_eq!(render_description(&[tool], &[], &[]), "Provides tools:\n- ping: \n---\n");
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render_description(&weather_tools(), &[], &[]);
        let b = render_description(&weather_tools(), &[], &[]);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[tokio::test]
    async fn test_failed_prompts_section_is_omitted() {
        let server = FakeServer::new()
            .with_tool(McpToolInfo::new("get_forecast", "Forecast for a city"))
            .with_resource(McpResourceInfo::new("weather://stations", "stations", "Station list"))
            .failing_list_prompts();
        let mut client = server.into_client();

        let description = describe_capabilities(&mut client, "weather").await;
        assert!(description.contains("Provides tools:"));
        assert!(!description.contains("Provides prompts:"));
        assert!(description.contains("Provides resources:"));
    }

    #[tokio::test]
    async fn test_every_list_failing_is_empty() {
        let mut client = FakeServer::new()
            .failing_list_tools()
            .failing_list_prompts()
            .failing_list_resources()
            .into_client();
        assert_eq!(describe_capabilities(&mut client, "broken").await, "");
        // Sanity check the fake really errors
        assert!(matches!(client.list_tools().await, Err(McpError::Transport(_))));
    }
}
