// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server selection.
//!
//! ```text
//! GenerateQuery ──► Retrieve ──► Decide ──┬──► Selected(server)
//!                                         ├──► nothing relevant (reply)
//!                                         └──► clarification (reply)
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::prompts::{
    format_queries, format_retrieved, render, system_time, ROUTING_QUERY_SYSTEM_PROMPT,
    ROUTING_RESPONSE_SYSTEM_PROMPT,
};
use super::state::RoutingTurnState;
use crate::error::RoutingError;
use crate::index::CapabilityIndex;
use crate::mcp::McpConfig;
use crate::types::{InputSchema, SharedProvider, ToolDefinition};

/// Reply meaning no retrieved server fits.
pub const NOTHING_RELEVANT: &str = "Nothing relevant found";

/// Prefix of a clarifying question.
pub const AMBIGUITY_PREFIX: &str = "Ambiguity:";

/// Tool bound while rewriting the search query.
pub const SEARCH_QUERY_TOOL: &str = "search_query";

/// What the decision model's reply means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// A server identity (not yet checked against the configuration).
    Server(String),
    NothingRelevant,
    /// Text to show the user.
    Clarify(String),
}

/// Interpret a server-selection reply.
///
/// Accepts a bare identity (`github`) or `identity: explanation`
/// (`sqlite: the sqlite server`). Anything else that is not the
/// nothing-relevant sentinel is passed back to the user as a question.
pub fn parse_route_decision(reply: &str) -> RouteDecision {
    let trimmed = reply.trim();

    if trimmed.is_empty() || trimmed == NOTHING_RELEVANT {
        return RouteDecision::NothingRelevant;
    }
    if trimmed.starts_with(AMBIGUITY_PREFIX) {
        return RouteDecision::Clarify(trimmed.to_string());
    }

    let candidate = match trimmed.split_once(':') {
        Some((left, right)) => single_token(right).or_else(|| single_token(left)),
        None => single_token(trimmed),
    };

    match candidate {
        Some(server) => RouteDecision::Server(server.to_string()),
        None => RouteDecision::Clarify(trimmed.to_string()),
    }
}

fn single_token(text: &str) -> Option<&str> {
    let text = text.trim();
    (!text.is_empty() && !text.contains(char::is_whitespace)).then_some(text)
}

/// How a routing pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterOutcome {
    /// `current_server` is set; the orchestrator takes over.
    Selected(String),
    /// An assistant message was appended and the turn is over.
    Replied,
}

/// Query rewriting, retrieval and server selection.
pub struct Router {
    query_provider: SharedProvider,
    decision_provider: SharedProvider,
    index: Arc<dyn CapabilityIndex>,
    servers: Arc<McpConfig>,
    top_k: usize,
}

impl Router {
    pub fn new(
        query_provider: SharedProvider,
        decision_provider: SharedProvider,
        index: Arc<dyn CapabilityIndex>,
        servers: Arc<McpConfig>,
        top_k: usize,
    ) -> Self {
        Self {
            query_provider,
            decision_provider,
            index,
            servers,
            top_k,
        }
    }

    /// Run all three stages.
    pub async fn route(&self, state: &mut RoutingTurnState) -> Result<RouterOutcome, RoutingError> {
        self.generate_query(state).await?;
        self.retrieve(state).await?;
        self.decide(state).await
    }

    /// Append the next search query.
    ///
    /// The opening message is searched verbatim; later turns ask the model
    /// to rewrite the conversation into a fresh query.
    pub async fn generate_query(&self, state: &mut RoutingTurnState) -> Result<(), RoutingError> {
        let start = Instant::now();
        let user_text = state
            .last_user_text()
            .ok_or_else(|| RoutingError::InvalidState("conversation has no user message".to_string()))?;

        let query = if state.messages.len() == 1 && state.queries.is_empty() {
            user_text
        } else {
            let queries = format_queries(&state.queries);
            let time = system_time();
            let prompt = render(
                ROUTING_QUERY_SYSTEM_PROMPT,
                &[("queries", queries.as_str()), ("system_time", time.as_str())],
            );
            let tools = [search_query_tool()];

            let response = self
                .query_provider
                .chat(&state.messages, Some(tools.as_slice()), Some(&prompt))
                .await?;

            let from_tool = response
                .tool_calls
                .iter()
                .find(|c| c.name == SEARCH_QUERY_TOOL)
                .and_then(|c| c.input.get("query"))
                .and_then(|q| q.as_str())
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(String::from);

            let from_text = Some(response.content.trim())
                .filter(|q| !q.is_empty())
                .map(String::from);

            from_tool.or(from_text).unwrap_or(user_text)
        };

        debug!(
            query = %query,
            duration_ms = start.elapsed().as_millis() as u64,
            "Generated routing query"
        );
        state.queries.push(query);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("routing.generate_query", start.elapsed());

        Ok(())
    }

    /// Search the index with the latest query.
    pub async fn retrieve(&self, state: &mut RoutingTurnState) -> Result<(), RoutingError> {
        let start = Instant::now();
        let query = state
            .latest_query()
            .map(String::from)
            .ok_or_else(|| RoutingError::InvalidState("no routing query to search with".to_string()))?;

        state.retrieved = self.index.search(&query, self.top_k).await?;
        debug!(
            hits = ?state.retrieved.iter().map(|h| h.server.as_str()).collect::<Vec<_>>(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Retrieved servers"
        );

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("routing.retrieve", start.elapsed());

        Ok(())
    }

    /// Ask the model to pick one of the retrieved servers.
    pub async fn decide(&self, state: &mut RoutingTurnState) -> Result<RouterOutcome, RoutingError> {
        let start = Instant::now();
        let docs = format_retrieved(&state.retrieved);
        let time = system_time();
        let prompt = render(
            ROUTING_RESPONSE_SYSTEM_PROMPT,
            &[
                ("retrieved_docs", docs.as_str()),
                ("nothing_relevant", NOTHING_RELEVANT),
                ("ambiguity_prefix", AMBIGUITY_PREFIX),
                ("system_time", time.as_str()),
            ],
        );

        let response = self
            .decision_provider
            .chat(&state.messages, None, Some(&prompt))
            .await?;

        let decision = match parse_route_decision(&response.content) {
            RouteDecision::Server(server) if !self.servers.contains(&server) => {
                debug!(server = %server, "Decision named an unknown server");
                RouteDecision::Clarify(response.content.trim().to_string())
            }
            other => other,
        };

        debug!(
            decision = ?decision,
            duration_ms = start.elapsed().as_millis() as u64,
            "Parsed routing decision"
        );

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("routing.decide", start.elapsed());

        let outcome = match decision {
            RouteDecision::Server(server) => {
                info!(server = %server, "Routed to server");
                state.current_server = Some(server.clone());
                RouterOutcome::Selected(server)
            }
            RouteDecision::NothingRelevant => {
                info!("No relevant server");
                state.current_server = None;
                state.push_assistant(NOTHING_RELEVANT);
                RouterOutcome::Replied
            }
            RouteDecision::Clarify(question) => {
                info!("Asking the user to clarify");
                state.current_server = None;
                state.push_assistant(question);
                RouterOutcome::Replied
            }
        };

        Ok(outcome)
    }
}

fn search_query_tool() -> ToolDefinition {
    ToolDefinition::new(SEARCH_QUERY_TOOL, "Search the capability index with a query.").with_schema(
        InputSchema::new()
            .with_property(
                "query",
                json!({"type": "string", "description": "Search query"}),
            )
            .with_required(vec!["query".to_string()]),
    )
}
