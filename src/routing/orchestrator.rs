// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool selection and invocation on the selected server.
//!
//! ```text
//!            ┌──────────────── loop ◄─────────────────┐
//!            ▼                                         │
//!       SelectTool ──► (RefineArguments) ──► Invoke ───┘
//!            │
//!            ├──► plain reply           → answered, server kept
//!            ├──► IDK / stale echo      → route again
//!            └──► other server better   → route again
//! ```
//!
//! A sentinel that arrives right after a tool result is not a hand-off: the
//! fresh tool output becomes the answer instead, once per invocation.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn, Instrument};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::prompts::{
    format_documents, render, system_time, ORCHESTRATOR_SYSTEM_PROMPT,
    REFINE_ARGUMENTS_SYSTEM_PROMPT,
};
use super::state::{InvocationRecord, RoutingTurnState};
use crate::error::RoutingError;
use crate::index::CapabilityIndex;
use crate::mcp::{invoke_tool, list_tool_schemas, McpConfig, ServerConfig, SessionLauncher, ToolSchema};
use crate::telemetry::InvocationSpan;
use crate::types::{Message, SharedProvider, ToolCall, ToolDefinition};

/// Reply meaning the current server cannot help.
pub const IDK_RESPONSE: &str = "Unable to assist with this query.";

/// Reply meaning another server fits better.
pub const OTHER_SERVERS_RESPONSE: &str = "Other servers are more relevant.";

/// Why the orchestrator gave the conversation back to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// The model could not help, or echoed a tool result it already saw.
    Router,
    /// The model pointed at another server.
    OtherServer,
}

/// How one orchestrator pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorOutcome {
    /// An assistant reply was appended; the server stays selected.
    Answered,
    /// `current_server` was cleared; route again.
    Rerouted(Handoff),
    /// Too many tool calls in one pass; a notice was appended.
    IterationLimit,
}

/// Plain-text replies with a fixed meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sentinel {
    Idk,
    OtherServers,
    StaleEcho,
}

impl Sentinel {
    fn handoff(self) -> Handoff {
        match self {
            Self::Idk | Self::StaleEcho => Handoff::Router,
            Self::OtherServers => Handoff::OtherServer,
        }
    }
}

fn classify_reply(reply: &str, state: &RoutingTurnState) -> Option<Sentinel> {
    let reply = reply.trim();
    if reply.is_empty() || reply == IDK_RESPONSE {
        return Some(Sentinel::Idk);
    }
    if reply == OTHER_SERVERS_RESPONSE {
        return Some(Sentinel::OtherServers);
    }
    match state.last_message() {
        Some(last) if last.is_tool_result() && last.text().trim() == reply => Some(Sentinel::StaleEcho),
        _ => None,
    }
}

/// Drives the tool loop for the selected server.
pub struct Orchestrator {
    provider: SharedProvider,
    index: Arc<dyn CapabilityIndex>,
    launcher: Arc<dyn SessionLauncher>,
    servers: Arc<McpConfig>,
    max_tool_iterations: usize,
}

impl Orchestrator {
    pub fn new(
        provider: SharedProvider,
        index: Arc<dyn CapabilityIndex>,
        launcher: Arc<dyn SessionLauncher>,
        servers: Arc<McpConfig>,
        max_tool_iterations: usize,
    ) -> Self {
        Self {
            provider,
            index,
            launcher,
            servers,
            max_tool_iterations,
        }
    }

    /// Run until the model answers, hands off, or the tool budget runs out.
    pub async fn run(&self, state: &mut RoutingTurnState) -> Result<OrchestratorOutcome, RoutingError> {
        let server = state
            .current_server
            .clone()
            .ok_or_else(|| RoutingError::InvalidState("no server selected".to_string()))?;
        let config = self
            .servers
            .get(&server)
            .ok_or_else(|| RoutingError::UnknownServer(server.clone()))?;

        let start = Instant::now();
        let mut invoked = 0usize;

        let outcome = loop {
            let tools = self.fetch_tools(&server, config).await;
            let definitions: Vec<ToolDefinition> = tools.iter().map(ToolSchema::to_definition).collect();
            let prompt = self.system_prompt(&server).await?;

            let response = self
                .provider
                .chat(
                    &state.messages,
                    (!definitions.is_empty()).then_some(definitions.as_slice()),
                    Some(&prompt),
                )
                .await?;

            if let Some(call) = response.tool_calls.into_iter().next() {
                if invoked >= self.max_tool_iterations {
                    warn!(server = %server, limit = self.max_tool_iterations, "Tool iteration limit reached");
                    state.push_assistant(format!(
                        "Stopped after {} tool calls without reaching an answer.",
                        invoked
                    ));
                    break OrchestratorOutcome::IterationLimit;
                }

                let message = Message::assistant_tool_calls(&response.content, std::slice::from_ref(&call));
                let message_id = message.id.clone();
                state.messages.push(message);

                let call = match tools.iter().find(|t| t.name == call.name && t.is_adapted()) {
                    Some(schema) => {
                        state.pending_tool = Some(schema.clone());
                        match self.refine_arguments(state, &message_id, call).await {
                            Ok(refined) => refined,
                            Err(e) => {
                                // A call message must always be followed by its result
                                state.messages.retain(|m| m.id != message_id);
                                state.pending_tool = None;
                                return Err(e);
                            }
                        }
                    }
                    None => call,
                };

                self.invoke(state, &server, config, call).await;
                invoked += 1;
                continue;
            }

            match classify_reply(&response.content, state) {
                Some(sentinel) => {
                    if let Some(fresh) = unsuppressed_tool_result(state) {
                        debug!(server = %server, sentinel = ?sentinel, "Answering with fresh tool output");
                        let (result_id, output) = fresh;
                        state.suppressed_tool_result = Some(result_id);
                        state.push_assistant(output);
                        break OrchestratorOutcome::Answered;
                    }

                    info!(server = %server, sentinel = ?sentinel, "Handing conversation back to the router");
                    state.clear_route();
                    break OrchestratorOutcome::Rerouted(sentinel.handoff());
                }
                None => {
                    state.push_assistant(response.content);
                    break OrchestratorOutcome::Answered;
                }
            }
        };

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("routing.orchestrate", start.elapsed());

        debug!(
            server = %server,
            invoked,
            outcome = ?outcome,
            duration_ms = start.elapsed().as_millis() as u64,
            "Orchestrator pass finished"
        );

        Ok(outcome)
    }

    /// Tool schemas of `server`; a failure leaves the server without tools.
    async fn fetch_tools(&self, server: &str, config: &ServerConfig) -> Vec<ToolSchema> {
        match list_tool_schemas(self.launcher.as_ref(), server, config).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server = %server, error = %e, "Could not list tools; continuing without them");
                Vec::new()
            }
        }
    }

    async fn system_prompt(&self, current: &str) -> Result<String, RoutingError> {
        let mut others = Vec::new();
        for (name, _) in self.servers.enabled_servers() {
            if name == current {
                continue;
            }
            let summary = self
                .index
                .get(name)
                .await?
                .map(|entry| entry.description)
                .unwrap_or_default();
            others.push((name.clone(), summary));
        }

        let other_servers = format_documents(others.iter().map(|(n, s)| (n.as_str(), s.as_str())));
        let time = system_time();

        Ok(render(
            ORCHESTRATOR_SYSTEM_PROMPT,
            &[
                ("server", current),
                ("other_servers", other_servers.as_str()),
                ("other_servers_response", OTHER_SERVERS_RESPONSE),
                ("idk_response", IDK_RESPONSE),
                ("system_time", time.as_str()),
            ],
        ))
    }

    /// Ask for the arguments of the pending adapted tool again, this time
    /// with its API operation in view, and rewrite the call in place.
    async fn refine_arguments(
        &self,
        state: &mut RoutingTurnState,
        message_id: &str,
        call: ToolCall,
    ) -> Result<ToolCall, RoutingError> {
        let Some(schema) = state.pending_tool.clone() else {
            return Ok(call);
        };

        let operation = schema
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string_pretty(m).ok())
            .unwrap_or_default();
        let time = system_time();
        let prompt = render(
            REFINE_ARGUMENTS_SYSTEM_PROMPT,
            &[
                ("tool", schema.name.as_str()),
                ("operation", operation.as_str()),
                ("system_time", time.as_str()),
            ],
        );

        let history: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.id != message_id)
            .cloned()
            .collect();
        let tools = [schema.to_definition()];

        let response = self
            .provider
            .chat(&history, Some(tools.as_slice()), Some(&prompt))
            .await?;

        let Some(refined) = response.tool_calls.into_iter().find(|c| c.name == schema.name) else {
            debug!(tool = %schema.name, "Refinement returned no call; keeping original arguments");
            return Ok(call);
        };

        state.replace_tool_arguments(message_id, &call.id, refined.input.clone());
        Ok(ToolCall {
            input: refined.input,
            ..call
        })
    }

    async fn invoke(&self, state: &mut RoutingTurnState, server: &str, config: &ServerConfig, call: ToolCall) {
        let span = InvocationSpan::start(server, &call.name);

        let (output, is_error) = match invoke_tool(self.launcher.as_ref(), server, config, &call.name, call.input)
            .instrument(span.span().clone())
            .await
        {
            Ok(result) => (result.as_text(), result.is_error),
            Err(e) => {
                warn!(server = %server, tool = %call.name, error = %e, "Tool invocation failed");
                (e.to_string(), true)
            }
        };

        let duration = span.finish(is_error);

        state.messages.push(Message::tool_result(&call.id, output, is_error));
        state.invocations.push(InvocationRecord {
            server: server.to_string(),
            tool: call.name,
            call_id: call.id,
            is_error,
            duration_ms: duration.as_millis() as u64,
        });
        state.pending_tool = None;
    }
}

/// `(message id, output)` of the last message if it is a tool result whose
/// sentinel has not been suppressed yet.
fn unsuppressed_tool_result(state: &RoutingTurnState) -> Option<(String, String)> {
    let last = state.last_message().filter(|m| m.is_tool_result())?;
    if state.suppressed_tool_result.as_deref() == Some(last.id.as_str()) {
        return None;
    }
    Some((last.id.clone(), last.text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::mcp::{McpToolInfo, McpToolResult, ServerConfig};
    use crate::testing::{FakeLauncher, FakeServer, MemoryIndex, ScriptedProvider};
    use crate::types::Role;
    use serde_json::json;

    const PETSTORE: &str = r#"{
        "openapi": "3.0.0",
        "paths": {
            "/pets": {
                "post": {
                    "operationId": "createPet",
                    "requestBody": {
                        "content": {"application/json": {"schema": {
                            "type": "object",
                            "properties": {"name": {"type": "string"}, "tag": {"type": "string"}},
                            "required": ["name"]
                        }}}
                    }
                }
            }
        }
    }"#;

    fn servers() -> Arc<McpConfig> {
        let mut config = McpConfig::new();
        config.add_server("weather", ServerConfig::stdio("weather-server"));
        config.add_server("sqlite", ServerConfig::stdio("uvx").with_args(["mcp-server-sqlite"]));
        Arc::new(config)
    }

    fn weather_launcher() -> Arc<FakeLauncher> {
        Arc::new(
            FakeLauncher::new().with_server(
                "weather",
                FakeServer::new()
                    .with_tool(McpToolInfo::new("get_forecast", "Forecast for a city"))
                    .with_tool_result("get_forecast", McpToolResult::text("Sunny, 24C")),
            ),
        )
    }

    fn index() -> Arc<MemoryIndex> {
        Arc::new(
            MemoryIndex::new()
                .with_entry("weather", "Provides tools:\n- get_forecast: Forecast\n---")
                .with_entry("sqlite", "Provides tools:\n- read_query: Run SQL\n---"),
        )
    }

    fn selected(server: &str, text: &str) -> RoutingTurnState {
        let mut state = RoutingTurnState::from_user(text);
        state.current_server = Some(server.to_string());
        state
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, launcher: Arc<FakeLauncher>) -> Orchestrator {
        Orchestrator::new(provider, index(), launcher, servers(), 10)
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_call("get_forecast", json!({"city": "Paris"}))
                .then_text("It is sunny in Paris, 24C."),
        );
        let launcher = weather_launcher();
        let orchestrator = orchestrator(provider.clone(), launcher.clone());

        let mut state = selected("weather", "Weather in Paris?");
        let outcome = orchestrator.run(&mut state).await.unwrap();

        assert_eq!(outcome, OrchestratorOutcome::Answered);
        assert_eq!(state.current_server.as_deref(), Some("weather"));
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.messages[2].text(), "Sunny, 24C");
        assert_eq!(state.final_reply().as_deref(), Some("It is sunny in Paris, 24C."));

        assert_eq!(state.invocations.len(), 1);
        assert_eq!(state.invocations[0].tool, "get_forecast");
        assert_eq!(state.invocations[0].call_id, "call_1");
        assert!(!state.invocations[0].is_error);

        let calls = launcher.calls();
        assert_eq!(calls, vec![("weather".to_string(), "get_forecast".to_string(), json!({"city": "Paris"}))]);
        assert_eq!(launcher.teardowns(), launcher.launches());

        let requests = provider.requests();
        assert_eq!(requests[0].tool_names(), vec!["get_forecast"]);
        let prompt = requests[0].system_prompt.clone().unwrap();
        assert!(prompt.contains("<document id=\"sqlite\">"));
        assert!(!prompt.contains("<document id=\"weather\">"));
    }

    #[tokio::test]
    async fn test_idk_reroutes() {
        let provider = Arc::new(ScriptedProvider::new().then_text(IDK_RESPONSE));
        let orchestrator = orchestrator(provider, weather_launcher());

        let mut state = selected("weather", "Run a SQL query");
        let outcome = orchestrator.run(&mut state).await.unwrap();

        assert_eq!(outcome, OrchestratorOutcome::Rerouted(Handoff::Router));
        assert!(state.current_server.is_none());
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_other_servers_reroutes() {
        let provider = Arc::new(ScriptedProvider::new().then_text(OTHER_SERVERS_RESPONSE));
        let orchestrator = orchestrator(provider, weather_launcher());

        let mut state = selected("weather", "Run a SQL query");
        let outcome = orchestrator.run(&mut state).await.unwrap();
        assert_eq!(outcome, OrchestratorOutcome::Rerouted(Handoff::OtherServer));
        assert!(state.current_server.is_none());
    }

    #[tokio::test]
    async fn test_sentinel_after_tool_result_is_suppressed_once() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_call("get_forecast", json!({"city": "Oslo"}))
                .then_text(IDK_RESPONSE),
        );
        let orchestrator = orchestrator(provider, weather_launcher());

        let mut state = selected("weather", "Weather in Oslo?");
        let outcome = orchestrator.run(&mut state).await.unwrap();

        assert_eq!(outcome, OrchestratorOutcome::Answered);
        assert_eq!(state.current_server.as_deref(), Some("weather"));
        assert_eq!(state.final_reply().as_deref(), Some("Sunny, 24C"));
        assert_eq!(state.suppressed_tool_result.as_deref(), Some(state.messages[2].id.as_str()));
    }

    #[tokio::test]
    async fn test_sentinel_after_suppressed_result_reroutes() {
        let provider = Arc::new(ScriptedProvider::new().then_text("Sunny, 24C"));
        let orchestrator = orchestrator(provider, weather_launcher());

        let mut state = selected("weather", "Weather in Oslo?");
        state.messages.push(Message::assistant_tool_calls(
            "",
            &[ToolCall {
                id: "c1".to_string(),
                name: "get_forecast".to_string(),
                input: json!({}),
            }],
        ));
        state.messages.push(Message::tool_result("c1", "Sunny, 24C", false));
        state.suppressed_tool_result = Some(state.messages[2].id.clone());

        let outcome = orchestrator.run(&mut state).await.unwrap();
        assert_eq!(outcome, OrchestratorOutcome::Rerouted(Handoff::Router));
        assert!(state.current_server.is_none());
    }

    #[tokio::test]
    async fn test_tool_error_becomes_observation() {
        let launcher = Arc::new(
            FakeLauncher::new().with_server(
                "weather",
                FakeServer::new()
                    .with_tool(McpToolInfo::new("get_forecast", "Forecast"))
                    .with_tool_result("get_forecast", McpToolResult::error("city not found")),
            ),
        );
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_call("get_forecast", json!({"city": "Atlantis"}))
                .then_text("I could not find that city."),
        );
        let orchestrator = orchestrator(provider, launcher);

        let mut state = selected("weather", "Weather in Atlantis?");
        orchestrator.run(&mut state).await.unwrap();

        let result = state.messages[2].tool_result_block().unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result.content.as_deref(), Some("city not found"));
        assert!(state.invocations[0].is_error);
        assert_eq!(state.final_reply().as_deref(), Some("I could not find that city."));
    }

    #[tokio::test]
    async fn test_session_failure_becomes_observation() {
        // "sqlite" is configured but the launcher cannot start it
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_call("read_query", json!({"query": "select 1"}))
                .then_text("The database is unavailable."),
        );
        let orchestrator = orchestrator(provider.clone(), weather_launcher());

        let mut state = selected("sqlite", "select 1");
        let outcome = orchestrator.run(&mut state).await.unwrap();

        assert_eq!(outcome, OrchestratorOutcome::Answered);
        assert!(provider.requests()[0].tools.is_empty());
        let result = state.messages[2].tool_result_block().unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(state.invocations[0].is_error);
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_call("get_forecast", json!({"city": "A"}))
                .then_tool_call("get_forecast", json!({"city": "B"}))
                .then_tool_call("get_forecast", json!({"city": "C"})),
        );
        let orchestrator = Orchestrator::new(provider, index(), weather_launcher(), servers(), 2);

        let mut state = selected("weather", "Forecast everywhere");
        let outcome = orchestrator.run(&mut state).await.unwrap();

        assert_eq!(outcome, OrchestratorOutcome::IterationLimit);
        assert_eq!(state.invocations.len(), 2);
        let last = state.last_message().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.text().contains("Stopped after 2 tool calls"));
    }

    #[tokio::test]
    async fn test_adapted_tool_arguments_are_refined_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("petstore.json");
        std::fs::write(&spec_path, PETSTORE).unwrap();

        let mut config = McpConfig::new();
        config.add_server(
            "petstore",
            ServerConfig::stdio("npx").with_args(["-y", "openapi-mcp-server", spec_path.to_str().unwrap()]),
        );
        let launcher = Arc::new(FakeLauncher::new().with_server(
            "petstore",
            FakeServer::new().with_tool(McpToolInfo::new("createPet", "Create a pet")),
        ));
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_call("createPet", json!({"name": "rex"}))
                .then_tool_call("createPet", json!({"name": "Rex", "tag": "dog"}))
                .then_text("Rex was added."),
        );
        let orchestrator = Orchestrator::new(provider.clone(), index(), launcher.clone(), Arc::new(config), 10);

        let mut state = selected("petstore", "Add a dog called Rex");
        orchestrator.run(&mut state).await.unwrap();

        let call_message = &state.messages[1];
        let calls = call_message.tool_calls();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].input, json!({"name": "Rex", "tag": "dog"}));
        assert_eq!(launcher.calls()[0].2, json!({"name": "Rex", "tag": "dog"}));
        assert!(state.pending_tool.is_none());

        let refine = &provider.requests()[1];
        assert_eq!(refine.tool_names(), vec!["createPet"]);
        assert!(refine.messages.iter().all(|m| m.id != call_message.id));
        assert!(refine.system_prompt.as_deref().unwrap().contains("/pets"));
    }

    #[tokio::test]
    async fn test_failed_refinement_leaves_no_dangling_call() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("petstore.json");
        std::fs::write(&spec_path, PETSTORE).unwrap();

        let mut config = McpConfig::new();
        config.add_server(
            "petstore",
            ServerConfig::stdio("npx").with_args(["-y", "openapi-mcp-server", spec_path.to_str().unwrap()]),
        );
        let launcher = Arc::new(FakeLauncher::new().with_server(
            "petstore",
            FakeServer::new().with_tool(McpToolInfo::new("createPet", "Create a pet")),
        ));
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_call("createPet", json!({"name": "rex"}))
                .then_error(ProviderError::RateLimited("slow down".to_string())),
        );
        let orchestrator = Orchestrator::new(provider, index(), launcher.clone(), Arc::new(config), 10);

        let mut state = selected("petstore", "Add a dog called Rex");
        let err = orchestrator.run(&mut state).await.unwrap_err();

        assert!(matches!(err, RoutingError::Provider(ProviderError::RateLimited(_))));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Role::User);
        assert!(state.messages.iter().all(|m| m.tool_calls().is_empty()));
        assert!(state.pending_tool.is_none());
        assert!(state.invocations.is_empty());
        assert!(launcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_server_is_an_error() {
        let orchestrator = orchestrator(Arc::new(ScriptedProvider::new()), weather_launcher());
        let mut state = selected("gitlab", "hi");
        assert!(matches!(
            orchestrator.run(&mut state).await,
            Err(RoutingError::UnknownServer(_))
        ));

        let mut state = RoutingTurnState::from_user("hi");
        assert!(matches!(
            orchestrator.run(&mut state).await,
            Err(RoutingError::InvalidState(_))
        ));
    }

    #[test]
    fn test_classify_reply() {
        let mut state = RoutingTurnState::from_user("q");
        assert_eq!(classify_reply(IDK_RESPONSE, &state), Some(Sentinel::Idk));
        assert_eq!(classify_reply("", &state), Some(Sentinel::Idk));
        assert_eq!(classify_reply(OTHER_SERVERS_RESPONSE, &state), Some(Sentinel::OtherServers));
        assert_eq!(classify_reply("q", &state), None);

        state.messages.push(Message::tool_result("c1", "42 rows", false));
        assert_eq!(classify_reply("42 rows", &state), Some(Sentinel::StaleEcho));
        assert_eq!(classify_reply("There are 42 rows.", &state), None);
    }
}
