// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Turn entrypoint.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn, Instrument};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::orchestrator::{Orchestrator, OrchestratorOutcome};
use super::router::{Router, RouterOutcome, NOTHING_RELEVANT};
use super::state::RoutingTurnState;
use crate::config::ResolvedConfig;
use crate::error::{ProviderError, RoutingError};
use crate::index::CapabilityIndex;
use crate::mcp::{McpConfig, SessionLauncher};
use crate::providers::create_provider_from_config;
use crate::telemetry::{turn_span, CorrelationId};
use crate::types::SharedProvider;

/// Decision models for each stage.
#[derive(Clone)]
pub struct StageProviders {
    pub routing_query: SharedProvider,
    pub routing_response: SharedProvider,
    pub orchestrator: SharedProvider,
}

impl StageProviders {
    /// One model for every stage.
    pub fn uniform(provider: SharedProvider) -> Self {
        Self {
            routing_query: provider.clone(),
            routing_response: provider.clone(),
            orchestrator: provider,
        }
    }

    /// Build the providers named by `config`, honouring per-stage model
    /// overrides.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ProviderError> {
        let stage = |model: Option<&String>| -> Result<SharedProvider, ProviderError> {
            Ok(Arc::from(create_provider_from_config(config, model.map(String::as_str))?))
        };

        Ok(Self {
            routing_query: stage(config.models.routing_query.as_ref())?,
            routing_response: stage(config.models.routing_response.as_ref())?,
            orchestrator: stage(config.models.orchestrator.as_ref())?,
        })
    }
}

/// Routes each turn to a server and drives its tools.
///
/// Only immutable configuration is shared; the conversation itself is the
/// [`RoutingTurnState`] passed in and handed back by each call.
pub struct Assistant {
    router: Router,
    orchestrator: Orchestrator,
    max_reroutes: usize,
}

impl Assistant {
    pub fn new(
        config: &ResolvedConfig,
        providers: StageProviders,
        index: Arc<dyn CapabilityIndex>,
        launcher: Arc<dyn SessionLauncher>,
        servers: McpConfig,
    ) -> Self {
        let servers = Arc::new(servers);
        Self {
            router: Router::new(
                providers.routing_query,
                providers.routing_response,
                index.clone(),
                servers.clone(),
                config.top_k,
            ),
            orchestrator: Orchestrator::new(
                providers.orchestrator,
                index,
                launcher,
                servers,
                config.max_tool_iterations,
            ),
            max_reroutes: config.max_reroutes,
        }
    }

    /// Append a user message and run a turn.
    pub async fn ask(
        &self,
        mut state: RoutingTurnState,
        text: &str,
    ) -> Result<RoutingTurnState, RoutingError> {
        state.push_user(text);
        self.run_turn(state).await
    }

    /// Run the router and orchestrator until the turn ends.
    pub async fn run_turn(&self, state: RoutingTurnState) -> Result<RoutingTurnState, RoutingError> {
        let correlation_id = CorrelationId::new();
        let span = turn_span(&correlation_id);
        self.drive(state).instrument(span).await
    }

    async fn drive(&self, mut state: RoutingTurnState) -> Result<RoutingTurnState, RoutingError> {
        if state.messages.is_empty() {
            return Err(RoutingError::InvalidState("conversation has no messages".to_string()));
        }

        let start = Instant::now();
        let mut reroutes = 0usize;

        loop {
            if state.current_server.is_none() {
                match self.router.route(&mut state).await? {
                    RouterOutcome::Selected(server) => {
                        tracing::Span::current().record("server", server.as_str());
                    }
                    RouterOutcome::Replied => break,
                }
            }

            match self.orchestrator.run(&mut state).await? {
                OrchestratorOutcome::Answered | OrchestratorOutcome::IterationLimit => break,
                OrchestratorOutcome::Rerouted(handoff) => {
                    reroutes += 1;
                    tracing::Span::current().record("reroutes", reroutes as u64);
                    if reroutes > self.max_reroutes {
                        warn!(reroutes, handoff = ?handoff, "Re-route limit reached");
                        state.clear_route();
                        state.push_assistant(NOTHING_RELEVANT);
                        break;
                    }
                    info!(reroutes, handoff = ?handoff, "Re-routing");
                }
            }
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("routing.turn", start.elapsed());

        info!(
            server = state.current_server.as_deref().unwrap_or("-"),
            reroutes,
            duration_ms = start.elapsed().as_millis() as u64,
            "Turn complete"
        );

        Ok(state)
    }
}
