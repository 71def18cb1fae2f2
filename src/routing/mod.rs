// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conversation routing.
//!
//! Each turn goes through two state machines:
//!
//! ```text
//!               current_server?
//!  user ──► ─────────┬──────────────────────────────┐
//!                    │ no                            │ yes
//!                    ▼                               ▼
//!                 Router ── Selected(server) ──► Orchestrator ──► answer
//!                    │                               │
//!                    └─► nothing relevant /          └─► hand-off: back to Router
//!                        clarification                   (bounded by max_reroutes)
//! ```
//!
//! The [`Assistant`] runs both against a [`RoutingTurnState`] owned by the
//! caller.

pub mod assistant;
pub mod orchestrator;
pub mod prompts;
pub mod router;
pub mod state;

pub use assistant::{Assistant, StageProviders};
pub use orchestrator::{Handoff, Orchestrator, OrchestratorOutcome, IDK_RESPONSE, OTHER_SERVERS_RESPONSE};
pub use router::{
    parse_route_decision, RouteDecision, Router, RouterOutcome, AMBIGUITY_PREFIX, NOTHING_RELEVANT,
    SEARCH_QUERY_TOOL,
};
pub use state::{InvocationRecord, RoutingTurnState};
