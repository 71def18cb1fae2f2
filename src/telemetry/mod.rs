// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and metrics.
//!
//! - **Tracing**: structured logs via `tracing`; one span per routing turn
//!   tagged with a [`CorrelationId`], one per tool invocation.
//! - **Metrics**: [`GLOBAL_METRICS`] collects operation latencies and tool
//!   outcomes in-process. Recording is compiled out without the `telemetry`
//!   feature.
//!
//! ```rust,ignore
//! use mcp_router::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::from_verbosity(true))?;
//! ```

mod correlation;
mod init;
pub mod metrics;
mod spans;

pub use correlation::CorrelationId;
pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, Metrics, MetricsSnapshot, OperationMetrics, ToolMetrics, GLOBAL_METRICS};
pub use spans::{turn_span, InvocationSpan};
