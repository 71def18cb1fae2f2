// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for turns and tool invocations.

use std::time::{Duration, Instant};

use tracing::{info_span, Span};

use super::correlation::CorrelationId;

/// Span covering one routing turn.
pub fn turn_span(correlation_id: &CorrelationId) -> Span {
    info_span!(
        "turn",
        correlation_id = %correlation_id.short(),
        server = tracing::field::Empty,
        reroutes = tracing::field::Empty,
    )
}

/// Times one tool invocation and records its outcome.
///
/// Dropping the span without [`finish`](Self::finish) records nothing;
/// cancelled invocations do not count as failures.
pub struct InvocationSpan {
    key: String,
    start: Instant,
    span: Span,
}

impl InvocationSpan {
    pub fn start(server: &str, tool: &str) -> Self {
        let span = info_span!(
            "invoke",
            server = %server,
            tool = %tool,
            duration_ms = tracing::field::Empty,
            is_error = tracing::field::Empty,
        );

        Self {
            key: format!("{}/{}", server, tool),
            start: Instant::now(),
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Close the span and return the measured duration.
    pub fn finish(self, is_error: bool) -> Duration {
        let duration = self.start.elapsed();
        self.span.record("duration_ms", duration.as_millis() as u64);
        self.span.record("is_error", is_error);

        #[cfg(feature = "telemetry")]
        super::metrics::GLOBAL_METRICS.record_tool(&self.key, duration, !is_error);

        tracing::debug!(parent: &self.span, tool = %self.key, "Invocation complete");
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_span_records_metrics() {
        let span = InvocationSpan::start("span-test-server", "lookup");
        span.finish(true);

        #[cfg(feature = "telemetry")]
        {
            let metrics = super::super::metrics::GLOBAL_METRICS
                .tool_metrics("span-test-server/lookup")
                .unwrap();
            assert!(metrics.invocations >= 1);
            assert!(metrics.failures >= 1);
        }
    }

    #[test]
    fn test_turn_span_accepts_fields() {
        let span = turn_span(&CorrelationId::new());
        span.record("server", "weather");
        span.record("reroutes", 1u64);
    }
}
