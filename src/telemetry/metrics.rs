// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for routing and sessions.
//!
//! Two families are tracked: named operations (`mcp.session.invoke_tool`,
//! `index.build`, `routing.decide`, ...) with a latency histogram, and tool
//! invocations keyed by `server/tool` with success counts. Token usage
//! reported by the decision provider is summed separately.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Central metrics registry.
#[derive(Debug)]
pub struct Metrics {
    tools: RwLock<BTreeMap<String, ToolMetrics>>,
    operations: RwLock<BTreeMap<String, OperationMetrics>>,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            operations: RwLock::new(BTreeMap::new()),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one tool invocation. `name` is conventionally `server/tool`.
    pub fn record_tool(&self, name: &str, duration: Duration, success: bool) {
        write(&self.tools)
            .entry(name.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Record one named operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        write(&self.operations)
            .entry(name.to_string())
            .or_default()
            .record(duration);
    }

    /// Add provider token usage.
    pub fn record_tokens(&self, input: u64, output: u64) {
        self.input_tokens.fetch_add(input, Ordering::Relaxed);
        self.output_tokens.fetch_add(output, Ordering::Relaxed);
    }

    pub fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        read(&self.tools).get(name).cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        read(&self.operations).get(name).cloned()
    }

    /// `(input, output)` token totals.
    pub fn token_counts(&self) -> (u64, u64) {
        (
            self.input_tokens.load(Ordering::Relaxed),
            self.output_tokens.load(Ordering::Relaxed),
        )
    }

    /// Copy everything recorded so far.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (input_tokens, output_tokens) = self.token_counts();
        MetricsSnapshot {
            tools: read(&self.tools).clone(),
            operations: read(&self.operations).clone(),
            input_tokens,
            output_tokens,
            uptime: self.start_time.elapsed(),
        }
    }

    pub fn reset(&self) {
        write(&self.tools).clear();
        write(&self.operations).clear();
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcomes of one tool.
#[derive(Debug, Clone, Default)]
pub struct ToolMetrics {
    pub invocations: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl ToolMetrics {
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        if !success {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        average(self.total_duration, self.invocations)
    }

    /// Fraction of invocations that succeeded; 1.0 when there were none.
    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            1.0
        } else {
            (self.invocations - self.failures) as f64 / self.invocations as f64
        }
    }
}

/// Latencies of one named operation.
#[derive(Debug, Clone, Default)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        average(self.total_duration, self.count)
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos((total.as_nanos() / count as u128) as u64)
    }
}

/// Fixed-bucket latency histogram.
///
/// Upper bounds in milliseconds: 1, 10, 100, 1000, 10000, then overflow.
/// Subprocess launches and model calls both land comfortably in range.
#[derive(Debug, Clone)]
pub struct Histogram {
    counts: [u64; Histogram::BOUNDS_MS.len() + 1],
}

impl Histogram {
    const BOUNDS_MS: [u64; 5] = [1, 10, 100, 1_000, 10_000];

    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let bucket = Self::BOUNDS_MS
            .iter()
            .position(|&bound| ms < bound)
            .unwrap_or(Self::BOUNDS_MS.len());
        self.counts[bucket] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Upper bound of the bucket holding the `p`-th percentile (0..=100).
    /// Overflow reports twice the last bound.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = ((total as f64 * p / 100.0).ceil() as u64).max(1);
        let mut seen = 0;
        for (i, count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                let ms = Self::BOUNDS_MS
                    .get(i)
                    .copied()
                    .unwrap_or(Self::BOUNDS_MS[Self::BOUNDS_MS.len() - 1] * 2);
                return Duration::from_millis(ms);
            }
        }
        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            counts: [0; Histogram::BOUNDS_MS.len() + 1],
        }
    }
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tools: BTreeMap<String, ToolMetrics>,
    pub operations: BTreeMap<String, OperationMetrics>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Human-readable report, printed by the CLI in verbose mode.
    pub fn format_report(&self) -> String {
        let mut report = format!(
            "Uptime: {:.2?}\nTokens: {} input, {} output\n",
            self.uptime, self.input_tokens, self.output_tokens
        );

        if !self.tools.is_empty() {
            report.push_str("\nTool invocations:\n");
            for (name, m) in &self.tools {
                report.push_str(&format!(
                    "  {}: {} calls, {:.0}% ok, avg {:.2?}\n",
                    name,
                    m.invocations,
                    m.success_rate() * 100.0,
                    m.avg_duration()
                ));
            }
        }

        if !self.operations.is_empty() {
            report.push_str("\nOperations:\n");
            for (name, m) in &self.operations {
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 <= {:.0?}\n",
                    name,
                    m.count,
                    m.avg_duration(),
                    m.histogram.p99()
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_metrics_success_rate() {
        let mut metrics = ToolMetrics::default();
        metrics.record(Duration::from_millis(100), true);
        metrics.record(Duration::from_millis(200), true);
        metrics.record(Duration::from_millis(60), false);

        assert_eq!(metrics.invocations, 3);
        assert_eq!(metrics.failures, 1);
        assert!((metrics.success_rate() - 0.666).abs() < 0.01);
        assert_eq!(metrics.avg_duration(), Duration::from_millis(120));
        assert_eq!(ToolMetrics::default().success_rate(), 1.0);
    }

    #[test]
    fn test_histogram_buckets_and_percentiles() {
        let mut hist = Histogram::default();
        hist.record(Duration::from_micros(300));
        hist.record(Duration::from_millis(5));
        hist.record(Duration::from_millis(50));
        hist.record(Duration::from_secs(30));

        assert_eq!(hist.counts(), &[1, 1, 1, 0, 0, 1]);
        assert_eq!(hist.p50(), Duration::from_millis(10));
        assert_eq!(hist.p99(), Duration::from_millis(20_000));
        assert_eq!(Histogram::default().p50(), Duration::ZERO);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = Metrics::new();
        metrics.record_tool("weather/get_forecast", Duration::from_millis(40), true);
        metrics.record_operation("index.build", Duration::from_millis(900));
        metrics.record_tokens(1000, 250);

        let snapshot = metrics.snapshot();
        assert!(snapshot.tools.contains_key("weather/get_forecast"));
        assert_eq!(snapshot.operations["index.build"].count, 1);
        assert_eq!((snapshot.input_tokens, snapshot.output_tokens), (1000, 250));
        assert!(snapshot.format_report().contains("weather/get_forecast: 1 calls, 100% ok"));

        metrics.reset();
        assert!(metrics.tool_metrics("weather/get_forecast").is_none());
        assert!(metrics.operation_metrics("index.build").is_none());
        assert_eq!(metrics.token_counts(), (0, 0));
    }
}
