//! Rolling bond metrics with windowed averages.
//!
//! A bounded ring of immutable metric snapshots feeds the bonding decisions.
//! The oldest entry is evicted first once the bound is reached. Averages are
//! computed over a look-back window and return `None` when no sample falls
//! inside it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Immutable metrics snapshot for the bonded group.
#[derive(Debug, Clone, PartialEq)]
pub struct BondMetrics {
    /// Observed throughput in bytes per second.
    pub throughput_bps: f64,
    /// Observed round-trip latency.
    pub latency: Duration,
    /// Error rate in [0, 1].
    pub error_rate: f64,
    /// Active plus standby connections at sample time.
    pub connection_count: usize,
    pub timestamp: Instant,
}

impl BondMetrics {
    pub fn new(
        throughput_bps: f64,
        latency: Duration,
        error_rate: f64,
        connection_count: usize,
    ) -> Self {
        Self {
            throughput_bps,
            latency,
            error_rate,
            connection_count,
            timestamp: Instant::now(),
        }
    }
}

/// Records metric snapshots and computes windowed averages.
pub struct TelemetryManager {
    history: VecDeque<BondMetrics>,
    history_limit: usize,
    default_window: Duration,
}

impl TelemetryManager {
    pub fn new(history_limit: usize, default_window: Duration) -> Self {
        Self {
            history: VecDeque::with_capacity(history_limit.min(1024)),
            history_limit,
            default_window,
        }
    }

    /// Append a snapshot, evicting the oldest entry once over the bound.
    pub fn record(&mut self, metrics: BondMetrics) {
        self.history.push_back(metrics);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Mean throughput over the window, or `None` with no recent samples.
    pub fn average_throughput(&self, window: Option<Duration>) -> Option<f64> {
        self.window_mean(window, |m| m.throughput_bps)
    }

    /// Mean latency over the window.
    pub fn average_latency(&self, window: Option<Duration>) -> Option<Duration> {
        self.window_mean(window, |m| m.latency.as_secs_f64())
            .map(Duration::from_secs_f64)
    }

    /// Mean error rate over the window.
    pub fn average_error_rate(&self, window: Option<Duration>) -> Option<f64> {
        self.window_mean(window, |m| m.error_rate)
    }

    fn window_mean(
        &self,
        window: Option<Duration>,
        value: impl Fn(&BondMetrics) -> f64,
    ) -> Option<f64> {
        let window = window.unwrap_or(self.default_window);
        let cutoff = Instant::now().checked_sub(window);
        let recent: Vec<f64> = self
            .history
            .iter()
            .filter(|m| match cutoff {
                Some(cutoff) => m.timestamp > cutoff,
                // The window reaches past process start: everything counts.
                None => true,
            })
            .map(|m| value(m))
            .collect();

        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }
}
