//! Bridge metrics
//!
//! Counters and timing samples behind `parking_lot` locks. The bridge itself
//! is single-threaded, but the collector is `Sync` so a diagnostics thread
//! can hold an `Arc` to it and read snapshots.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const PROXIES_CREATED: &str = "proxies_created";
pub const PROXIES_SEVERED: &str = "proxies_severed";
pub const SWEEPS: &str = "sweeps";
pub const CALLS: &str = "calls";
pub const FOREIGN_EXCEPTIONS: &str = "foreign_exceptions";
pub const LINK_FAILURES: &str = "link_failures";
pub const SWEEP_TIME: &str = "sweep";
pub const LINK_TIME: &str = "link";

/// Samples kept per timing; older ones are dropped first
pub const MAX_TIMING_SAMPLES: usize = 1024;

/// Metrics collector
pub struct BridgeMetrics {
    timings: RwLock<HashMap<String, VecDeque<Duration>>>,
    counters: RwLock<HashMap<String, u64>>,
    start_time: Instant,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            timings: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a timing measurement
    pub fn record_timing(&self, name: impl Into<String>, duration: Duration) {
        let mut timings = self.timings.write();
        let samples = timings.entry(name.into()).or_default();
        if samples.len() == MAX_TIMING_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(duration);
    }

    /// Increment a counter
    pub fn increment(&self, name: impl Into<String>) {
        self.add(name, 1);
    }

    /// Add to a counter
    pub fn add(&self, name: impl Into<String>, value: u64) {
        let mut counters = self.counters.write();
        *counters.entry(name.into()).or_default() += value;
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    pub fn get_timing_stats(&self, name: &str) -> Option<TimingStats> {
        let timings = self.timings.read();
        timings.get(name).map(|durations| TimingStats::from_durations(durations))
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn reset(&self) {
        self.timings.write().clear();
        self.counters.write().clear();
    }

    pub fn summary(&self) -> MetricsSummary {
        let timings = self.timings.read();
        let counters = self.counters.read();

        MetricsSummary {
            uptime: self.uptime(),
            timings: timings
                .iter()
                .map(|(name, durations)| (name.clone(), TimingStats::from_durations(durations)))
                .collect(),
            counters: counters.clone(),
        }
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for timing measurements
#[derive(Debug, Clone, Serialize)]
pub struct TimingStats {
    pub count: usize,
    pub total: Duration,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
}

impl TimingStats {
    fn from_durations(durations: &VecDeque<Duration>) -> Self {
        if durations.is_empty() {
            return Self {
                count: 0,
                total: Duration::ZERO,
                mean: Duration::ZERO,
                min: Duration::ZERO,
                max: Duration::ZERO,
                p50: Duration::ZERO,
                p95: Duration::ZERO,
            };
        }

        let mut sorted: Vec<Duration> = durations.iter().copied().collect();
        sorted.sort();

        let count = sorted.len();
        let total: Duration = sorted.iter().sum();
        let percentile = |p: f64| {
            let idx = ((count as f64 * p) as usize).min(count - 1);
            sorted[idx]
        };

        Self {
            count,
            total,
            mean: total / count as u32,
            min: sorted[0],
            max: sorted[count - 1],
            p50: percentile(0.50),
            p95: percentile(0.95),
        }
    }
}

/// Snapshot of all metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub uptime: Duration,
    pub timings: HashMap<String, TimingStats>,
    pub counters: HashMap<String, u64>,
}

impl MetricsSummary {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = BridgeMetrics::new();
        metrics.increment(CALLS);
        metrics.increment(CALLS);
        metrics.add(PROXIES_CREATED, 5);

        assert_eq!(metrics.get_counter(CALLS), 2);
        assert_eq!(metrics.get_counter(PROXIES_CREATED), 5);
        assert_eq!(metrics.get_counter(SWEEPS), 0);
    }

    #[test]
    fn test_timings() {
        let metrics = BridgeMetrics::new();
        for ms in [1u64, 2, 3, 4] {
            metrics.record_timing(SWEEP_TIME, Duration::from_millis(ms));
        }

        let stats = metrics.get_timing_stats(SWEEP_TIME).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, Duration::from_millis(1));
        assert_eq!(stats.max, Duration::from_millis(4));
        assert_eq!(stats.total, Duration::from_millis(10));
    }

    #[test]
    fn test_timing_window_is_bounded() {
        let metrics = BridgeMetrics::new();
        for micros in 0..(MAX_TIMING_SAMPLES as u64 + 10) {
            metrics.record_timing(SWEEP_TIME, Duration::from_micros(micros));
        }

        let stats = metrics.get_timing_stats(SWEEP_TIME).unwrap();
        assert_eq!(stats.count, MAX_TIMING_SAMPLES);
        assert_eq!(stats.min, Duration::from_micros(10));
    }

    #[test]
    fn test_summary_and_reset() {
        let metrics = BridgeMetrics::new();
        metrics.increment(SWEEPS);
        metrics.record_timing(LINK_TIME, Duration::from_micros(10));

        let summary = metrics.summary();
        assert_eq!(summary.counter(SWEEPS), 1);
        assert!(summary.to_json().unwrap().contains("sweeps"));

        metrics.reset();
        assert_eq!(metrics.get_counter(SWEEPS), 0);
        assert!(metrics.get_timing_stats(LINK_TIME).is_none());
    }
}
