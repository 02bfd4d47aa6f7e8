//! Metrics collection for the ranking service.
//!
//! Named counters and gauges kept in memory, read through snapshots and logged
//! at shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Counters updated by the ranking components.
pub const COUNTERS: &[&str] = &[
    "on_chain_cycles_total",
    "social_cycles_total",
    "cycles_skipped_total",
    "tokens_refreshed_total",
    "fetch_failures_total",
    "store_write_failures_total",
    "snapshot_rebuilds_total",
    "snapshot_fallbacks_total",
    "record_cache_hits_total",
    "record_cache_misses_total",
];

/// Ranking metrics collector.
pub struct RankingMetrics {
    metrics: Arc<RwLock<InternalMetrics>>,
}

/// Internal metrics storage.
#[derive(Debug, Default)]
struct InternalMetrics {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
}

/// Point-in-time copy of all metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

impl RankingMetrics {
    /// Create a new collector with every known counter at zero.
    pub fn new() -> Self {
        let mut internal = InternalMetrics::default();
        for name in COUNTERS {
            internal.counters.insert((*name).to_string(), 0);
        }

        Self {
            metrics: Arc::new(RwLock::new(internal)),
        }
    }

    pub async fn increment_counter(&self, name: &str) {
        self.add_to_counter(name, 1).await;
    }

    pub async fn add_to_counter(&self, name: &str, value: u64) {
        let mut metrics = self.metrics.write().await;
        *metrics.counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub async fn set_gauge(&self, name: &str, value: f64) {
        let mut metrics = self.metrics.write().await;
        metrics.gauges.insert(name.to_string(), value);
    }

    /// Record how long a refresh cycle took, as a gauge per cycle name.
    pub async fn record_cycle_time(&self, cycle: &str, duration: Duration) {
        self.set_gauge(&format!("{}_last_duration_seconds", cycle), duration.as_secs_f64())
            .await;
    }

    pub async fn get_metrics_snapshot(&self) -> MetricsSnapshot {
        let metrics = self.metrics.read().await;
        MetricsSnapshot {
            counters: metrics.counters.clone(),
            gauges: metrics.gauges.clone(),
        }
    }

    /// Log every counter.
    pub async fn log_summary(&self) {
        let snapshot = self.get_metrics_snapshot().await;
        let mut names: Vec<&String> = snapshot.counters.keys().collect();
        names.sort();
        for name in names {
            info!("  {}: {}", name, snapshot.counter(name));
        }
    }
}

impl Default for RankingMetrics {
    fn default() -> Self {
        Self::new()
    }
}
