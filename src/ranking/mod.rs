//! Ranking module - tiered trending ranking and refresh scheduling.
//!
//! Tokens are ranked by a final score fused from an on-chain sub-score and,
//! once available, a social sub-score. Rank position decides a token's tier,
//! the tier decides how often it is refreshed, and a wholesale-rebuilt
//! snapshot serves every read.

pub mod cache;
pub mod clock;
pub mod config;
pub mod data_sources;
pub mod due_set;
pub mod metrics;
pub mod rate_limit;
pub mod refresh;
pub mod scheduler;
pub mod scoring;
pub mod service;
pub mod sqlite_store;
pub mod storage;
pub mod tiers;

pub use cache::{RankedSnapshot, RankingCache, RecordCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RankerConfig, TierIntervals, TierPolicy};
pub use data_sources::{FetchError, HttpOnChainAnalyzer, HttpSocialAggregator, OnChainAnalyzer, SocialAggregator};
pub use due_set::{select_on_chain_due, select_social_due};
pub use metrics::{MetricsSnapshot, RankingMetrics};
pub use rate_limit::AdaptiveRateLimiter;
pub use refresh::RefreshReport;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use service::{RankingService, TriggerReport};
pub use sqlite_store::SqliteScoreStore;
pub use storage::{MemoryScoreStore, ScoreStorage};
pub use tiers::classify_position;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use refresh::{RefreshLimits, Refresher};

/// Error rate above which the collaborator rate limit is reduced.
const ADAPTIVE_ERROR_THRESHOLD: f64 = 0.2;

/// Ranking service builder with sensible defaults.
///
/// Anything not injected is created from the configuration: the SQLite store
/// from `database_url`, HTTP collaborators from their URLs and keys, and the
/// system clock.
pub struct RankingServiceBuilder {
    config: RankerConfig,
    store: Option<Arc<dyn ScoreStorage>>,
    on_chain: Option<Arc<dyn OnChainAnalyzer>>,
    social: Option<Arc<dyn SocialAggregator>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<RankingMetrics>>,
}

impl RankingServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: RankerConfig::default(),
            store: None,
            on_chain: None,
            social: None,
            clock: None,
            metrics: None,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: RankerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ScoreStorage>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_on_chain_analyzer(mut self, analyzer: Arc<dyn OnChainAnalyzer>) -> Self {
        self.on_chain = Some(analyzer);
        self
    }

    pub fn with_social_aggregator(mut self, aggregator: Arc<dyn SocialAggregator>) -> Self {
        self.social = Some(aggregator);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RankingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set tier rank cut-offs.
    pub fn with_tier_cutoffs(mut self, high: usize, medium: usize) -> Self {
        self.config.tiers.high_cutoff = high;
        self.config.tiers.medium_cutoff = medium;
        self
    }

    /// Restrict social refresh to the HIGH tier.
    pub fn with_social_high_only(mut self, high_only: bool) -> Self {
        self.config.tiers.social_high_only = high_only;
        self
    }

    /// Set snapshot TTL in seconds.
    pub fn with_snapshot_ttl(mut self, ttl_seconds: u64) -> Self {
        self.config.snapshot_ttl_seconds = ttl_seconds;
        self
    }

    /// Set the on-chain cycle period in seconds.
    pub fn with_on_chain_cycle(mut self, period_seconds: u64) -> Self {
        self.config.on_chain_cycle_seconds = period_seconds;
        self
    }

    pub fn with_bootstrap_delay(mut self, delay_seconds: u64) -> Self {
        self.config.bootstrap_delay_seconds = delay_seconds;
        self
    }

    /// Set per-call timeouts in seconds.
    pub fn with_timeouts(mut self, on_chain_seconds: u64, social_seconds: u64) -> Self {
        self.config.on_chain_timeout_seconds = on_chain_seconds;
        self.config.social_timeout_seconds = social_seconds;
        self
    }

    /// Set rate limiting.
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.config.rate_limit_requests_per_second = requests_per_second;
        self
    }

    /// Set max parallel requests.
    pub fn with_max_parallel_requests(mut self, max_requests: usize) -> Self {
        self.config.max_parallel_requests = max_requests;
        self
    }

    pub fn with_social_batch_size(mut self, batch_size: usize) -> Self {
        self.config.social_batch_size = batch_size;
        self
    }

    /// Build the configuration only.
    pub fn build_config(self) -> RankerConfig {
        self.config
    }

    /// Validate the configuration and assemble the service.
    pub async fn build(self) -> Result<Arc<RankingService>> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn ScoreStorage> = match self.store {
            Some(store) => store,
            None => SqliteScoreStore::connect(&config.database_url).await?,
        };
        let on_chain: Arc<dyn OnChainAnalyzer> = match self.on_chain {
            Some(analyzer) => analyzer,
            None => Arc::new(HttpOnChainAnalyzer::from_config(&config)),
        };
        let social: Arc<dyn SocialAggregator> = match self.social {
            Some(aggregator) => aggregator,
            None => Arc::new(HttpSocialAggregator::from_config(&config)),
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(RankingMetrics::new()));

        let cache = Arc::new(RankingCache::new(
            store.clone(),
            clock.clone(),
            config.tiers.clone(),
            config.snapshot_ttl(),
            metrics.clone(),
        ));
        let records = Arc::new(RecordCache::new(config.max_cache_entries, config.snapshot_ttl()));
        let limiter = Arc::new(AdaptiveRateLimiter::new(
            config.rate_limit_requests_per_second,
            config.adaptive_error_rate_window,
            ADAPTIVE_ERROR_THRESHOLD,
        ));

        let refresher = Refresher::new(
            store.clone(),
            cache.clone(),
            records.clone(),
            on_chain,
            social,
            limiter,
            clock.clone(),
            metrics.clone(),
            RefreshLimits {
                on_chain_timeout: config.on_chain_timeout(),
                social_timeout: config.social_timeout(),
                max_parallel: config.max_parallel_requests,
                batch_size: config.social_batch_size,
            },
        );

        info!(
            "Ranking service ready: tiers {}/{}, snapshot TTL {}s, on-chain cycle {}s",
            config.tiers.high_cutoff, config.tiers.medium_cutoff, config.snapshot_ttl_seconds, config.on_chain_cycle_seconds
        );

        Ok(Arc::new(RankingService::new(
            store, cache, records, refresher, clock, config, metrics,
        )))
    }
}

impl Default for RankingServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
