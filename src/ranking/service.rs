//! RankingService - the read and administrative surface of the ranking core.
//!
//! Reads are served from the ranked snapshot and never fail: a store outage
//! degrades them to stale or empty results. Refresh cycles select their due
//! set from the same snapshot and hand it to the refresh paths.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::ranking::cache::{RankingCache, RecordCache};
use crate::ranking::clock::Clock;
use crate::ranking::config::RankerConfig;
use crate::ranking::due_set::{select_on_chain_due, select_social_due};
use crate::ranking::metrics::RankingMetrics;
use crate::ranking::refresh::{RefreshReport, Refresher};
use crate::ranking::storage::ScoreStorage;
use crate::types::{RankedToken, Tier, TokenListing, TokenScoreRecord};

/// Outcome of a manual refresh over a rank window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub on_chain: RefreshReport,
    pub social: RefreshReport,
}

/// Ranking service. Cheap to share behind an `Arc`.
pub struct RankingService {
    store: Arc<dyn ScoreStorage>,
    cache: Arc<RankingCache>,
    records: Arc<RecordCache>,
    refresher: Refresher,
    clock: Arc<dyn Clock>,
    config: RankerConfig,
    metrics: Arc<RankingMetrics>,
}

impl RankingService {
    pub(crate) fn new(
        store: Arc<dyn ScoreStorage>,
        cache: Arc<RankingCache>,
        records: Arc<RecordCache>,
        refresher: Refresher,
        clock: Arc<dyn Clock>,
        config: RankerConfig,
        metrics: Arc<RankingMetrics>,
    ) -> Self {
        Self {
            store,
            cache,
            records,
            refresher,
            clock,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<RankingMetrics> {
        self.metrics.clone()
    }

    /// The top `limit` tokens with 1-based ranks. Empty when nothing can be ranked.
    #[instrument(skip(self))]
    pub async fn get_top_tokens(&self, limit: usize) -> Vec<RankedToken> {
        self.cache.get_ranked_order().await.top(limit)
    }

    /// Full record for one address, tier taken from the current ranked order.
    #[instrument(skip(self))]
    pub async fn get_token(&self, address: &str) -> Option<TokenScoreRecord> {
        let snapshot = self.cache.get_ranked_order().await;

        let stored = match self.records.get(address).await {
            Some(record) => {
                self.metrics.increment_counter("record_cache_hits_total").await;
                Some(record)
            }
            None => {
                self.metrics.increment_counter("record_cache_misses_total").await;
                let epoch = self.records.begin_load();
                match self.store.get_record(address).await {
                    Ok(Some(record)) => {
                        self.records.insert_loaded(address, record.clone(), epoch).await;
                        Some(record)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        warn!("Score store read failed for {} ({:#}), serving snapshot copy", address, e);
                        return snapshot.get(address).cloned();
                    }
                }
            }
        };

        stored.map(|mut record| {
            record.tier = snapshot.tier_of(address).unwrap_or_default();
            record
        })
    }

    /// Refresh every token ranked `start_rank..=end_rank` (1-based) right now,
    /// ignoring staleness. Social refresh covers the window's social-eligible tiers.
    #[instrument(skip(self))]
    pub async fn trigger_refresh(&self, start_rank: usize, end_rank: usize) -> Result<TriggerReport> {
        if start_rank == 0 || start_rank > end_rank {
            bail!("Invalid rank window {}..={} (ranks are 1-based)", start_rank, end_rank);
        }

        let snapshot = self.cache.get_ranked_order().await;
        let window = snapshot.rank_window(start_rank, end_rank).to_vec();
        let policy = self.cache.policy();
        let social_window: Vec<TokenScoreRecord> = window
            .iter()
            .filter(|record| policy.social_eligible(record.tier))
            .cloned()
            .collect();

        info!(
            "Manual refresh of ranks {}..={}: {} tokens, {} social-eligible",
            start_rank,
            end_rank,
            window.len(),
            social_window.len()
        );

        let on_chain = self.refresher.refresh_on_chain(window).await;
        let social = self.refresher.refresh_social(social_window).await;
        Ok(TriggerReport { on_chain, social })
    }

    /// Force the next read to rebuild the ranked snapshot.
    pub async fn invalidate_cache(&self) {
        self.cache.invalidate().await;
        self.records.invalidate_all();
        info!("Ranking cache invalidated on request");
    }

    /// One on-chain cycle across all tiers.
    #[instrument(skip(self))]
    pub async fn run_on_chain_cycle(&self) -> RefreshReport {
        let started = Instant::now();
        let snapshot = self.cache.get_ranked_order().await;
        let due = select_on_chain_due(snapshot.records(), self.cache.policy(), self.clock.now());

        let report = if due.is_empty() {
            debug!("On-chain cycle: nothing due among {} tokens", snapshot.len());
            RefreshReport::default()
        } else {
            self.refresher.refresh_on_chain(due).await
        };

        self.metrics.increment_counter("on_chain_cycles_total").await;
        self.metrics.record_cycle_time("on_chain", started.elapsed()).await;
        if !report.is_noop() {
            info!(
                "On-chain cycle: {} due, {} refreshed, {} failed, {} skipped",
                report.selected, report.refreshed, report.failed, report.skipped
            );
        }
        report
    }

    /// One social cycle for a single tier.
    #[instrument(skip(self))]
    pub async fn run_social_cycle(&self, tier: Tier) -> RefreshReport {
        let started = Instant::now();
        let snapshot = self.cache.get_ranked_order().await;
        let due = select_social_due(snapshot.records(), tier, self.cache.policy(), self.clock.now());

        let report = if due.is_empty() {
            debug!("Social cycle ({}): nothing due", tier);
            RefreshReport::default()
        } else {
            self.refresher.refresh_social(due).await
        };

        self.metrics.increment_counter("social_cycles_total").await;
        self.metrics
            .record_cycle_time(&format!("social_{}", tier.as_str()), started.elapsed())
            .await;
        if !report.is_noop() {
            info!(
                "Social cycle ({}): {} due, {} refreshed, {} failed, {} skipped",
                tier, report.selected, report.refreshed, report.failed, report.skipped
            );
        }
        report
    }

    /// Start tracking the given tokens. Already tracked tokens only get their
    /// name and symbol updated.
    #[instrument(skip(self, listings), fields(count = listings.len()))]
    pub async fn bootstrap_tokens(&self, listings: &[TokenListing]) -> RefreshReport {
        let report = self.refresher.bootstrap(listings).await;
        info!(
            "Bootstrap: {} listings, {} new, {} failed, {} already tracked",
            report.selected, report.refreshed, report.failed, report.skipped
        );
        report
    }

    pub async fn health_check(&self) -> bool {
        match self.store.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Score store health check failed: {:#}", e);
                false
            }
        }
    }

    pub async fn record_count(&self) -> Result<i64> {
        self.store.record_count().await
    }
}
