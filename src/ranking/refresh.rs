//! On-chain and social refresh paths.
//!
//! Both paths take an already selected set of records, fetch fresh signals
//! from the collaborators, fuse them into sub-scores and write them through
//! the score store. A failure for one token (or one ticker batch) is logged
//! and counted, never propagated, and the failed token keeps its timestamps.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::ranking::cache::{RankingCache, RecordCache};
use crate::ranking::clock::Clock;
use crate::ranking::data_sources::{FetchError, OnChainAnalyzer, SocialAggregator};
use crate::ranking::metrics::RankingMetrics;
use crate::ranking::rate_limit::AdaptiveRateLimiter;
use crate::ranking::scoring;
use crate::ranking::storage::ScoreStorage;
use crate::types::{OnChainSignals, SocialSignals, TokenListing, TokenScoreRecord};

/// Outcome counts of one refresh run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Records handed to the refresh path
    pub selected: usize,
    /// Records written with a new sub-score
    pub refreshed: usize,
    /// Records whose fetch or write failed
    pub failed: usize,
    /// Records left alone (no data this cycle, untracked, empty symbol)
    pub skipped: usize,
}

impl RefreshReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Refreshed => self.refreshed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.selected == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Refreshed,
    Failed,
    Skipped,
}

/// Normalized social search key for a symbol. Empty symbols have none.
pub fn ticker_of(symbol: &str) -> Option<String> {
    let ticker = symbol.trim().to_uppercase();
    (!ticker.is_empty()).then_some(ticker)
}

/// Executes refresh work against the collaborators and the score store.
pub struct Refresher {
    store: Arc<dyn ScoreStorage>,
    cache: Arc<RankingCache>,
    records: Arc<RecordCache>,
    on_chain: Arc<dyn OnChainAnalyzer>,
    social: Arc<dyn SocialAggregator>,
    limiter: Arc<AdaptiveRateLimiter>,
    clock: Arc<dyn Clock>,
    metrics: Arc<RankingMetrics>,
    on_chain_timeout: Duration,
    social_timeout: Duration,
    max_parallel: usize,
    batch_size: usize,
}

/// Collaborator call limits for a [`Refresher`].
#[derive(Debug, Clone, Copy)]
pub struct RefreshLimits {
    pub on_chain_timeout: Duration,
    pub social_timeout: Duration,
    pub max_parallel: usize,
    pub batch_size: usize,
}

impl Refresher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ScoreStorage>,
        cache: Arc<RankingCache>,
        records: Arc<RecordCache>,
        on_chain: Arc<dyn OnChainAnalyzer>,
        social: Arc<dyn SocialAggregator>,
        limiter: Arc<AdaptiveRateLimiter>,
        clock: Arc<dyn Clock>,
        metrics: Arc<RankingMetrics>,
        limits: RefreshLimits,
    ) -> Self {
        Self {
            store,
            cache,
            records,
            on_chain,
            social,
            limiter,
            clock,
            metrics,
            on_chain_timeout: limits.on_chain_timeout,
            social_timeout: limits.social_timeout,
            max_parallel: limits.max_parallel.max(1),
            batch_size: limits.batch_size.max(1),
        }
    }

    /// Rate-limited, time-bounded on-chain analysis of one address.
    async fn fetch_on_chain(&self, address: &str) -> Result<OnChainSignals, FetchError> {
        self.limiter.acquire().await;
        let result = match timeout(self.on_chain_timeout, self.on_chain.analyze(address)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.on_chain_timeout)),
        };
        self.record_fetch(&result);
        result
    }

    /// Rate-limited, time-bounded social search for one ticker batch.
    async fn fetch_social(&self, tickers: &[String]) -> Result<HashMap<String, SocialSignals>, FetchError> {
        self.limiter.acquire().await;
        let result = match timeout(self.social_timeout, self.social.search_and_analyze(tickers)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.social_timeout)),
        };
        self.record_fetch(&result);
        result
    }

    fn record_fetch<T>(&self, result: &Result<T, FetchError>) {
        match result {
            Err(e) if e.is_retryable() => self.limiter.record_failure(),
            _ => self.limiter.record_success(),
        }
    }

    /// Drop every derived view of a freshly written record.
    async fn invalidate_views(&self, address: &str) {
        self.cache.invalidate().await;
        self.records.invalidate(address).await;
    }

    async fn note_fetch_failure(&self, address: &str, e: &FetchError) {
        self.metrics.increment_counter("fetch_failures_total").await;
        match e {
            FetchError::NotFound(_) => warn!("Token {} unknown to on-chain analyzer, leaving it stale", address),
            _ => warn!("On-chain refresh failed for {}: {}", address, e),
        }
    }

    async fn refresh_one_on_chain(&self, address: String) -> Outcome {
        let signals = match self.fetch_on_chain(&address).await {
            Ok(signals) => signals,
            Err(e) => {
                self.note_fetch_failure(&address, &e).await;
                return Outcome::Failed;
            }
        };

        let score = scoring::on_chain_score(&signals);
        match self.store.apply_on_chain(&address, score, self.clock.now()).await {
            Ok(Some(record)) => {
                self.invalidate_views(&address).await;
                self.metrics.increment_counter("tokens_refreshed_total").await;
                debug!("Refreshed on-chain score for {}: {}", address, scoring::describe(record.on_chain_score, record.social_score));
                Outcome::Refreshed
            }
            Ok(None) => {
                debug!("Token {} no longer tracked, skipping on-chain write", address);
                Outcome::Skipped
            }
            Err(e) => {
                self.metrics.increment_counter("store_write_failures_total").await;
                warn!("Failed to write on-chain score for {}: {:#}", address, e);
                Outcome::Failed
            }
        }
    }

    /// Refresh the on-chain sub-score of every given record, at most
    /// `max_parallel` fetches in flight.
    pub async fn refresh_on_chain(&self, due: Vec<TokenScoreRecord>) -> RefreshReport {
        let mut report = RefreshReport {
            selected: due.len(),
            ..RefreshReport::default()
        };

        let outcomes: Vec<Outcome> = stream::iter(due)
            .map(|record| self.refresh_one_on_chain(record.address))
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }
        report
    }

    async fn write_social(&self, address: &str, score: f64) -> Outcome {
        match self.store.apply_social(address, score, self.clock.now()).await {
            Ok(Some(_)) => {
                self.invalidate_views(address).await;
                self.metrics.increment_counter("tokens_refreshed_total").await;
                debug!("Refreshed social score for {}: {}", address, score);
                Outcome::Refreshed
            }
            Ok(None) => Outcome::Skipped,
            Err(e) => {
                self.metrics.increment_counter("store_write_failures_total").await;
                warn!("Failed to write social score for {}: {:#}", address, e);
                Outcome::Failed
            }
        }
    }

    /// Refresh the social sub-score of every given record, one collaborator
    /// call per batch of distinct tickers.
    pub async fn refresh_social(&self, due: Vec<TokenScoreRecord>) -> RefreshReport {
        let mut report = RefreshReport {
            selected: due.len(),
            ..RefreshReport::default()
        };

        let mut by_ticker: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for record in due {
            match ticker_of(&record.symbol) {
                Some(ticker) => by_ticker.entry(ticker).or_default().push(record.address),
                None => {
                    debug!("Token {} has no symbol, skipping social refresh", record.address);
                    report.skipped += 1;
                }
            }
        }

        let tickers: Vec<String> = by_ticker.keys().cloned().collect();
        for batch in tickers.chunks(self.batch_size) {
            let batch_addresses = batch
                .iter()
                .map(|ticker| by_ticker.get(ticker).map_or(0, Vec::len))
                .sum::<usize>();

            let results = match self.fetch_social(batch).await {
                Ok(results) => results,
                Err(e) => {
                    self.metrics.increment_counter("fetch_failures_total").await;
                    warn!("Social search failed for batch of {} tickers: {}", batch.len(), e);
                    report.failed += batch_addresses;
                    continue;
                }
            };

            let results: HashMap<String, SocialSignals> = results
                .into_iter()
                .filter_map(|(ticker, signals)| ticker_of(&ticker).map(|ticker| (ticker, signals)))
                .collect();

            for ticker in batch {
                let Some(addresses) = by_ticker.get(ticker) else {
                    continue;
                };
                let Some(signals) = results.get(ticker) else {
                    debug!("No social data for {} this cycle", ticker);
                    report.skipped += addresses.len();
                    continue;
                };

                let score = scoring::social_score(signals);
                for address in addresses {
                    report.record(self.write_social(address, score).await);
                }
            }
        }

        report
    }

    async fn bootstrap_one(&self, listing: &TokenListing) -> Outcome {
        match self.store.get_record(&listing.address).await {
            Ok(Some(existing)) => {
                if existing.name == listing.name && existing.symbol == listing.symbol {
                    return Outcome::Skipped;
                }
                let updated = self
                    .store
                    .update_metadata(&listing.address, &listing.name, &listing.symbol)
                    .await;
                return match updated {
                    Ok(_) => {
                        self.invalidate_views(&listing.address).await;
                        debug!("Updated name/symbol for {}", listing.address);
                        Outcome::Skipped
                    }
                    Err(e) => {
                        self.metrics.increment_counter("store_write_failures_total").await;
                        warn!("Failed to update metadata for {}: {:#}", listing.address, e);
                        Outcome::Failed
                    }
                };
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to look up {} before bootstrap: {:#}", listing.address, e);
                return Outcome::Failed;
            }
        }

        let signals = match self.fetch_on_chain(&listing.address).await {
            Ok(signals) => signals,
            Err(e) => {
                self.note_fetch_failure(&listing.address, &e).await;
                return Outcome::Failed;
            }
        };

        let score = scoring::on_chain_score(&signals);
        match self.store.insert_bootstrap(listing, score, self.clock.now()).await {
            Ok(record) => {
                self.invalidate_views(&listing.address).await;
                self.metrics.increment_counter("tokens_refreshed_total").await;
                debug!("Bootstrapped {} ({}) with score {}", record.address, record.symbol, record.final_score);
                Outcome::Refreshed
            }
            Err(e) => {
                self.metrics.increment_counter("store_write_failures_total").await;
                warn!("Failed to insert bootstrap record for {}: {:#}", listing.address, e);
                Outcome::Failed
            }
        }
    }

    /// Start tracking every listing not yet in the store.
    pub async fn bootstrap(&self, listings: &[TokenListing]) -> RefreshReport {
        let mut report = RefreshReport {
            selected: listings.len(),
            ..RefreshReport::default()
        };

        let outcomes: Vec<Outcome> = stream::iter(listings)
            .map(|listing| self.bootstrap_one(listing))
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_normalization() {
        assert_eq!(ticker_of(" bonk "), Some("BONK".to_string()));
        assert_eq!(ticker_of("WIF"), Some("WIF".to_string()));
        assert_eq!(ticker_of("   "), None);
        assert_eq!(ticker_of(""), None);
    }

    #[test]
    fn test_report_counts() {
        let mut report = RefreshReport {
            selected: 3,
            ..RefreshReport::default()
        };
        report.record(Outcome::Refreshed);
        report.record(Outcome::Failed);
        report.record(Outcome::Skipped);

        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert!(!report.is_noop());
        assert!(RefreshReport::default().is_noop());
    }
}
