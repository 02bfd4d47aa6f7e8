//! Shared fakes and service wiring for integration tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trendrank::ranking::{
    FetchError, ManualClock, MemoryScoreStore, OnChainAnalyzer, RankingService, RankingServiceBuilder, ScoreStorage,
    SocialAggregator,
};
use trendrank::types::{OnChainSignals, RiskLevel, SocialSignals, TokenListing, TokenScoreRecord};

/// Signals that fuse to an on-chain score of exactly 66.
pub fn scenario_signals() -> OnChainSignals {
    OnChainSignals {
        activity: 80.0,
        liquidity: 60.0,
        distribution: 50.0,
        momentum: 20.0,
        risk: 30.0,
    }
}

/// Signals whose on-chain score grows with `activity` (roughly `0.3 * activity + 15`).
pub fn signals_for(activity: f64) -> OnChainSignals {
    OnChainSignals {
        activity,
        liquidity: 0.0,
        distribution: 0.0,
        momentum: 0.0,
        risk: 100.0,
    }
}

/// Social signals that fuse to a social score of exactly 90.
pub fn social_signals_90() -> SocialSignals {
    SocialSignals {
        sentiment_score: 1.0,
        trending_score: 100.0,
        mention_count: 100,
        avg_engagement: 1000.0,
        confidence: 0.0,
        risk_level: RiskLevel::Low,
    }
}

pub fn listing(address: &str, symbol: &str) -> TokenListing {
    TokenListing {
        address: address.to_string(),
        name: format!("{} token", symbol),
        symbol: symbol.to_string(),
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// On-chain analyzer backed by a map, with per-address failures and delays.
#[derive(Default)]
pub struct FakeAnalyzer {
    signals: Mutex<HashMap<String, OnChainSignals>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl FakeAnalyzer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, address: &str, signals: OnChainSignals) {
        self.signals.lock().unwrap().insert(address.to_string(), signals);
    }

    pub fn fail(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn delay(&self, address: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(address.to_string(), delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OnChainAnalyzer for FakeAnalyzer {
    async fn analyze(&self, address: &str) -> Result<OnChainSignals, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(address) {
            return Err(FetchError::Transient(format!("analysis backend down for {}", address)));
        }
        self.signals
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .ok_or_else(|| FetchError::NotFound(address.to_string()))
    }
}

/// Social aggregator backed by a map keyed by ticker as the upstream spells it.
#[derive(Default)]
pub struct FakeSocial {
    results: Mutex<HashMap<String, SocialSignals>>,
    down: AtomicBool,
    batches: Mutex<Vec<Vec<String>>>,
}

impl FakeSocial {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, ticker: &str, signals: SocialSignals) {
        self.results.lock().unwrap().insert(ticker.to_string(), signals);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocialAggregator for FakeSocial {
    async fn search_and_analyze(&self, tickers: &[String]) -> Result<HashMap<String, SocialSignals>, FetchError> {
        self.batches.lock().unwrap().push(tickers.to_vec());
        if self.down.load(Ordering::SeqCst) {
            return Err(FetchError::Transient("social search unavailable".to_string()));
        }

        let results = self.results.lock().unwrap();
        Ok(results
            .iter()
            .filter(|(ticker, _)| tickers.iter().any(|t| t.eq_ignore_ascii_case(ticker)))
            .map(|(ticker, signals)| (ticker.clone(), signals.clone()))
            .collect())
    }
}

/// Score store that is unreachable for every operation.
pub struct DownStore;

#[async_trait]
impl ScoreStorage for DownStore {
    async fn insert_bootstrap(&self, _: &TokenListing, _: f64, _: DateTime<Utc>) -> Result<TokenScoreRecord> {
        Err(anyhow!("store offline"))
    }
    async fn update_metadata(&self, _: &str, _: &str, _: &str) -> Result<Option<TokenScoreRecord>> {
        Err(anyhow!("store offline"))
    }
    async fn apply_on_chain(&self, _: &str, _: f64, _: DateTime<Utc>) -> Result<Option<TokenScoreRecord>> {
        Err(anyhow!("store offline"))
    }
    async fn apply_social(&self, _: &str, _: f64, _: DateTime<Utc>) -> Result<Option<TokenScoreRecord>> {
        Err(anyhow!("store offline"))
    }
    async fn get_record(&self, _: &str) -> Result<Option<TokenScoreRecord>> {
        Err(anyhow!("store offline"))
    }
    async fn list_records(&self) -> Result<Vec<TokenScoreRecord>> {
        Err(anyhow!("store offline"))
    }
    async fn record_count(&self) -> Result<i64> {
        Err(anyhow!("store offline"))
    }
    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
}

/// A ranking service wired to in-memory fakes and a manual clock.
pub struct Harness {
    pub service: Arc<RankingService>,
    pub store: Arc<MemoryScoreStore>,
    pub clock: Arc<ManualClock>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub social: Arc<FakeSocial>,
}

pub async fn harness() -> Harness {
    harness_with(RankingServiceBuilder::new()).await
}

pub async fn harness_with(builder: RankingServiceBuilder) -> Harness {
    let store = MemoryScoreStore::new();
    let clock = Arc::new(ManualClock::new(start_time()));
    let analyzer = FakeAnalyzer::new();
    let social = FakeSocial::new();

    let service = builder
        .with_store(store.clone())
        .with_on_chain_analyzer(analyzer.clone())
        .with_social_aggregator(social.clone())
        .with_clock(clock.clone())
        .with_rate_limit(1000)
        .build()
        .await
        .expect("service should build");

    Harness {
        service,
        store,
        clock,
        analyzer,
        social,
    }
}

/// Addresses of the current top tokens, in rank order.
pub async fn top_addresses(service: &RankingService, limit: usize) -> Vec<String> {
    service
        .get_top_tokens(limit)
        .await
        .into_iter()
        .map(|entry| entry.record.address)
        .collect()
}
