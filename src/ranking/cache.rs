//! Ranking cache - a time-bounded, wholesale-rebuilt snapshot of the ranked order.
//!
//! The snapshot is never patched in place. Writers call [`RankingCache::invalidate`]
//! and the next reader rebuilds it from a full store scan. If the store cannot be
//! read, readers get the last good snapshot, or an empty one.
//!
//! Single records are cached separately in [`RecordCache`].

use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::ranking::clock::{elapsed_between, Clock};
use crate::ranking::config::TierPolicy;
use crate::ranking::metrics::RankingMetrics;
use crate::ranking::storage::ScoreStorage;
use crate::types::{RankedToken, Tier, TokenScoreRecord};

/// Descending by final score, ties by ascending address.
pub fn rank_order(a: &TokenScoreRecord, b: &TokenScoreRecord) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| a.address.cmp(&b.address))
}

/// Immutable, timestamped full ranked order.
#[derive(Debug, Clone)]
pub struct RankedSnapshot {
    records: Vec<TokenScoreRecord>,
    positions: HashMap<String, usize>,
    built_at: DateTime<Utc>,
}

impl RankedSnapshot {
    /// Sort `records` into rank order and stamp each with its tier.
    pub fn build(mut records: Vec<TokenScoreRecord>, policy: &TierPolicy, built_at: DateTime<Utc>) -> Self {
        records.sort_by(rank_order);

        let mut positions = HashMap::with_capacity(records.len());
        for (position, record) in records.iter_mut().enumerate() {
            record.tier = policy.classify(position);
            positions.insert(record.address.clone(), position);
        }

        Self {
            records,
            positions,
            built_at,
        }
    }

    pub fn empty(built_at: DateTime<Utc>) -> Self {
        Self {
            records: Vec::new(),
            positions: HashMap::new(),
            built_at,
        }
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in rank order, tiers stamped.
    pub fn records(&self) -> &[TokenScoreRecord] {
        &self.records
    }

    /// `(address, final_score)` pairs in rank order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, f64)> {
        self.records.iter().map(|r| (r.address.as_str(), r.final_score))
    }

    /// Zero-based position of an address.
    pub fn position_of(&self, address: &str) -> Option<usize> {
        self.positions.get(address).copied()
    }

    pub fn tier_of(&self, address: &str) -> Option<Tier> {
        self.position_of(address).map(|position| self.records[position].tier)
    }

    pub fn get(&self, address: &str) -> Option<&TokenScoreRecord> {
        self.position_of(address).map(|position| &self.records[position])
    }

    /// The first `limit` records with 1-based ranks.
    pub fn top(&self, limit: usize) -> Vec<RankedToken> {
        self.records
            .iter()
            .take(limit)
            .enumerate()
            .map(|(position, record)| RankedToken {
                rank: position + 1,
                record: record.clone(),
            })
            .collect()
    }

    /// Records whose 1-based rank lies in `[start_rank, end_rank]`.
    pub fn rank_window(&self, start_rank: usize, end_rank: usize) -> &[TokenScoreRecord] {
        let start = start_rank.saturating_sub(1).min(self.records.len());
        let end = end_rank.min(self.records.len()).max(start);
        &self.records[start..end]
    }
}

#[derive(Default)]
struct SnapshotSlot {
    /// Snapshot served to readers while fresh
    current: Option<Arc<RankedSnapshot>>,
    /// Most recent successful build, kept across invalidation for fallback
    last_good: Option<Arc<RankedSnapshot>>,
}

/// Owner of the ranked snapshot and its staleness policy.
pub struct RankingCache {
    storage: Arc<dyn ScoreStorage>,
    clock: Arc<dyn Clock>,
    policy: TierPolicy,
    ttl: Duration,
    slot: RwLock<SnapshotSlot>,
    rebuild_lock: Mutex<()>,
    generation: AtomicU64,
    metrics: Arc<RankingMetrics>,
}

impl RankingCache {
    pub fn new(
        storage: Arc<dyn ScoreStorage>,
        clock: Arc<dyn Clock>,
        policy: TierPolicy,
        ttl: Duration,
        metrics: Arc<RankingMetrics>,
    ) -> Self {
        Self {
            storage,
            clock,
            policy,
            ttl,
            slot: RwLock::new(SnapshotSlot::default()),
            rebuild_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            metrics,
        }
    }

    fn is_fresh(&self, snapshot: &RankedSnapshot) -> bool {
        elapsed_between(snapshot.built_at, self.clock.now()) < self.ttl
    }

    async fn fresh_snapshot(&self) -> Option<Arc<RankedSnapshot>> {
        let slot = self.slot.read().await;
        slot.current
            .as_ref()
            .filter(|snapshot| self.is_fresh(snapshot))
            .cloned()
    }

    /// Current ranked order, rebuilt from the store when absent or older than the TTL.
    #[instrument(skip(self))]
    pub async fn get_ranked_order(&self) -> Arc<RankedSnapshot> {
        if let Some(snapshot) = self.fresh_snapshot().await {
            return snapshot;
        }

        // One rebuild at a time; whoever waited may find it already done.
        let _rebuild = self.rebuild_lock.lock().await;
        if let Some(snapshot) = self.fresh_snapshot().await {
            return snapshot;
        }

        let generation = self.generation.load(AtomicOrdering::SeqCst);
        match self.storage.list_records().await {
            Ok(records) => {
                let snapshot = Arc::new(RankedSnapshot::build(records, &self.policy, self.clock.now()));
                self.metrics.increment_counter("snapshot_rebuilds_total").await;

                let mut slot = self.slot.write().await;
                if self.generation.load(AtomicOrdering::SeqCst) == generation {
                    slot.current = Some(snapshot.clone());
                } else {
                    debug!("Invalidated during rebuild, not installing snapshot as current");
                }
                slot.last_good = Some(snapshot.clone());

                debug!("Rebuilt ranked snapshot with {} tokens", snapshot.len());
                snapshot
            }
            Err(e) => {
                self.metrics.increment_counter("snapshot_fallbacks_total").await;
                let slot = self.slot.read().await;
                match &slot.last_good {
                    Some(previous) => {
                        warn!(
                            "Score store unavailable ({:#}), serving snapshot built at {}",
                            e,
                            previous.built_at()
                        );
                        previous.clone()
                    }
                    None => {
                        warn!("Score store unavailable ({:#}) and no previous snapshot, serving empty order", e);
                        Arc::new(RankedSnapshot::empty(self.clock.now()))
                    }
                }
            }
        }
    }

    /// Drop the current snapshot so the next read rebuilds it.
    pub async fn invalidate(&self) {
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
        self.slot.write().await.current = None;
        debug!("Ranked snapshot invalidated");
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }
}

/// Per-address record cache in front of the store.
///
/// Every invalidation bumps a write epoch. A reader that loaded a record from
/// the store only keeps it cached if no invalidation happened since the load
/// began, so a slow read cannot re-cache a record a writer just replaced.
pub struct RecordCache {
    records: Cache<String, TokenScoreRecord>,
    epoch: AtomicU64,
}

impl RecordCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            records: Cache::builder().max_capacity(max_entries).time_to_live(ttl).build(),
            epoch: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, address: &str) -> Option<TokenScoreRecord> {
        self.records.get(address).await
    }

    /// Mark the start of a store read. Pass the result to [`RecordCache::insert_loaded`].
    pub fn begin_load(&self) -> u64 {
        self.epoch.load(AtomicOrdering::SeqCst)
    }

    /// Cache a record read from the store since `epoch`, unless a write invalidated
    /// records in the meantime.
    pub async fn insert_loaded(&self, address: &str, record: TokenScoreRecord, epoch: u64) {
        self.records.insert(address.to_string(), record).await;
        if self.epoch.load(AtomicOrdering::SeqCst) != epoch {
            self.records.invalidate(address).await;
        }
    }

    pub async fn invalidate(&self, address: &str) {
        self.epoch.fetch_add(1, AtomicOrdering::SeqCst);
        self.records.invalidate(address).await;
    }

    pub fn invalidate_all(&self) {
        self.epoch.fetch_add(1, AtomicOrdering::SeqCst);
        self.records.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::clock::ManualClock;
    use crate::ranking::storage::MemoryScoreStore;
    use crate::types::TokenListing;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    fn record(address: &str, final_score: f64) -> TokenScoreRecord {
        TokenScoreRecord {
            address: address.to_string(),
            name: address.to_string(),
            symbol: address.to_string(),
            on_chain_score: final_score,
            social_score: None,
            final_score,
            last_updated: Utc::now(),
            social_last_updated: None,
            tier: Tier::Low,
        }
    }

    /// Store wrapper whose reads can be switched off.
    struct FlakyStore {
        inner: Arc<MemoryScoreStore>,
        down: AtomicBool,
    }

    #[async_trait]
    impl ScoreStorage for FlakyStore {
        async fn insert_bootstrap(&self, listing: &TokenListing, score: f64, at: DateTime<Utc>) -> Result<TokenScoreRecord> {
            self.inner.insert_bootstrap(listing, score, at).await
        }
        async fn update_metadata(&self, address: &str, name: &str, symbol: &str) -> Result<Option<TokenScoreRecord>> {
            self.inner.update_metadata(address, name, symbol).await
        }
        async fn apply_on_chain(&self, address: &str, score: f64, at: DateTime<Utc>) -> Result<Option<TokenScoreRecord>> {
            self.inner.apply_on_chain(address, score, at).await
        }
        async fn apply_social(&self, address: &str, score: f64, at: DateTime<Utc>) -> Result<Option<TokenScoreRecord>> {
            self.inner.apply_social(address, score, at).await
        }
        async fn get_record(&self, address: &str) -> Result<Option<TokenScoreRecord>> {
            self.inner.get_record(address).await
        }
        async fn list_records(&self) -> Result<Vec<TokenScoreRecord>> {
            if self.down.load(AtomicOrdering::SeqCst) {
                return Err(anyhow!("connection refused"));
            }
            self.inner.list_records().await
        }
        async fn record_count(&self) -> Result<i64> {
            self.inner.record_count().await
        }
        async fn health_check(&self) -> Result<bool> {
            Ok(!self.down.load(AtomicOrdering::SeqCst))
        }
    }

    fn listing(address: &str) -> TokenListing {
        TokenListing {
            address: address.to_string(),
            name: address.to_string(),
            symbol: address.to_string(),
        }
    }

    fn cache_over(store: Arc<dyn ScoreStorage>, clock: Arc<ManualClock>) -> RankingCache {
        RankingCache::new(
            store,
            clock,
            TierPolicy::default(),
            Duration::from_secs(120),
            Arc::new(RankingMetrics::new()),
        )
    }

    #[test]
    fn test_ties_break_by_address() {
        let snapshot = RankedSnapshot::build(
            vec![record("C", 50.0), record("B", 80.0), record("A", 80.0)],
            &TierPolicy::default(),
            Utc::now(),
        );

        let order: Vec<&str> = snapshot.entries().map(|(address, _)| address).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_tiers_stamped_from_position() {
        let records: Vec<TokenScoreRecord> = (0..120).map(|i| record(&format!("T{:03}", i), 1000.0 - i as f64)).collect();
        let snapshot = RankedSnapshot::build(records, &TierPolicy::default(), Utc::now());

        assert_eq!(snapshot.tier_of("T019"), Some(Tier::High));
        assert_eq!(snapshot.tier_of("T020"), Some(Tier::Medium));
        assert_eq!(snapshot.tier_of("T099"), Some(Tier::Medium));
        assert_eq!(snapshot.tier_of("T100"), Some(Tier::Low));
        assert_eq!(snapshot.tier_of("missing"), None);
    }

    #[test]
    fn test_top_and_rank_window() {
        let snapshot = RankedSnapshot::build(
            vec![record("A", 30.0), record("B", 20.0), record("C", 10.0)],
            &TierPolicy::default(),
            Utc::now(),
        );

        let top = snapshot.top(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].rank, 1);
        assert_eq!(top[1].record.address, "B");

        let window: Vec<&str> = snapshot.rank_window(2, 3).iter().map(|r| r.address.as_str()).collect();
        assert_eq!(window, vec!["B", "C"]);
        assert!(snapshot.rank_window(4, 10).is_empty());
        assert_eq!(snapshot.top(10).len(), 3);
    }

    #[tokio::test]
    async fn test_rebuild_after_ttl() {
        let store = MemoryScoreStore::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        store.insert_bootstrap(&listing("A"), 10.0, clock.now()).await.unwrap();
        let cache = cache_over(store.clone(), clock.clone());

        let first = cache.get_ranked_order().await;
        assert_eq!(first.len(), 1);

        // Written behind the cache's back: only the TTL brings it in.
        store.insert_bootstrap(&listing("B"), 20.0, clock.now()).await.unwrap();
        clock.advance(Duration::from_secs(119));
        assert_eq!(cache.get_ranked_order().await.len(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get_ranked_order().await.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let store = MemoryScoreStore::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        store.insert_bootstrap(&listing("A"), 10.0, clock.now()).await.unwrap();
        let cache = cache_over(store.clone(), clock.clone());
        assert_eq!(cache.get_ranked_order().await.len(), 1);

        store.insert_bootstrap(&listing("B"), 20.0, clock.now()).await.unwrap();
        cache.invalidate().await;

        let snapshot = cache.get_ranked_order().await;
        let order: Vec<&str> = snapshot.entries().map(|(address, _)| address).collect();
        assert_eq!(order, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_unreachable_store_without_snapshot_is_empty() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryScoreStore::new(),
            down: AtomicBool::new(true),
        });
        let cache = cache_over(flaky, Arc::new(ManualClock::new(Utc::now())));

        assert!(cache.get_ranked_order().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store_serves_previous_snapshot() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryScoreStore::new(),
            down: AtomicBool::new(false),
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        flaky.insert_bootstrap(&listing("A"), 10.0, clock.now()).await.unwrap();
        let cache = cache_over(flaky.clone(), clock.clone());
        let built = cache.get_ranked_order().await;

        flaky.down.store(true, AtomicOrdering::SeqCst);
        cache.invalidate().await;
        clock.advance(Duration::from_secs(600));

        let served = cache.get_ranked_order().await;
        assert_eq!(served.len(), 1);
        assert_eq!(served.built_at(), built.built_at());
    }

    #[tokio::test]
    async fn test_record_cache_keeps_clean_load() {
        let records = RecordCache::new(100, Duration::from_secs(60));
        let epoch = records.begin_load();
        records.insert_loaded("A", record("A", 10.0), epoch).await;

        assert_eq!(records.get("A").await.map(|r| r.final_score), Some(10.0));
    }

    #[tokio::test]
    async fn test_record_cache_drops_load_raced_by_write() {
        let records = RecordCache::new(100, Duration::from_secs(60));
        let epoch = records.begin_load();

        // A writer replaces A while the reader is still waiting on the store.
        records.invalidate("A").await;
        records.insert_loaded("A", record("A", 10.0), epoch).await;
        assert!(records.get("A").await.is_none());

        let epoch = records.begin_load();
        records.insert_loaded("A", record("A", 20.0), epoch).await;
        records.invalidate_all();
        assert!(records.get("A").await.is_none());
    }
}
