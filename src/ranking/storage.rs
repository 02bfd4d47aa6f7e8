//! Storage abstraction layer for token scores
//!
//! This module defines the contract for the score store, the single source of
//! truth for current scores. Every write of a sub-score recomputes and persists
//! `final_score` in the same update, and writes to one address are serialized
//! so the fusion never reads a torn pair of sub-scores.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::ranking::scoring;
use crate::types::{Tier, TokenListing, TokenScoreRecord};

/// Formal contract for the score store.
#[async_trait]
pub trait ScoreStorage: Send + Sync {
    /// Creates the record for a newly tracked token with its on-chain score only.
    /// An address that is already tracked keeps its scores and timestamps and
    /// only takes the listing's name and symbol.
    async fn insert_bootstrap(
        &self,
        listing: &TokenListing,
        on_chain_score: f64,
        at: DateTime<Utc>,
    ) -> Result<TokenScoreRecord>;

    /// Replaces name and symbol of a tracked token, nothing else.
    /// Returns `None` when the address is not tracked.
    async fn update_metadata(&self, address: &str, name: &str, symbol: &str) -> Result<Option<TokenScoreRecord>>;

    /// Writes a new on-chain score and the matching final score.
    /// Returns `None` when the address is not tracked.
    async fn apply_on_chain(
        &self,
        address: &str,
        on_chain_score: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenScoreRecord>>;

    /// Writes a new social score and the matching final score.
    /// Returns `None` when the address is not tracked.
    async fn apply_social(
        &self,
        address: &str,
        social_score: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenScoreRecord>>;

    /// Retrieves one record by address.
    async fn get_record(&self, address: &str) -> Result<Option<TokenScoreRecord>>;

    /// Retrieves every tracked record, in no particular order.
    async fn list_records(&self) -> Result<Vec<TokenScoreRecord>>;

    /// Gets the number of tracked records.
    async fn record_count(&self) -> Result<i64>;

    /// Health check for the storage backend.
    async fn health_check(&self) -> Result<bool>;
}

/// Per-address write locks shared by store implementations. An entry lives
/// only while some writer holds or waits on it.
#[derive(Default)]
pub struct AddressLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Write lock on one address; the map entry is pruned when the last holder drops.
pub struct AddressGuard<'a> {
    locks: &'a AddressLocks,
    address: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AddressGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.entries();
        if locks.get(&self.address).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.address);
        }
    }
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire the write lock for one address, waiting for any writer in flight.
    pub async fn lock(&self, address: &str) -> AddressGuard<'_> {
        let lock = self
            .entries()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        AddressGuard {
            locks: self,
            address: address.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of addresses with a writer holding or waiting on their lock.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply a new on-chain score to a record, keeping the final score consistent.
pub fn with_on_chain(mut record: TokenScoreRecord, on_chain_score: f64, at: DateTime<Utc>) -> TokenScoreRecord {
    record.on_chain_score = on_chain_score;
    record.final_score = scoring::final_score(on_chain_score, record.social_score);
    record.last_updated = at;
    record
}

/// Apply a new social score to a record, keeping the final score consistent.
pub fn with_social(mut record: TokenScoreRecord, social_score: f64, at: DateTime<Utc>) -> TokenScoreRecord {
    record.social_score = Some(social_score);
    record.final_score = scoring::final_score(record.on_chain_score, Some(social_score));
    record.social_last_updated = Some(at);
    record
}

/// Take name and symbol from a listing, leaving scores and timestamps alone.
pub fn with_metadata(mut record: TokenScoreRecord, name: &str, symbol: &str) -> TokenScoreRecord {
    record.name = name.to_string();
    record.symbol = symbol.to_string();
    record
}

/// Build the record for a token seen for the first time.
pub fn bootstrap_record(listing: &TokenListing, on_chain_score: f64, at: DateTime<Utc>) -> TokenScoreRecord {
    TokenScoreRecord {
        address: listing.address.clone(),
        name: listing.name.clone(),
        symbol: listing.symbol.clone(),
        on_chain_score,
        social_score: None,
        final_score: scoring::final_score(on_chain_score, None),
        last_updated: at,
        social_last_updated: None,
        tier: Tier::default(),
    }
}

/// In-process score store. Useful for tests and embedding; contents are lost on drop.
#[derive(Default)]
pub struct MemoryScoreStore {
    records: RwLock<HashMap<String, TokenScoreRecord>>,
    locks: AddressLocks,
}

impl MemoryScoreStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ScoreStorage for MemoryScoreStore {
    async fn insert_bootstrap(
        &self,
        listing: &TokenListing,
        on_chain_score: f64,
        at: DateTime<Utc>,
    ) -> Result<TokenScoreRecord> {
        let _guard = self.locks.lock(&listing.address).await;
        let mut records = self.records.write().await;

        let record = match records.remove(&listing.address) {
            Some(existing) => with_metadata(existing, &listing.name, &listing.symbol),
            None => bootstrap_record(listing, on_chain_score, at),
        };

        debug!("Stored bootstrap record for {}", record.address);
        records.insert(record.address.clone(), record.clone());
        Ok(record)
    }

    async fn update_metadata(&self, address: &str, name: &str, symbol: &str) -> Result<Option<TokenScoreRecord>> {
        let _guard = self.locks.lock(address).await;
        let mut records = self.records.write().await;

        let Some(existing) = records.get(address).cloned() else {
            return Ok(None);
        };
        let updated = with_metadata(existing, name, symbol);
        records.insert(address.to_string(), updated.clone());
        Ok(Some(updated))
    }

    async fn apply_on_chain(
        &self,
        address: &str,
        on_chain_score: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenScoreRecord>> {
        let _guard = self.locks.lock(address).await;
        let mut records = self.records.write().await;

        let Some(existing) = records.get(address).cloned() else {
            return Ok(None);
        };
        let updated = with_on_chain(existing, on_chain_score, at);
        records.insert(address.to_string(), updated.clone());
        Ok(Some(updated))
    }

    async fn apply_social(
        &self,
        address: &str,
        social_score: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenScoreRecord>> {
        let _guard = self.locks.lock(address).await;
        let mut records = self.records.write().await;

        let Some(existing) = records.get(address).cloned() else {
            return Ok(None);
        };
        let updated = with_social(existing, social_score, at);
        records.insert(address.to_string(), updated.clone());
        Ok(Some(updated))
    }

    async fn get_record(&self, address: &str) -> Result<Option<TokenScoreRecord>> {
        Ok(self.records.read().await.get(address).cloned())
    }

    async fn list_records(&self) -> Result<Vec<TokenScoreRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn record_count(&self) -> Result<i64> {
        i64::try_from(self.records.read().await.len()).map_err(|e| anyhow!("Record count overflow: {}", e))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
