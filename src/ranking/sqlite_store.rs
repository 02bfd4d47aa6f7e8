//! SqliteScoreStore - SQLite implementation of the score store
//!
//! One row per tracked token in `token_scores`, keyed by address. Timestamps are
//! stored as epoch milliseconds.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};

use crate::ranking::storage::{
    bootstrap_record, with_metadata, with_on_chain, with_social, AddressLocks, ScoreStorage,
};
use crate::types::{Tier, TokenListing, TokenScoreRecord};

/// Helper type for deserializing records from SQLite
#[derive(FromRow)]
struct TokenScoreRow {
    address: String,
    name: String,
    symbol: String,
    on_chain_score: f64,
    social_score: Option<f64>,
    final_score: f64,
    last_updated: i64,
    social_last_updated: Option<i64>,
}

/// SQLite-backed score store.
pub struct SqliteScoreStore {
    pool: Pool<Sqlite>,
    locks: AddressLocks,
}

impl SqliteScoreStore {
    /// Connect to `database_url` (e.g. `sqlite:./trendrank.db?mode=rwc`) and
    /// create the schema if needed.
    pub async fn connect(database_url: &str) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to SQLite database {}", database_url))?;

        Self::create_schema(&pool).await?;

        info!("SqliteScoreStore initialized and connected to {}", database_url);

        Ok(Arc::new(Self {
            pool,
            locks: AddressLocks::new(),
        }))
    }

    async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS token_scores (
                address TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                on_chain_score REAL NOT NULL,
                social_score REAL,
                final_score REAL NOT NULL,
                last_updated INTEGER NOT NULL,
                social_last_updated INTEGER
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create token_scores table")?;

        Ok(())
    }

    /// Get a reference to the database pool
    pub fn get_db_pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn fetch_row(&self, address: &str) -> Result<Option<TokenScoreRecord>> {
        let row: Option<TokenScoreRow> = sqlx::query_as("SELECT * FROM token_scores WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch record by address")?;

        row.map(row_to_record).transpose()
    }

    /// Write every mutable column of a record in one statement.
    async fn write_record(&self, record: &TokenScoreRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_scores (
                address, name, symbol, on_chain_score, social_score, final_score,
                last_updated, social_last_updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                name = excluded.name,
                symbol = excluded.symbol,
                on_chain_score = excluded.on_chain_score,
                social_score = excluded.social_score,
                final_score = excluded.final_score,
                last_updated = excluded.last_updated,
                social_last_updated = excluded.social_last_updated;
            "#,
        )
        .bind(&record.address)
        .bind(&record.name)
        .bind(&record.symbol)
        .bind(record.on_chain_score)
        .bind(record.social_score)
        .bind(record.final_score)
        .bind(record.last_updated.timestamp_millis())
        .bind(record.social_last_updated.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write record for {}", record.address))?;

        Ok(())
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("Invalid timestamp in store: {}", millis))
}

fn row_to_record(row: TokenScoreRow) -> Result<TokenScoreRecord> {
    Ok(TokenScoreRecord {
        address: row.address,
        name: row.name,
        symbol: row.symbol,
        on_chain_score: row.on_chain_score,
        social_score: row.social_score,
        final_score: row.final_score,
        last_updated: millis_to_datetime(row.last_updated)?,
        social_last_updated: row.social_last_updated.map(millis_to_datetime).transpose()?,
        tier: Tier::default(),
    })
}

#[async_trait]
impl ScoreStorage for SqliteScoreStore {
    async fn insert_bootstrap(
        &self,
        listing: &TokenListing,
        on_chain_score: f64,
        at: DateTime<Utc>,
    ) -> Result<TokenScoreRecord> {
        let _guard = self.locks.lock(&listing.address).await;

        let record = match self.fetch_row(&listing.address).await? {
            Some(existing) => with_metadata(existing, &listing.name, &listing.symbol),
            None => bootstrap_record(listing, on_chain_score, at),
        };

        debug!("Inserting bootstrap record for {}", record.address);
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn update_metadata(&self, address: &str, name: &str, symbol: &str) -> Result<Option<TokenScoreRecord>> {
        let _guard = self.locks.lock(address).await;

        let result = sqlx::query("UPDATE token_scores SET name = ?, symbol = ? WHERE address = ?")
            .bind(name)
            .bind(symbol)
            .bind(address)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to update metadata for {}", address))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_row(address).await
    }

    async fn apply_on_chain(
        &self,
        address: &str,
        on_chain_score: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenScoreRecord>> {
        let _guard = self.locks.lock(address).await;

        let Some(existing) = self.fetch_row(address).await? else {
            return Ok(None);
        };
        let updated = with_on_chain(existing, on_chain_score, at);
        self.write_record(&updated).await?;
        Ok(Some(updated))
    }

    async fn apply_social(
        &self,
        address: &str,
        social_score: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenScoreRecord>> {
        let _guard = self.locks.lock(address).await;

        let Some(existing) = self.fetch_row(address).await? else {
            return Ok(None);
        };
        let updated = with_social(existing, social_score, at);
        self.write_record(&updated).await?;
        Ok(Some(updated))
    }

    async fn get_record(&self, address: &str) -> Result<Option<TokenScoreRecord>> {
        self.fetch_row(address).await
    }

    async fn list_records(&self) -> Result<Vec<TokenScoreRecord>> {
        let rows: Vec<TokenScoreRow> = sqlx::query_as("SELECT * FROM token_scores")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch token records")?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn record_count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM token_scores")
            .fetch_one(&self.pool)
            .await
            .context("Failed to get record count")?;

        Ok(count.0)
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
