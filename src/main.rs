//! Main entry point for the trendrank ranking service
//!
//! Loads configuration, opens the score store, bootstraps the token universe
//! and runs the refresh scheduler until Ctrl-C.

use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn, Level};

use trendrank::ranking::{RankerConfig, RankingService, RankingServiceBuilder, Scheduler};
use trendrank::types::TokenListing;

/// How often the current leaders are logged.
const LEADERBOARD_INTERVAL: Duration = Duration::from_secs(60);

fn log_level() -> Level {
    std::env::var("TRENDRANK_LOG")
        .ok()
        .and_then(|raw| Level::from_str(&raw).ok())
        .unwrap_or(Level::INFO)
}

/// Read the token universe from the JSON file named by `TRENDRANK_UNIVERSE`.
fn load_universe() -> Result<Vec<TokenListing>> {
    let Ok(path) = std::env::var("TRENDRANK_UNIVERSE") else {
        warn!("TRENDRANK_UNIVERSE not set, ranking only tokens already in the store");
        return Ok(Vec::new());
    };

    let raw = std::fs::read_to_string(Path::new(&path))
        .with_context(|| format!("Failed to read token universe {}", path))?;
    let listings: Vec<TokenListing> =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse token universe {}", path))?;

    info!("Loaded {} tokens from {}", listings.len(), path);
    Ok(listings)
}

async fn log_leaderboard(service: &RankingService) {
    let top = service.get_top_tokens(10).await;
    if top.is_empty() {
        info!("No ranked tokens yet");
        return;
    }
    info!("Top {} tokens:", top.len());
    for entry in top {
        info!(
            "  #{} {} ({}) score={} tier={}",
            entry.rank, entry.record.symbol, entry.record.address, entry.record.final_score, entry.record.tier
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_max_level(log_level()).init();

    info!("Starting trendrank");

    let config = RankerConfig::load()?;
    config.validate()?;
    config
        .validate_credentials()
        .context("Collaborator credentials are required")?;

    let service = RankingServiceBuilder::new().with_config(config).build().await?;
    if !service.health_check().await {
        error!("Score store failed its health check");
    }

    let universe = load_universe()?;
    if !universe.is_empty() {
        service.bootstrap_tokens(&universe).await;
    }
    match service.record_count().await {
        Ok(count) => info!("Tracking {} tokens", count),
        Err(e) => warn!("Could not count tracked tokens: {:#}", e),
    }

    let scheduler = Scheduler::start(service.clone());

    let mut leaderboard = interval(LEADERBOARD_INTERVAL);
    leaderboard.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = leaderboard.tick() => log_leaderboard(&service).await,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutdown requested");
    scheduler.shutdown().await;

    info!("Final metrics:");
    service.metrics().log_summary().await;

    Ok(())
}
