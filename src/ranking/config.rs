//! Ranking configuration: tier policy, refresh cadence, collaborator endpoints.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::types::Tier;

/// Per-tier durations, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierIntervals {
    pub high_seconds: u64,
    pub medium_seconds: u64,
    pub low_seconds: u64,
}

impl TierIntervals {
    pub fn for_tier(&self, tier: Tier) -> Duration {
        let seconds = match tier {
            Tier::High => self.high_seconds,
            Tier::Medium => self.medium_seconds,
            Tier::Low => self.low_seconds,
        };
        Duration::from_secs(seconds)
    }

    fn any_zero(&self) -> bool {
        self.high_seconds == 0 || self.medium_seconds == 0 || self.low_seconds == 0
    }
}

/// Rank cut-offs and staleness windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicy {
    /// Positions [0, high_cutoff) are HIGH
    pub high_cutoff: usize,
    /// Positions [high_cutoff, medium_cutoff) are MEDIUM, the rest LOW
    pub medium_cutoff: usize,
    /// On-chain staleness window per tier
    pub on_chain_intervals: TierIntervals,
    /// Social staleness window (and social cycle period) per tier
    pub social_intervals: TierIntervals,
    /// Restrict social refresh to HIGH tier only
    pub social_high_only: bool,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            high_cutoff: 20,
            medium_cutoff: 100,
            on_chain_intervals: TierIntervals {
                high_seconds: 5 * 60,
                medium_seconds: 30 * 60,
                low_seconds: 2 * 60 * 60,
            },
            social_intervals: TierIntervals {
                high_seconds: 5 * 60,
                medium_seconds: 20 * 60,
                low_seconds: 30 * 60,
            },
            social_high_only: false,
        }
    }
}

/// Complete ranking service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    /// Tier cut-offs and staleness windows
    pub tiers: TierPolicy,
    /// Period of the on-chain refresh cycle
    pub on_chain_cycle_seconds: u64,
    /// Ranked snapshot freshness window
    pub snapshot_ttl_seconds: u64,
    /// Delay before the startup catch-up refresh
    pub bootstrap_delay_seconds: u64,
    /// Timeout for one on-chain analysis call
    pub on_chain_timeout_seconds: u64,
    /// Timeout for one social batch call
    pub social_timeout_seconds: u64,
    /// Retry attempts for transient HTTP failures
    pub retry_attempts: usize,
    /// Maximum concurrent on-chain analysis calls
    pub max_parallel_requests: usize,
    /// Collaborator requests per second
    pub rate_limit_requests_per_second: u32,
    /// Error rate window for the adaptive limiter
    pub adaptive_error_rate_window: usize,
    /// Tickers per social search call
    pub social_batch_size: usize,
    /// Single-record read cache capacity
    pub max_cache_entries: u64,
    /// Score store connection string
    pub database_url: String,
    /// On-chain analysis API base URL
    pub on_chain_api_url: String,
    /// On-chain analysis API key
    pub on_chain_api_key: Option<String>,
    /// Social aggregation API base URL
    pub social_api_url: String,
    /// Social aggregation API key
    pub social_api_key: Option<String>,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            tiers: TierPolicy::default(),
            on_chain_cycle_seconds: 60,
            snapshot_ttl_seconds: 120,
            bootstrap_delay_seconds: 5,
            on_chain_timeout_seconds: 10,
            social_timeout_seconds: 30,
            retry_attempts: 3,
            max_parallel_requests: 8,
            rate_limit_requests_per_second: 10,
            adaptive_error_rate_window: 100,
            social_batch_size: 25,
            max_cache_entries: 10_000,
            database_url: "sqlite:./trendrank.db?mode=rwc".to_string(),
            on_chain_api_url: "http://localhost:8080".to_string(),
            on_chain_api_key: None,
            social_api_url: "http://localhost:8081".to_string(),
            social_api_key: None,
        }
    }
}

impl RankerConfig {
    /// Load configuration from the optional JSON file named by `TRENDRANK_CONFIG`,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("TRENDRANK_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read a JSON config file. Missing fields fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("TRENDRANK_DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(url) = std::env::var("TRENDRANK_ONCHAIN_API_URL") {
            self.on_chain_api_url = url;
        }
        if let Ok(key) = std::env::var("TRENDRANK_ONCHAIN_API_KEY") {
            self.on_chain_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("TRENDRANK_SOCIAL_API_URL") {
            self.social_api_url = url;
        }
        if let Ok(key) = std::env::var("TRENDRANK_SOCIAL_API_KEY") {
            self.social_api_key = Some(key);
        }
    }

    /// Check tunables. Used by the builder for every service.
    pub fn validate(&self) -> Result<()> {
        if self.tiers.high_cutoff == 0 || self.tiers.medium_cutoff <= self.tiers.high_cutoff {
            bail!(
                "Invalid tier cut-offs: high={} medium={}",
                self.tiers.high_cutoff,
                self.tiers.medium_cutoff
            );
        }
        if self.tiers.on_chain_intervals.any_zero() || self.tiers.social_intervals.any_zero() {
            bail!("Tier intervals must be non-zero");
        }
        if self.on_chain_cycle_seconds == 0 || self.snapshot_ttl_seconds == 0 {
            bail!("Cycle period and snapshot TTL must be non-zero");
        }
        if self.social_batch_size == 0 || self.max_parallel_requests == 0 {
            bail!("Batch size and parallelism must be non-zero");
        }
        Ok(())
    }

    /// Check that the HTTP collaborators can authenticate. Missing credentials
    /// are fatal at startup.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.on_chain_api_key.as_deref().map_or(true, str::is_empty) {
            bail!("Missing on-chain API key (set TRENDRANK_ONCHAIN_API_KEY)");
        }
        if self.social_api_key.as_deref().map_or(true, str::is_empty) {
            bail!("Missing social API key (set TRENDRANK_SOCIAL_API_KEY)");
        }
        Ok(())
    }

    pub fn on_chain_cycle(&self) -> Duration {
        Duration::from_secs(self.on_chain_cycle_seconds)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_seconds)
    }

    pub fn bootstrap_delay(&self) -> Duration {
        Duration::from_secs(self.bootstrap_delay_seconds)
    }

    pub fn on_chain_timeout(&self) -> Duration {
        Duration::from_secs(self.on_chain_timeout_seconds)
    }

    pub fn social_timeout(&self) -> Duration {
        Duration::from_secs(self.social_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_schedule() {
        let config = RankerConfig::default();

        assert_eq!(config.tiers.high_cutoff, 20);
        assert_eq!(config.tiers.medium_cutoff, 100);
        assert_eq!(config.tiers.on_chain_intervals.for_tier(Tier::High), Duration::from_secs(300));
        assert_eq!(config.tiers.on_chain_intervals.for_tier(Tier::Medium), Duration::from_secs(1800));
        assert_eq!(config.tiers.on_chain_intervals.for_tier(Tier::Low), Duration::from_secs(7200));
        assert_eq!(config.tiers.social_intervals.for_tier(Tier::Medium), Duration::from_secs(1200));
        assert_eq!(config.on_chain_cycle(), Duration::from_secs(60));
        assert_eq!(config.snapshot_ttl(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut config = RankerConfig::default();
        assert!(config.validate_credentials().is_err());

        config.on_chain_api_key = Some("onchain".to_string());
        assert!(config.validate_credentials().is_err());

        config.social_api_key = Some("social".to_string());
        assert!(config.validate_credentials().is_ok());
    }

    #[test]
    fn test_invalid_cutoffs_rejected() {
        let mut config = RankerConfig::default();
        config.tiers.medium_cutoff = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RankerConfig =
            serde_json::from_str(r#"{"on_chain_cycle_seconds": 30, "social_batch_size": 10}"#).unwrap();

        assert_eq!(config.on_chain_cycle_seconds, 30);
        assert_eq!(config.social_batch_size, 10);
        assert_eq!(config.snapshot_ttl_seconds, 120);
        assert_eq!(config.tiers, TierPolicy::default());
    }
}
