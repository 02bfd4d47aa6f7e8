//! Core types and data structures for the trendrank ranking system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A token address (kept as a plain string, the ranking core never decodes it)
pub type Address = String;

/// Update-frequency bucket derived from a token's rank position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    High,
    Medium,
    #[default]
    Low,
}

impl Tier {
    /// Returns the string representation of the tier for logs and task names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
        }
    }

    /// All tiers, most frequently refreshed first.
    pub fn all() -> [Tier; 3] {
        [Tier::High, Tier::Medium, Tier::Low]
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked token and its current scores.
///
/// `final_score` is derived from `on_chain_score` and `social_score`; only the
/// score store writes it, always together with the sub-score it depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenScoreRecord {
    /// Stable token address, the record key
    pub address: Address,
    /// Display name (not used for ranking)
    pub name: String,
    /// Ticker symbol, also the social search key
    pub symbol: String,
    /// On-chain sub-score (0-100)
    pub on_chain_score: f64,
    /// Social sub-score (0-100), absent until the first social refresh
    pub social_score: Option<f64>,
    /// Blended ranking score
    pub final_score: f64,
    /// Last on-chain refresh
    pub last_updated: DateTime<Utc>,
    /// Last social refresh
    pub social_last_updated: Option<DateTime<Utc>>,
    /// Tier derived from the latest ranked snapshot, never persisted
    #[serde(default)]
    pub tier: Tier,
}

/// A token entry of the tracked universe, as supplied by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenListing {
    pub address: Address,
    pub name: String,
    pub symbol: String,
}

/// Raw on-chain signals produced by the on-chain analysis collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnChainSignals {
    /// Trading activity (0-100)
    pub activity: f64,
    /// Liquidity depth (0-100)
    pub liquidity: f64,
    /// Holder distribution quality (0-100)
    pub distribution: f64,
    /// Price/volume momentum (-100..100)
    pub momentum: f64,
    /// Risk assessment (0-100, higher is riskier)
    pub risk: f64,
}

/// Qualitative risk label attached to social signals.
///
/// Labels outside the known set deserialize to `Unrecognized` instead of
/// failing, so one odd upstream value cannot drop a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
    Unrecognized,
}

impl RiskLevel {
    /// Parse an upstream label, case-insensitively.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            "extreme" => RiskLevel::Extreme,
            _ => RiskLevel::Unrecognized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Extreme => "extreme",
            RiskLevel::Unrecognized => "unrecognized",
        }
    }
}

impl From<String> for RiskLevel {
    fn from(label: String) -> Self {
        RiskLevel::from_label(&label)
    }
}

impl From<RiskLevel> for String {
    fn from(level: RiskLevel) -> Self {
        level.as_str().to_string()
    }
}

/// Social signals for one ticker, produced by the social aggregation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSignals {
    /// Sentiment normalized to [-1, 1]
    pub sentiment_score: f64,
    /// Trending strength (0-100)
    pub trending_score: f64,
    /// Number of mentions found
    pub mention_count: u64,
    /// Average engagement per mention
    pub avg_engagement: f64,
    /// Analysis confidence [0, 1]
    pub confidence: f64,
    /// Qualitative risk label
    pub risk_level: RiskLevel,
}

/// A record together with its 1-based position in the current ranked order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedToken {
    pub rank: usize,
    #[serde(flatten)]
    pub record: TokenScoreRecord,
}
