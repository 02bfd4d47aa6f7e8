//! trendrank - tiered trending ranking and refresh scheduler for tokens
//!
//! Ranks a universe of tokens by a final score blended from on-chain activity
//! and, for the best ranked tokens, social sentiment. Refresh frequency follows
//! rank, and reads are served from a cached ranked snapshot.

pub mod ranking;
pub mod types;

// Re-export main types for convenience
pub use ranking::{RankingService, RankingServiceBuilder, Scheduler, SchedulerHandle};
pub use types::{RankedToken, Tier, TokenListing, TokenScoreRecord};
