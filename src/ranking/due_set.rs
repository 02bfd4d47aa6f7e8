//! Due-set selection: which records are stale enough to refresh this cycle.
//!
//! Both selectors take the records of the current ranked snapshot, whose `tier`
//! fields were stamped from rank at build time. Eligibility is therefore
//! re-derived from rank every cycle; nothing about a previous cycle's tier is
//! remembered.

use chrono::{DateTime, Utc};

use crate::ranking::clock::elapsed_between;
use crate::ranking::config::TierPolicy;
use crate::types::{Tier, TokenScoreRecord};

/// Whether a record's on-chain data is due: `now - last_updated >= interval(tier)`.
pub fn is_on_chain_due(record: &TokenScoreRecord, policy: &TierPolicy, now: DateTime<Utc>) -> bool {
    elapsed_between(record.last_updated, now) >= policy.on_chain_interval(record.tier)
}

/// Whether a record's social data is due. Never-refreshed records are always due.
pub fn is_social_due(record: &TokenScoreRecord, policy: &TierPolicy, now: DateTime<Utc>) -> bool {
    match record.social_last_updated {
        None => true,
        Some(at) => elapsed_between(at, now) >= policy.social_interval(record.tier),
    }
}

/// Records across all tiers whose on-chain data is stale.
pub fn select_on_chain_due(
    ranked: &[TokenScoreRecord],
    policy: &TierPolicy,
    now: DateTime<Utc>,
) -> Vec<TokenScoreRecord> {
    ranked
        .iter()
        .filter(|record| is_on_chain_due(record, policy, now))
        .cloned()
        .collect()
}

/// Records currently in `tier` whose social data is stale.
pub fn select_social_due(
    ranked: &[TokenScoreRecord],
    tier: Tier,
    policy: &TierPolicy,
    now: DateTime<Utc>,
) -> Vec<TokenScoreRecord> {
    if !policy.social_eligible(tier) {
        return Vec::new();
    }

    ranked
        .iter()
        .filter(|record| record.tier == tier)
        .filter(|record| is_social_due(record, policy, now))
        .cloned()
        .collect()
}
