//! Tier classifier: rank position to update-frequency tier.
//!
//! Tiers are rank-based rather than score-based so the number of tokens on the
//! expensive refresh paths stays bounded however scores are distributed.

use crate::ranking::config::TierPolicy;
use crate::types::Tier;
use std::time::Duration;

impl TierPolicy {
    /// Classify a zero-based rank position.
    pub fn classify(&self, position: usize) -> Tier {
        if position < self.high_cutoff {
            Tier::High
        } else if position < self.medium_cutoff {
            Tier::Medium
        } else {
            Tier::Low
        }
    }

    /// On-chain staleness window for a tier.
    pub fn on_chain_interval(&self, tier: Tier) -> Duration {
        self.on_chain_intervals.for_tier(tier)
    }

    /// Social staleness window for a tier.
    pub fn social_interval(&self, tier: Tier) -> Duration {
        self.social_intervals.for_tier(tier)
    }

    /// Whether a tier takes part in social refresh at all.
    pub fn social_eligible(&self, tier: Tier) -> bool {
        !self.social_high_only || tier == Tier::High
    }
}

/// Classify a zero-based rank position with the default cut-offs (20 / 100).
pub fn classify_position(position: usize) -> Tier {
    TierPolicy::default().classify(position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(classify_position(0), Tier::High);
        assert_eq!(classify_position(19), Tier::High);
        assert_eq!(classify_position(20), Tier::Medium);
        assert_eq!(classify_position(99), Tier::Medium);
        assert_eq!(classify_position(100), Tier::Low);
        assert_eq!(classify_position(usize::MAX), Tier::Low);
    }

    #[test]
    fn test_custom_cutoffs() {
        let policy = TierPolicy {
            high_cutoff: 2,
            medium_cutoff: 5,
            ..TierPolicy::default()
        };

        assert_eq!(policy.classify(1), Tier::High);
        assert_eq!(policy.classify(2), Tier::Medium);
        assert_eq!(policy.classify(5), Tier::Low);
    }

    #[test]
    fn test_social_eligibility() {
        let mut policy = TierPolicy::default();
        assert!(policy.social_eligible(Tier::Low));

        policy.social_high_only = true;
        assert!(policy.social_eligible(Tier::High));
        assert!(!policy.social_eligible(Tier::Medium));
        assert!(!policy.social_eligible(Tier::Low));
    }
}
