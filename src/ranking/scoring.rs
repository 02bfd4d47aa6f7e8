//! Score fusion - combines on-chain and social sub-scores into a final score.
//!
//! Sub-metrics come from external collaborators; this module owns only the
//! weighting and the clamp at the fusion boundary. Out-of-range inputs are
//! accepted as given and absorbed by the clamp.

use crate::types::{OnChainSignals, RiskLevel, SocialSignals};

/// On-chain component weights.
pub const ACTIVITY_WEIGHT: f64 = 0.3;
pub const LIQUIDITY_WEIGHT: f64 = 0.2;
pub const DISTRIBUTION_WEIGHT: f64 = 0.1;
pub const MOMENTUM_WEIGHT: f64 = 0.3;
pub const SAFETY_WEIGHT: f64 = 0.1;

/// Social component weights.
pub const TRENDING_WEIGHT: f64 = 0.3;
pub const SENTIMENT_WEIGHT: f64 = 0.25;
pub const MENTION_WEIGHT: f64 = 0.2;
pub const ENGAGEMENT_WEIGHT: f64 = 0.15;
pub const CONFIDENCE_WEIGHT: f64 = 0.1;

/// Final blend weights once a social score exists.
pub const ON_CHAIN_BLEND: f64 = 0.6;
pub const SOCIAL_BLEND: f64 = 0.4;

const SCORE_MIN: f64 = 0.0;
const SCORE_MAX: f64 = 100.0;

/// Clamp to [0, 100]. NaN collapses to 0.
fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        SCORE_MIN
    } else {
        score.clamp(SCORE_MIN, SCORE_MAX)
    }
}

/// Map momentum in [-100, 100] onto a 0-100 contribution.
fn momentum_component(momentum: f64) -> f64 {
    50.0 + momentum / 2.0
}

/// Compute the on-chain sub-score from collaborator signals.
pub fn on_chain_score(signals: &OnChainSignals) -> f64 {
    let weighted = signals.activity * ACTIVITY_WEIGHT
        + signals.liquidity * LIQUIDITY_WEIGHT
        + signals.distribution * DISTRIBUTION_WEIGHT
        + momentum_component(signals.momentum) * MOMENTUM_WEIGHT
        + (100.0 - signals.risk) * SAFETY_WEIGHT;

    clamp_score(weighted)
}

/// Multiplier applied to the social sub-score for a risk label.
pub fn risk_penalty(level: RiskLevel) -> f64 {
    match level {
        RiskLevel::Low => 1.0,
        RiskLevel::Medium => 0.8,
        RiskLevel::High => 0.5,
        RiskLevel::Extreme => 0.2,
        RiskLevel::Unrecognized => 0.8,
    }
}

/// Compute the social sub-score from collaborator signals.
pub fn social_score(signals: &SocialSignals) -> f64 {
    let sentiment = (signals.sentiment_score + 1.0) * 50.0;
    let mentions = (signals.mention_count as f64).min(100.0);
    let engagement = (signals.avg_engagement / 10.0).min(100.0);
    let confidence = signals.confidence * 100.0;

    let weighted = signals.trending_score * TRENDING_WEIGHT
        + sentiment * SENTIMENT_WEIGHT
        + mentions * MENTION_WEIGHT
        + engagement * ENGAGEMENT_WEIGHT
        + confidence * CONFIDENCE_WEIGHT;

    clamp_score((risk_penalty(signals.risk_level) * weighted).round())
}

/// Blend sub-scores into the ranking score.
///
/// Without social data the on-chain score passes through unchanged.
pub fn final_score(on_chain: f64, social: Option<f64>) -> f64 {
    match social {
        None => on_chain,
        Some(social) => (on_chain * ON_CHAIN_BLEND + social * SOCIAL_BLEND).round(),
    }
}

/// Short explanation of a record's score, used in refresh logs.
pub fn describe(on_chain: f64, social: Option<f64>) -> String {
    let final_score = final_score(on_chain, social);
    match social {
        None => format!("Score {:.0}/100: on-chain only ({:.1})", final_score, on_chain),
        Some(social) => format!(
            "Score {:.0}/100: on-chain {:.1} x{:.1} + social {:.0} x{:.1}",
            final_score, on_chain, ON_CHAIN_BLEND, social, SOCIAL_BLEND
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn social(sentiment: f64, risk: RiskLevel) -> SocialSignals {
        SocialSignals {
            sentiment_score: sentiment,
            trending_score: 80.0,
            mention_count: 250,
            avg_engagement: 600.0,
            confidence: 0.9,
            risk_level: risk,
        }
    }

    #[test]
    fn test_bootstrap_on_chain_score() {
        let signals = OnChainSignals {
            activity: 80.0,
            liquidity: 60.0,
            distribution: 50.0,
            momentum: 20.0,
            risk: 30.0,
        };

        let on_chain = on_chain_score(&signals);
        assert!(approx(on_chain, 66.0), "got {}", on_chain);
        assert!(approx(final_score(on_chain, None), on_chain));
    }

    #[test]
    fn test_final_score_with_social() {
        assert_eq!(final_score(66.0, Some(90.0)), 76.0);
    }

    #[test]
    fn test_on_chain_score_clamped() {
        let extreme = OnChainSignals {
            activity: 500.0,
            liquidity: 500.0,
            distribution: 500.0,
            momentum: 500.0,
            risk: -500.0,
        };
        assert_eq!(on_chain_score(&extreme), 100.0);

        let negative = OnChainSignals {
            activity: -500.0,
            liquidity: -500.0,
            distribution: -500.0,
            momentum: -500.0,
            risk: 500.0,
        };
        assert_eq!(on_chain_score(&negative), 0.0);
    }

    #[test]
    fn test_social_score_components() {
        // trending 80*0.3=24, sentiment 100*0.25=25, mentions 100*0.2=20,
        // engagement 60*0.15=9, confidence 90*0.1=9 -> 87
        assert_eq!(social_score(&social(1.0, RiskLevel::Low)), 87.0);
        assert_eq!(social_score(&social(1.0, RiskLevel::Medium)), 70.0);
        assert_eq!(social_score(&social(1.0, RiskLevel::High)), 44.0);
        assert_eq!(social_score(&social(1.0, RiskLevel::Extreme)), 17.0);
    }

    #[test]
    fn test_unrecognized_risk_uses_default_penalty() {
        assert_eq!(
            social_score(&social(1.0, RiskLevel::Unrecognized)),
            social_score(&social(1.0, RiskLevel::Medium))
        );
    }

    #[test]
    fn test_social_score_clamped() {
        let signals = SocialSignals {
            sentiment_score: 10.0,
            trending_score: 1000.0,
            mention_count: 10,
            avg_engagement: 10.0,
            confidence: 5.0,
            risk_level: RiskLevel::Low,
        };
        assert_eq!(social_score(&signals), 100.0);
    }

    #[test]
    fn test_describe_mentions_score() {
        assert!(describe(66.0, None).contains("66"));
        assert!(describe(66.0, Some(90.0)).contains("76"));
    }
}
