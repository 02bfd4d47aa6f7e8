//! Adaptive rate limiting wrapper around governor.
//!
//! Every collaborator call waits on this limiter. The quota shrinks when the
//! recent error rate is high and recovers toward the configured base when
//! calls succeed again.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const FALLBACK_QUOTA: NonZeroU32 = NonZeroU32::MIN;

fn build_limiter(requests_per_second: u32) -> Arc<DefaultDirectRateLimiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(FALLBACK_QUOTA));
    Arc::new(RateLimiter::direct(quota))
}

/// Adaptive rate limiter shared by all refresh paths.
pub struct AdaptiveRateLimiter {
    /// Underlying governor limiter, swapped when the quota changes
    limiter: RwLock<Arc<DefaultDirectRateLimiter>>,
    state: Mutex<AdaptiveState>,
    /// Configured requests per second
    base_quota: u32,
    /// Floor for quota reduction
    min_quota: u32,
    /// Error rate above which the quota is reduced
    error_threshold: f64,
    /// Number of results considered for the error rate
    window_size: usize,
    /// Minimum time between adjustments
    adjustment_interval: Duration,
}

struct AdaptiveState {
    current_quota: u32,
    window: VecDeque<bool>,
    last_adjustment: Instant,
}

/// Current limiter statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitStats {
    pub base_quota: u32,
    pub current_quota: u32,
    pub error_rate: f64,
    pub window_len: usize,
}

impl AdaptiveRateLimiter {
    pub fn new(base_requests_per_second: u32, error_window_size: usize, error_threshold: f64) -> Self {
        let base_quota = base_requests_per_second.max(1);
        Self {
            limiter: RwLock::new(build_limiter(base_quota)),
            state: Mutex::new(AdaptiveState {
                current_quota: base_quota,
                window: VecDeque::with_capacity(error_window_size),
                last_adjustment: Instant::now(),
            }),
            base_quota,
            min_quota: (base_quota / 4).max(1),
            error_threshold,
            window_size: error_window_size.max(1),
            adjustment_interval: Duration::from_secs(30),
        }
    }

    /// Set the minimum time between quota adjustments.
    pub fn with_adjustment_interval(mut self, interval: Duration) -> Self {
        self.adjustment_interval = interval;
        self
    }

    /// Wait until a request is permitted.
    pub async fn acquire(&self) {
        let limiter = self
            .limiter
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        limiter.until_ready().await;
    }

    pub fn record_success(&self) {
        self.record_request_result(true);
    }

    pub fn record_failure(&self) {
        self.record_request_result(false);
    }

    fn record_request_result(&self, success: bool) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.window.push_back(success);
        while state.window.len() > self.window_size {
            state.window.pop_front();
        }

        if state.window.len() < self.window_size / 2 || state.last_adjustment.elapsed() < self.adjustment_interval {
            return;
        }

        let error_rate = error_rate(&state.window);
        let old_quota = state.current_quota;

        if error_rate > self.error_threshold {
            let reduction_factor = 1.0 - (error_rate - self.error_threshold) * 0.5;
            let new_quota = ((state.current_quota as f64) * reduction_factor) as u32;
            state.current_quota = new_quota.max(self.min_quota);
            warn!(
                "High collaborator error rate {:.2}%, reducing quota from {} to {} req/s",
                error_rate * 100.0,
                old_quota,
                state.current_quota
            );
        } else if error_rate < self.error_threshold * 0.5 && state.current_quota < self.base_quota {
            let increased = ((state.current_quota as f64) * 1.25).ceil() as u32;
            state.current_quota = increased.min(self.base_quota);
            debug!(
                "Low collaborator error rate {:.2}%, raising quota from {} to {} req/s",
                error_rate * 100.0,
                old_quota,
                state.current_quota
            );
        }

        if state.current_quota != old_quota {
            state.last_adjustment = Instant::now();
            *self.limiter.write().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                build_limiter(state.current_quota);
        }
    }

    pub fn get_stats(&self) -> RateLimitStats {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        RateLimitStats {
            base_quota: self.base_quota,
            current_quota: state.current_quota,
            error_rate: error_rate(&state.window),
            window_len: state.window.len(),
        }
    }
}

fn error_rate(window: &VecDeque<bool>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let errors = window.iter().filter(|success| !**success).count();
    errors as f64 / window.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_base_quota() {
        let limiter = AdaptiveRateLimiter::new(20, 10, 0.2);
        let stats = limiter.get_stats();

        assert_eq!(stats.current_quota, 20);
        assert_eq!(stats.error_rate, 0.0);
    }

    #[test]
    fn test_quota_reduced_on_errors_and_recovers() {
        let limiter = AdaptiveRateLimiter::new(20, 10, 0.2).with_adjustment_interval(Duration::ZERO);

        for _ in 0..10 {
            limiter.record_failure();
        }
        let reduced = limiter.get_stats().current_quota;
        assert!(reduced < 20);
        assert!(reduced >= 5);

        for _ in 0..50 {
            limiter.record_success();
        }
        assert_eq!(limiter.get_stats().current_quota, 20);
    }

    #[test]
    fn test_zero_quota_falls_back() {
        let limiter = AdaptiveRateLimiter::new(0, 10, 0.2);
        assert_eq!(limiter.get_stats().current_quota, 1);
    }

    #[tokio::test]
    async fn test_acquire_permits_requests() {
        let limiter = AdaptiveRateLimiter::new(100, 10, 0.2);
        for _ in 0..5 {
            limiter.acquire().await;
        }
    }
}
