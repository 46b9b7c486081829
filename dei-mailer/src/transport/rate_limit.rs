//! Outbound send rate limiting
//!
//! The limiter is injected into the transport through [`RateLimit`]. The
//! built-in [`SlidingWindowLimiter`] is process-local; running several
//! instances against one provider account needs a shared implementation.

use async_trait::async_trait;
use dei_common::config::RateLimitConfig;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Take a slot if one is free.
    ///
    /// Returns `Err(wait)` with the time until the next slot frees up.
    async fn try_acquire(&self) -> Result<(), Duration>;
}

/// At most `max_requests` acquisitions in any trailing `window`
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    granted: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window,
            granted: Mutex::new(VecDeque::with_capacity(max_requests as usize)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }
}

#[async_trait]
impl RateLimit for SlidingWindowLimiter {
    async fn try_acquire(&self) -> Result<(), Duration> {
        let mut granted = self.granted.lock().await;
        let now = Instant::now();

        while let Some(oldest) = granted.front() {
            if *oldest + self.window <= now {
                granted.pop_front();
            } else {
                break;
            }
        }

        if granted.len() < self.max_requests {
            granted.push_back(now);
            return Ok(());
        }

        // Full window: the oldest grant is the next to expire
        let oldest = granted.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_grants_up_to_limit() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(limiter.try_acquire().await.is_ok());
        }
        let wait = limiter.try_acquire().await.unwrap_err();
        assert_eq!(wait, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_shrinks_as_window_slides() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        limiter.try_acquire().await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        let wait = limiter.try_acquire().await.unwrap_err();
        assert_eq!(wait, Duration::from_secs(15));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(limiter.try_acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_grants_free_slots_individually() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        limiter.try_acquire().await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        limiter.try_acquire().await.unwrap();

        // First grant expires at t=10, second at t=15
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.try_acquire().await.is_ok());
        let wait = limiter.try_acquire().await.unwrap_err();
        assert_eq!(wait, Duration::from_secs(5));
    }

    #[test]
    fn test_from_config_defaults() {
        let limiter = SlidingWindowLimiter::from_config(&RateLimitConfig::default());
        assert_eq!(limiter.max_requests, 100);
        assert_eq!(limiter.window, Duration::from_secs(60));
    }
}
