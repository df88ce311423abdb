//! Token bucket rate limiting.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimiterConfig;
use crate::error::{ResilienceError, ResilienceResult};

struct Bucket {
    config: RateLimiterConfig,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_per_second).min(self.config.burst);
        self.last_refill = now;
    }

    fn wait_for_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.config.refill_per_second)
        }
    }
}

/// Token bucket, starting full.
pub struct RateLimiter {
    name: String,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let tokens = config.burst;
        Self {
            name: name.into(),
            bucket: Mutex::new(Bucket {
                config,
                tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        bucket.refill();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long until a token is available.
    pub fn time_until_available(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        bucket.refill();
        bucket.wait_for_token()
    }

    /// Wait for a token.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                bucket.refill();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                bucket.wait_for_token()
            };
            debug!(limiter = %self.name, wait_ms = wait.as_millis() as u64, "Waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Wait for a token for at most `max_wait`. Fails immediately, without
    /// waiting, when the next token is further away than that.
    pub async fn acquire_within(&self, max_wait: Duration) -> ResilienceResult<()> {
        let wait = self.time_until_available();
        if wait > max_wait {
            return Err(ResilienceError::RateLimited {
                name: self.name.clone(),
                retry_after_ms: wait.as_millis() as u64,
            });
        }

        match tokio::time::timeout(max_wait, self.acquire()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(ResilienceError::RateLimited {
                name: self.name.clone(),
                retry_after_ms: self.time_until_available().as_millis() as u64,
            }),
        }
    }

    /// Apply a new rate. Current tokens are clamped to the new burst.
    pub fn update_config(&self, config: RateLimiterConfig) {
        let mut bucket = self.bucket.lock();
        bucket.refill();
        bucket.tokens = bucket.tokens.min(config.burst);
        bucket.config = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(refill_per_second: f64, burst: f64) -> RateLimiter {
        RateLimiter::new(
            "api",
            RateLimiterConfig {
                refill_per_second,
                burst,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = limiter(2.0, 3.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        assert_eq!(limiter.time_until_available(), Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = limiter(10.0, 1.0);
        limiter.acquire().await;

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_rejects_long_wait() {
        let limiter = limiter(1.0, 1.0);
        assert!(limiter.try_acquire());

        let result = limiter.acquire_within(Duration::from_millis(100)).await;
        match result {
            Err(ResilienceError::RateLimited { retry_after_ms, .. }) => {
                assert_eq!(retry_after_ms, 1000)
            }
            other => panic!("expected rate limited, got {:?}", other),
        }

        limiter
            .acquire_within(Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_burst_clamps_tokens() {
        let limiter = limiter(1.0, 10.0);
        limiter.update_config(RateLimiterConfig {
            refill_per_second: 1.0,
            burst: 2.0,
        });
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
