//! Token-bucket rate limiter for external clients.
//!
//! Every enrichment/moderation client carries one of these with a
//! service-specific rate. `acquire` suspends until a token is available, so a
//! caller that is cancelled (per-event timeout, shutdown) simply drops the
//! future mid-wait.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Async token bucket: `rate` tokens per second, up to `burst` banked.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<State>,
}

struct State {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst).max(1.0);
        Self {
            rate,
            burst,
            state: Mutex::new(State {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;
    }

    /// Take one token, waiting for the bucket to refill if necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Take one token without waiting. Returns false when the bucket is dry.
    pub fn try_acquire(&self) -> bool {
        let Ok(mut state) = self.state.try_lock() else {
            return false;
        };
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_immediately_available() {
        tokio::time::pause();
        let bucket = TokenBucket::new(10.0, 5);
        let start = Instant::now();
        for _ in 0..5 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn waits_once_burst_is_spent() {
        tokio::time::pause();
        let bucket = TokenBucket::new(10.0, 1);
        bucket.acquire().await;

        let start = Instant::now();
        bucket.acquire().await;
        // One token at 10/s takes ~100ms to refill.
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn try_acquire_reports_empty_bucket() {
        let bucket = TokenBucket::new(0.001, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }
}
