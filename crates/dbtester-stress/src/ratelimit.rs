//! Token bucket gating generator emissions.

use tokio::time::{Duration, Instant};

/// Token bucket with burst equal to the rate. Starts full.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// `None` when `rps` is zero, which means unlimited.
    pub fn new(rps: u64) -> Option<Self> {
        if rps == 0 {
            return None;
        }
        let rate = rps as f64;
        Some(Self {
            rate,
            burst: rate,
            tokens: rate,
            last: Instant::now(),
        })
    }

    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last = now;
    }

    /// Wait for one token.
    pub async fn acquire(&mut self) {
        loop {
            self.refill();
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }
            let missing = 1.0 - self.tokens;
            tokio::time::sleep(Duration::from_secs_f64(missing / self.rate)).await;
        }
    }
}
