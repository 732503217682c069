//! Token-bucket rate limiter.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, sleep};

use crate::error::ConfigError;

/// Wait used when the refill rate cannot produce a meaningful wait time.
const FALLBACK_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct BucketState {
    available_tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter.
///
/// The bucket starts full. `acquire` never fails; it only delays the caller
/// until enough tokens have been refilled. State is guarded by a mutex that
/// is never held across an await.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_second: f64,
    burst_capacity: u32,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter whose burst capacity is `ceil(rate_per_second)`.
    pub fn new(rate_per_second: f64) -> Result<Self, ConfigError> {
        let burst = if rate_per_second.is_finite() && rate_per_second > 0.0 {
            (rate_per_second.ceil() as u32).max(1)
        } else {
            1
        };
        Self::with_burst(rate_per_second, burst)
    }

    /// Create a limiter with an explicit burst capacity.
    pub fn with_burst(rate_per_second: f64, burst_capacity: u32) -> Result<Self, ConfigError> {
        if !(rate_per_second.is_finite() && rate_per_second > 0.0) {
            return Err(ConfigError::invalid(format!(
                "rate_per_second must be positive, got {rate_per_second}"
            )));
        }
        if burst_capacity < 1 {
            return Err(ConfigError::invalid("burst_capacity must be at least 1"));
        }

        Ok(Self {
            rate_per_second,
            burst_capacity,
            state: Mutex::new(BucketState {
                available_tokens: f64::from(burst_capacity),
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }

    pub fn burst_capacity(&self) -> u32 {
        self.burst_capacity
    }

    /// Tokens currently in the bucket, after refilling.
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.available_tokens
    }

    /// Wait until `tokens` units are available, then debit them.
    ///
    /// Requests larger than the burst capacity are served in
    /// capacity-sized slices so they still complete at the configured rate.
    pub async fn acquire(&self, tokens: u32) {
        let mut remaining = tokens;
        while remaining > 0 {
            let slice = remaining.min(self.burst_capacity);
            self.acquire_slice(slice).await;
            remaining -= slice;
        }
    }

    /// Debit `tokens` if they are available right now.
    pub fn try_acquire(&self, tokens: u32) -> bool {
        if tokens > self.burst_capacity {
            return false;
        }
        let mut state = self.state.lock();
        self.refill(&mut state);
        let needed = f64::from(tokens);
        if state.available_tokens >= needed {
            state.available_tokens -= needed;
            true
        } else {
            false
        }
    }

    async fn acquire_slice(&self, tokens: u32) {
        let needed = f64::from(tokens);
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.available_tokens >= needed {
                    state.available_tokens -= needed;
                    return;
                }
                self.wait_for(needed - state.available_tokens)
            };
            sleep(wait).await;
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.available_tokens = (state.available_tokens + elapsed * self.rate_per_second)
            .min(f64::from(self.burst_capacity));
        state.last_refill = now;
    }

    fn wait_for(&self, deficit: f64) -> Duration {
        if self.rate_per_second <= 0.0 {
            return FALLBACK_WAIT;
        }
        Duration::from_secs_f64(deficit / self.rate_per_second)
    }
}
