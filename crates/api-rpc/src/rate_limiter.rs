//! Rate Limiter (Token Bucket Algorithm)
//!
//! Throttles job submission. Lock-free: the whole bucket lives in one
//! atomic word.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Fixed-point scale: tokens are tracked in thousandths so slow refill
/// rates still accumulate between calls
const MILLI: u64 = 1000;

/// Token bucket with a CAS-updated state
pub struct RateLimiter {
    // Upper 32 bits: available milli-tokens
    // Lower 32 bits: last refill (ms since `epoch`)
    bucket: AtomicU64,
    epoch: Instant,
    capacity_milli: u64,
    refill_per_sec: u64,
}

impl RateLimiter {
    /// `burst` tokens available up front, `refill_per_sec` added every second
    ///
    /// Allow 100 submits/sec with burst of 200: `RateLimiter::new(200, 100)`
    pub fn new(burst: u32, refill_per_sec: u32) -> Self {
        // Keep the milli-token count within 32 bits
        let capacity_milli = (burst as u64 * MILLI).min(u32::MAX as u64);
        Self {
            bucket: AtomicU64::new(pack(capacity_milli, 0)),
            epoch: Instant::now(),
            capacity_milli,
            refill_per_sec: refill_per_sec as u64,
        }
    }

    /// Take one token; false when the caller should be throttled
    pub fn try_acquire(&self) -> bool {
        let now_ms = self.elapsed_ms();
        let mut current = self.bucket.load(Ordering::Acquire);

        loop {
            let available = self.refilled(current, now_ms);
            let (next, allowed) = if available >= MILLI {
                (pack(available - MILLI, now_ms), true)
            } else {
                (pack(available, now_ms), false)
            };

            match self.bucket.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return allowed,
                Err(actual) => current = actual,
            }
        }
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u32 {
        let current = self.bucket.load(Ordering::Acquire);
        (self.refilled(current, self.elapsed_ms()) / MILLI) as u32
    }

    fn refilled(&self, packed: u64, now_ms: u32) -> u64 {
        let (milli_tokens, last_ms) = unpack(packed);
        let delta_ms = now_ms.saturating_sub(last_ms) as u64;
        // tokens/sec * ms == milli-tokens
        let added = delta_ms.saturating_mul(self.refill_per_sec);
        milli_tokens.saturating_add(added).min(self.capacity_milli)
    }

    fn elapsed_ms(&self) -> u32 {
        // Wraps after ~49 days; saturating_sub above then stalls refill until the
        // next update rewrites the timestamp
        self.epoch.elapsed().as_millis() as u32
    }
}

fn pack(milli_tokens: u64, last_ms: u32) -> u64 {
    (milli_tokens << 32) | last_ms as u64
}

fn unpack(packed: u64) -> (u64, u32) {
    (packed >> 32, (packed & 0xFFFF_FFFF) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_burst_then_throttle() {
        let limiter = RateLimiter::new(10, 0);

        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::new(2, 20); // one token per 50ms

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        sleep(Duration::from_millis(200)).await;

        assert!(limiter.try_acquire());
        // Never more than the burst
        assert!(limiter.available() <= 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_respects_burst() {
        let limiter = Arc::new(RateLimiter::new(100, 0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { (0..20).filter(|_| limiter.try_acquire()).count() })
            })
            .collect();

        let mut total_allowed = 0;
        for handle in handles {
            total_allowed += handle.await.unwrap();
        }

        assert_eq!(total_allowed, 100);
    }
}
