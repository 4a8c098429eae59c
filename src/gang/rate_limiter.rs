//! Token-bucket rate limiting (spec.md §4.5, §5).
//!
//! Hand-rolled rather than pulled from a crate, matching
//! `failure_detector/phi_accrual.rs`'s own hand-rolled accrual math — this
//! crate's ambient stack leans on external crates for I/O, serialization and
//! error plumbing, not for a dozen-line numeric primitive.

use std::time::Instant;

/// A classic token bucket: `capacity` tokens refill at `fill_rate` tokens per
/// second. Spec.md §5: "Token buckets are sampled once at the start of a
/// round for their available token count; consumption updates them in-round;
/// tokens accumulated during the round become available for the next
/// round" — so refilling only happens in [`TokenBucket::sample`], never in
/// [`TokenBucket::try_consume`].
pub struct TokenBucket {
    capacity: f64,
    fill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, fill_rate: f64) -> Self {
        Self {
            capacity,
            fill_rate,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Samples and returns the number of tokens available at the start of a
    /// round, refilling first based on elapsed wall-clock time.
    pub fn sample(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.fill_rate).min(self.capacity);
        self.last_refill = now;
        self.tokens
    }

    /// Consumes `n` tokens from the balance sampled at the start of the
    /// round. Does not refill. Returns `false` (no consumption) if the
    /// balance is insufficient.
    pub fn try_consume(&mut self, n: f64) -> bool {
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumption_does_not_refill_mid_round() {
        let mut bucket = TokenBucket::new(10.0, 1.0);
        assert_eq!(bucket.sample(), 10.0);
        assert!(bucket.try_consume(7.0));
        assert!(!bucket.try_consume(7.0));
        assert!(bucket.try_consume(3.0));
    }

    #[test]
    fn exhausted_bucket_rejects_consumption() {
        let mut bucket = TokenBucket::new(1.0, 0.0);
        bucket.sample();
        assert!(bucket.try_consume(1.0));
        assert!(!bucket.try_consume(0.001));
    }
}
