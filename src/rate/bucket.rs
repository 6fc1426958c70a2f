use std::time::Duration;

use tokio::time::Instant;

use crate::config::OperationLimit;

/// Replenishing pool of call permits.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket sized from `max_calls` per `time_window_secs`.
    pub fn new(limit: &OperationLimit, now: Instant) -> Self {
        let capacity = f64::from(limit.max_calls.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_rate: limit.refill_rate().max(f64::MIN_POSITIVE),
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Take `n` tokens, or report how long until enough have accumulated.
    pub fn try_take(&mut self, n: u32, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        let wanted = f64::from(n);
        if self.tokens >= wanted {
            self.tokens -= wanted;
            return Ok(());
        }
        let missing = wanted - self.tokens;
        Err(Duration::from_secs_f64(missing / self.refill_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_full_and_drains() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&OperationLimit::new(3, 3.0), now);
        assert!(bucket.try_take(1, now).is_ok());
        assert!(bucket.try_take(2, now).is_ok());

        let wait = bucket.try_take(1, now).unwrap_err();
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_refill_is_proportional_and_capped() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(&OperationLimit::new(4, 2.0), start);
        bucket.try_take(4, start).unwrap();

        let half = start + Duration::from_millis(500);
        assert!((bucket.available(half) - 1.0).abs() < 1e-6);

        let later = start + Duration::from_secs(60);
        assert_eq!(bucket.available(later), bucket.capacity());
    }
}
