use std::time::Instant;

/// TokenBucket refills at `rate` tokens per second up to `burst` tokens. Consumption is
/// all-or-nothing: a request either takes all of its tokens or none of them.
#[derive(Debug, Clone)]
pub(crate) struct TokenBucket {
    rate: u64,
    burst: u64,
    available: u64,
    last_refill: Instant,
}

impl TokenBucket {
    pub(crate) fn new_at(rate: u64, burst: u64, now: Instant) -> Self {
        TokenBucket {
            rate,
            burst,
            available: burst,
            last_refill: now,
        }
    }

    /// Reconfigures the bucket and refills it to the new burst.
    pub(crate) fn reset_at(&mut self, rate: u64, burst: u64, now: Instant) {
        self.rate = rate;
        self.burst = burst;
        self.available = burst;
        self.last_refill = now;
    }

    pub(crate) fn consume_at(&mut self, tokens: u64, now: Instant) -> bool {
        self.refill(now);
        if tokens > self.available {
            return false;
        }
        self.available -= tokens;
        true
    }

    fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }

        let elapsed_ms = now.duration_since(self.last_refill).as_millis() as u64;
        if elapsed_ms == 0 {
            return;
        }
        let added = self.rate.saturating_mul(elapsed_ms) / 1000;
        if added == 0 {
            // Keep the partial interval so slow rates still make progress.
            return;
        }
        self.available = self.available.saturating_add(added).min(self.burst);
        self.last_refill = now;
    }
}

#[cfg(test)]
impl TokenBucket {
    fn available_at(&mut self, now: Instant) -> u64 {
        self.refill(now);
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn consume_succeeds_iff_enough_tokens() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(100, 100, start);

        assert!(bucket.consume_at(60, start));
        assert_eq!(bucket.available_at(start), 40);
        assert!(!bucket.consume_at(41, start));
        assert_eq!(bucket.available_at(start), 40);
        assert!(bucket.consume_at(40, start));
        assert!(!bucket.consume_at(1, start));
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(100, 50, start);
        assert!(bucket.consume_at(50, start));

        assert_eq!(bucket.available_at(start + Duration::from_millis(200)), 20);
        assert_eq!(bucket.available_at(start + Duration::from_secs(10)), 50);
    }

    #[test]
    fn slow_rate_accumulates_partial_intervals() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(1, 1, start);
        assert!(bucket.consume_at(1, start));

        assert_eq!(bucket.available_at(start + Duration::from_millis(500)), 0);
        assert_eq!(bucket.available_at(start + Duration::from_millis(1000)), 1);
    }

    #[test]
    fn reset_refills() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 10, start);
        assert!(bucket.consume_at(10, start));

        bucket.reset_at(20, 30, start);
        assert_eq!(bucket.available_at(start), 30);
        assert!(bucket.consume_at(30, start));
        assert_eq!(bucket.available_at(start + Duration::from_millis(500)), 10);
    }
}
