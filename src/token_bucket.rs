use std::time::Duration;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Per-client token bucket. Timestamps are nanoseconds from a [`crate::clock::Clock`].
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: u64,
}

impl TokenBucket {
    /// A full bucket whose refill starts counting at `now`.
    pub fn new(capacity: f64, refill_rate: f64, now: u64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
        }
    }

    /// Refills for the time elapsed up to `now`, then takes one token if a
    /// whole one is available. A rejection leaves the token count as refilled.
    pub fn try_consume(&mut self, now: u64) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&mut self, now: u64) -> u64 {
        self.refill(now);
        self.tokens.floor() as u64
    }

    #[cfg(test)]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    #[cfg(test)]
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    #[cfg(test)]
    pub fn last_refill(&self) -> u64 {
        self.last_refill
    }

    /// Time from the last refill until one whole token is available.
    /// `Duration::ZERO` when a token is already there.
    pub fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }

        let tokens_needed = 1.0 - self.tokens;
        Duration::try_from_secs_f64(tokens_needed / self.refill_rate).unwrap_or(Duration::MAX)
    }

    fn refill(&mut self, now: u64) {
        // A caller that sampled the clock before a racing caller took the lock
        // sees no elapsed time and must not move last_refill backwards.
        let elapsed = now.saturating_sub(self.last_refill);
        if elapsed > 0 {
            let tokens_to_add = self.refill_rate * (elapsed as f64 / NANOS_PER_SEC);
            self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
            self.last_refill = now;
        }
    }
}
