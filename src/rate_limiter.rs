use crate::clock::{Clock, MonotonicClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::token_bucket::TokenBucket;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Whole tokens left after this check.
    pub remaining: u64,
    /// Wait until the next token; zero when one is already available.
    pub retry_after: Duration,
}

/// Per-client token bucket limiter.
///
/// Buckets are created on first use and never evicted. Lookups take a shard
/// read lock only long enough to clone the bucket handle; the refill and
/// consume step runs under that bucket's own mutex, so clients never contend
/// with each other once their buckets exist.
#[derive(Clone)]
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    buckets: Arc<DashMap<String, Arc<Mutex<TokenBucket>>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        Ok(RateLimiter {
            capacity: config.bucket_capacity(),
            refill_rate: config.requests_per_second,
            buckets: Arc::new(DashMap::new()),
            clock,
        })
    }

    /// Admit or reject one request from `identity` at `now`.
    pub fn admit(&self, identity: &str, now: u64) -> Result<bool> {
        Ok(self.decide(identity, now)?.allowed)
    }

    /// Like [`RateLimiter::admit`] but reports the bucket state after the check.
    pub fn decide(&self, identity: &str, now: u64) -> Result<Decision> {
        if identity.is_empty() {
            return Err(Error::InvalidIdentity);
        }

        let bucket = self.bucket(identity, now);
        let mut bucket = bucket.lock();
        let allowed = bucket.try_consume(now);

        Ok(Decision {
            allowed,
            remaining: bucket.tokens().floor() as u64,
            retry_after: bucket.time_until_available(),
        })
    }

    /// Check `identity` against the limiter's own clock.
    pub fn check(&self, identity: &str) -> Result<Decision> {
        self.decide(identity, self.clock.now())
    }

    /// Whole tokens currently available to `identity`, without consuming any.
    pub fn remaining(&self, identity: &str) -> u64 {
        let now = self.clock.now();
        match self.buckets.get(identity).map(|entry| Arc::clone(entry.value())) {
            Some(bucket) => bucket.lock().available_tokens(now),
            None => self.capacity.floor() as u64,
        }
    }

    /// Number of clients seen so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn bucket(&self, identity: &str, now: u64) -> Arc<Mutex<TokenBucket>> {
        if let Some(entry) = self.buckets.get(identity) {
            return Arc::clone(entry.value());
        }

        // Entry holds the shard write lock, so racing first requests from the
        // same client end up sharing one bucket.
        let entry = self.buckets.entry(identity.to_string()).or_insert_with(|| {
            tracing::debug!(client = %identity, "Creating rate limit bucket");
            Arc::new(Mutex::new(TokenBucket::new(
                self.capacity,
                self.refill_rate,
                now,
            )))
        });
        Arc::clone(entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    const SECOND: u64 = 1_000_000_000;

    fn limiter(rate: f64) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let config = Config {
            requests_per_second: rate,
            ..Config::default()
        };
        let limiter = RateLimiter::with_clock(&config, Arc::new(clock.clone())).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_admits_capacity_then_rejects() {
        let (limiter, _) = limiter(5.0);
        for _ in 0..5 {
            assert!(limiter.admit("10.0.0.1", 0).unwrap());
        }
        assert!(!limiter.admit("10.0.0.1", 0).unwrap());
    }

    #[test]
    fn test_refill_after_one_interval() {
        let (limiter, _) = limiter(4.0);
        for _ in 0..4 {
            assert!(limiter.admit("10.0.0.1", 0).unwrap());
        }
        assert!(!limiter.admit("10.0.0.1", SECOND / 8).unwrap());
        assert!(limiter.admit("10.0.0.1", SECOND / 4).unwrap());
        assert!(!limiter.admit("10.0.0.1", SECOND / 4).unwrap());
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _) = limiter(1.0);
        assert!(limiter.admit("10.0.0.1", 0).unwrap());
        assert!(!limiter.admit("10.0.0.1", 0).unwrap());
        assert!(limiter.admit("10.0.0.2", 0).unwrap());
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_empty_identity_is_rejected() {
        let (limiter, _) = limiter(1.0);
        assert!(matches!(limiter.admit("", 0), Err(Error::InvalidIdentity)));
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_decision_reports_state() {
        let (limiter, clock) = limiter(2.0);
        let first = limiter.check("10.0.0.1").unwrap();
        assert_eq!(
            first,
            Decision {
                allowed: true,
                remaining: 1,
                retry_after: Duration::ZERO,
            }
        );

        assert!(limiter.check("10.0.0.1").unwrap().allowed);
        let rejected = limiter.check("10.0.0.1").unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.retry_after, Duration::from_millis(500));

        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.remaining("10.0.0.1"), 2);
        assert_eq!(limiter.remaining("192.168.0.9"), 2);
    }

    #[test]
    fn test_fractional_rate_still_admits_one() {
        let (limiter, _) = limiter(0.5);
        assert_eq!(limiter.capacity(), 1.0);
        assert!(limiter.admit("10.0.0.1", 0).unwrap());
        assert!(!limiter.admit("10.0.0.1", SECOND).unwrap());
        assert!(limiter.admit("10.0.0.1", 2 * SECOND).unwrap());
    }

    #[test]
    fn test_tiny_rate_rejects_without_panicking() {
        let (limiter, _) = limiter(1e-20);
        assert!(limiter.admit("10.0.0.1", 0).unwrap());

        let rejected = limiter.decide("10.0.0.1", SECOND).unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after, Duration::MAX);
    }

    #[test]
    fn test_concurrent_admission_is_exact() {
        const THREADS: usize = 64;
        let (limiter, _) = limiter(10.0);
        let barrier = Arc::new(Barrier::new(THREADS));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = Arc::clone(&barrier);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    barrier.wait();
                    if limiter.admit("127.0.0.1", 0).unwrap() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 10);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_concurrent_first_access_creates_one_bucket_per_client() {
        const THREADS: usize = 32;
        let (limiter, _) = limiter(3.0);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let limiter = limiter.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let identity = format!("10.0.0.{}", i % 4);
                    limiter.admit(&identity, 0).unwrap()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(limiter.bucket_count(), 4);
        assert_eq!(admitted, 4 * 3);
    }
}
