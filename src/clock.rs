//! Time sources for the rate limiter and the simulated work delay.
//!
//! Both are traits so tests can drive time by hand instead of sleeping.

use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Future returned by a [`Timer`]. Resolves once the delay has elapsed.
pub type Delay = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Monotonic time source used for bucket refill.
///
/// `now` returns nanoseconds since an arbitrary, fixed origin. Values from
/// one clock never decrease.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Produces a completion signal after some duration.
///
/// The returned future must start counting when `delay` is called, not when
/// it is first polled, so callers can start the delay, do their work, and then
/// wait only for whatever time remains.
pub trait Timer: Send + Sync {
    fn delay(&self) -> Delay;
}

/// Clock backed by [`Instant`], anchored at construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, at: Duration) {
        self.nanos.store(at.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Sleeps for a uniformly random duration in `[min, max]`.
#[derive(Debug, Clone)]
pub struct RandomDelay {
    min: Duration,
    max: Duration,
}

impl RandomDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for RandomDelay {
    /// Between half a second and one and a half seconds.
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(1500))
    }
}

impl Timer for RandomDelay {
    fn delay(&self) -> Delay {
        // Deadline is fixed here, before the caller's work starts.
        Box::pin(tokio::time::sleep(self.sample()))
    }
}

/// Timer whose delay is already complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateTimer;

impl Timer for ImmediateTimer {
    fn delay(&self) -> Delay {
        Box::pin(std::future::ready(()))
    }
}
