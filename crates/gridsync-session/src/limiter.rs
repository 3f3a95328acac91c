//! A token-bucket rate limiter.
//!
//! The bucket holds up to `burst` tokens and refills continuously at `rate`
//! tokens per second. Refill is computed lazily from the time of the last
//! call, so an idle limiter costs nothing.
//!
//! Time comes from [`tokio::time::Instant`], which means tests running
//! with a paused clock can drive the limiter deterministically.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::SessionError;

/// A token bucket shared by reference between the tasks of one session.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    /// May go negative while a `wait` has reserved a token it is sleeping
    /// towards.
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64, burst: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last = now;
    }
}

impl RateLimiter {
    /// Creates a limiter with a full bucket.
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            rate: rate.max(0.0),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }

    /// Takes one token if available.
    pub fn allow(&self) -> bool {
        self.allow_n(1)
    }

    /// Takes `n` tokens if all of them are available; otherwise takes none.
    pub fn allow_n(&self, n: u32) -> bool {
        let n = f64::from(n);
        let mut bucket = self.bucket.lock();
        bucket.refill(self.rate, self.burst);
        if bucket.tokens >= n {
            bucket.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, rounded down.
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.rate, self.burst);
        bucket.tokens.max(0.0) as u32
    }

    /// Waits until a token is available and takes it.
    ///
    /// The token is reserved up front, so concurrent waiters queue behind
    /// each other instead of racing. If `cancel` fires first, or the future
    /// is dropped before it completes, the reservation is returned. This
    /// makes `wait` usable as a `select!` branch that is rebuilt on every
    /// iteration.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let delay = self.reserve();
        let mut reservation = Reservation {
            limiter: self,
            held: true,
        };
        if delay == Some(Duration::ZERO) {
            reservation.held = false;
            return Ok(());
        }

        let sleep = async {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                // A zero-rate bucket never refills.
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            _ = sleep => {
                reservation.held = false;
                Ok(())
            }
        }
    }

    /// Takes a token now, possibly driving the bucket negative, and returns
    /// how long until that token would have existed.
    fn reserve(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.rate, self.burst);
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Some(Duration::ZERO)
        } else if self.rate > 0.0 {
            Some(Duration::from_secs_f64(-bucket.tokens / self.rate))
        } else {
            None
        }
    }

    fn refund(&self) {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.rate, self.burst);
        bucket.tokens = (bucket.tokens + 1.0).min(self.burst);
    }
}

/// Gives a reserved token back unless the wait completed.
struct Reservation<'a> {
    limiter: &'a RateLimiter,
    held: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.held {
            self.limiter.refund();
        }
    }
}
