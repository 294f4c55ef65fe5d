//! Token bucket whose rate can be changed while in use

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// `wait` was interrupted by its cancellation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter wait cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Copy)]
struct RateParams {
    interval: Duration,
    burst: u32,
}

#[derive(Debug)]
struct Bucket {
    interval: Duration,
    burst: u32,
    /// Negative while callers hold reservations for future tokens
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn new(params: RateParams, now: Instant) -> Self {
        let burst = params.burst.max(1);
        Self {
            interval: params.interval,
            burst,
            tokens: f64::from(burst),
            last: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let cap = f64::from(self.burst);
        if self.interval.is_zero() {
            self.tokens = cap;
        } else {
            let earned = now.duration_since(self.last).as_secs_f64() / self.interval.as_secs_f64();
            self.tokens = (self.tokens + earned).min(cap);
        }
        self.last = now;
    }

    /// Take one token, returning how long the caller has to wait for it
    fn reserve(&mut self, now: Instant) -> Duration {
        self.refill(now);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            self.interval.mul_f64(-self.tokens)
        }
    }

    /// Give back a reservation that was never used
    fn release(&mut self) {
        self.tokens = (self.tokens + 1.0).min(f64::from(self.burst));
    }

    fn apply(&mut self, params: RateParams, now: Instant) {
        // Settle what was earned under the old rate first
        self.refill(now);
        self.interval = params.interval;
        self.burst = params.burst.max(1);
        self.tokens = self.tokens.min(f64::from(self.burst));
    }
}

/// Rate limiter for outbound accrual requests
///
/// Admission state lives in one mutex-guarded bucket. Rate changes go through
/// an unbounded channel to an applier task, so [`update`](Self::update)
/// never blocks and never races a concurrent [`wait`](Self::wait). Callers
/// already waiting keep the slot they reserved.
///
/// Must be created inside a tokio runtime. The applier task exits when the
/// limiter is dropped.
#[derive(Debug)]
pub struct DynamicRateLimiter {
    bucket: Arc<Mutex<Bucket>>,
    updates: mpsc::UnboundedSender<RateParams>,
}

impl DynamicRateLimiter {
    pub fn new(interval: Duration, burst: u32) -> Self {
        let bucket = Arc::new(Mutex::new(Bucket::new(
            RateParams { interval, burst },
            Instant::now(),
        )));
        let (updates, mut rx) = mpsc::unbounded_channel::<RateParams>();

        let applier_bucket = bucket.clone();
        tokio::spawn(async move {
            while let Some(params) = rx.recv().await {
                lock(&applier_bucket).apply(params, Instant::now());
                tracing::debug!(
                    interval_ms = params.interval.as_millis() as u64,
                    burst = params.burst,
                    "Rate limiter updated"
                );
            }
        });

        Self { bucket, updates }
    }

    /// Wait for a token.
    ///
    /// Returns [`Cancelled`] right away when `cancel` already fired, and as
    /// soon as it fires while waiting.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let delay = lock(&self.bucket).reserve(Instant::now());
        if delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                lock(&self.bucket).release();
                Err(Cancelled)
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Change the admission rate for future reservations
    pub fn update(&self, interval: Duration, burst: u32) {
        if self.updates.send(RateParams { interval, burst }).is_err() {
            tracing::warn!("Rate limiter applier is gone, update dropped");
        }
    }

    /// Interval between tokens currently in effect
    pub fn interval(&self) -> Duration {
        lock(&self.bucket).interval
    }

    pub fn burst(&self) -> u32 {
        lock(&self.bucket).burst
    }
}

fn lock(bucket: &Mutex<Bucket>) -> MutexGuard<'_, Bucket> {
    bucket.lock().unwrap_or_else(PoisonError::into_inner)
}
