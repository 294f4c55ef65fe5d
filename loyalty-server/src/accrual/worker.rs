//! Reconciliation worker
//!
//! Lifecycle: `Stopped → Running → Stopping → Stopped`.
//!
//! [`Reconciler::run`] spawns two tasks joined by a bounded channel: the
//! [`OrderSource`] producer and the reconcile loop. For every order the loop
//! takes a limiter token, asks the accrual system, and commits the answer
//! through [`Store::apply_accrual`]. A 429 pauses the whole loop for the
//! cooldown and then permanently widens the limiter interval by one backoff
//! step.
//!
//! [`Reconciler::stop`] cancels the worker's token once and waits at most
//! `shutdown_timeout` for both tasks, aborting whatever is still running.

use futures::future::join_all;
use shared::models::Order;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AccrualApi, AccrualError, DynamicRateLimiter, OrderSource, WorkerError};
use crate::db::{RepoError, Store};

/// Tuning for the reconciliation loop
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause between order source polls
    pub poll_interval: Duration,
    /// Page size of one poll, also the channel capacity
    pub batch_limit: i64,
    /// Initial limiter interval between accrual requests
    pub rate_interval: Duration,
    pub rate_burst: u32,
    /// Minimum pause after a 429
    pub cooldown: Duration,
    /// Added to the limiter interval after every 429
    pub backoff_step: Duration,
    /// Upper bound on how long `stop` waits for the tasks
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_limit: 100,
            rate_interval: Duration::from_millis(100),
            rate_burst: 10,
            cooldown: Duration::from_secs(60),
            backoff_step: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        let positive = [
            ("poll_interval", self.poll_interval),
            ("rate_interval", self.rate_interval),
            ("backoff_step", self.backoff_step),
            ("shutdown_timeout", self.shutdown_timeout),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, d)| d.is_zero()) {
            return Err(WorkerError::Config(format!("{name} must be positive")));
        }
        if self.batch_limit <= 0 {
            return Err(WorkerError::Config("batch_limit must be positive".into()));
        }
        if self.rate_burst == 0 {
            return Err(WorkerError::Config("rate_burst must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Stopping,
}

struct Lifecycle {
    state: WorkerState,
    /// Bumped on every `run`, so a task from an older run can't touch a newer one
    generation: u64,
    done: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

/// Everything the reconcile loop needs, cloned into its task
#[derive(Clone)]
struct LoopContext {
    store: Arc<dyn Store>,
    accrual: Arc<dyn AccrualApi>,
    limiter: Arc<DynamicRateLimiter>,
    config: WorkerConfig,
    /// Limiter interval after all backoffs so far; outlives individual runs
    send_interval: Arc<Mutex<Duration>>,
}

/// Background worker reconciling orders with the accrual system
pub struct Reconciler {
    ctx: LoopContext,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        accrual: Arc<dyn AccrualApi>,
        limiter: Arc<DynamicRateLimiter>,
        config: WorkerConfig,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        let send_interval = Arc::new(Mutex::new(config.rate_interval));
        Ok(Self {
            ctx: LoopContext {
                store,
                accrual,
                limiter,
                config,
                send_interval,
            },
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: WorkerState::Stopped,
                generation: 0,
                done: None,
                handles: Vec::new(),
            })),
        })
    }

    pub fn state(&self) -> WorkerState {
        lock(&self.lifecycle).state
    }

    /// Interval currently enforced between accrual requests
    pub fn rate_interval(&self) -> Duration {
        self.ctx.limiter.interval()
    }

    /// Start the producer and the reconcile loop.
    ///
    /// The worker also stops when `parent` is cancelled.
    pub fn run(&self, parent: &CancellationToken) -> Result<(), WorkerError> {
        let mut lc = lock(&self.lifecycle);
        if lc.state != WorkerState::Stopped {
            return Err(WorkerError::AlreadyRunning);
        }

        let done = parent.child_token();
        let capacity = usize::try_from(self.ctx.config.batch_limit).unwrap_or(1).max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let source = OrderSource::new(
            self.ctx.store.clone(),
            self.ctx.config.batch_limit,
            self.ctx.config.poll_interval,
        );
        let producer = tokio::spawn(source.run(tx, done.clone()));

        lc.generation += 1;
        let consumer = tokio::spawn(reconcile_loop(
            self.ctx.clone(),
            rx,
            done.clone(),
            self.lifecycle.clone(),
            lc.generation,
        ));

        lc.state = WorkerState::Running;
        lc.done = Some(done);
        lc.handles = vec![producer, consumer];

        tracing::info!(
            poll_interval_ms = self.ctx.config.poll_interval.as_millis() as u64,
            batch_limit = self.ctx.config.batch_limit,
            "Reconciliation worker started"
        );
        Ok(())
    }

    /// Signal the tasks and wait for them, bounded by `shutdown_timeout`.
    ///
    /// Safe to call repeatedly and concurrently; only the first call waits.
    pub async fn stop(&self) {
        let (done, handles) = {
            let mut lc = lock(&self.lifecycle);
            if lc.state != WorkerState::Running {
                return;
            }
            lc.state = WorkerState::Stopping;
            (lc.done.take(), std::mem::take(&mut lc.handles))
        };

        if let Some(done) = done {
            done.cancel();
        }

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let timeout = self.ctx.config.shutdown_timeout;
        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result
                        && e.is_panic()
                    {
                        tracing::error!(error = ?e, "Reconciliation task panicked");
                    }
                }
                tracing::info!("Reconciliation worker stopped");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Reconciliation worker did not stop in time, aborting in-flight work"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        lock(&self.lifecycle).state = WorkerState::Stopped;
    }
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn reconcile_loop(
    ctx: LoopContext,
    mut rx: mpsc::Receiver<Order>,
    done: CancellationToken,
    lifecycle: Arc<Mutex<Lifecycle>>,
    generation: u64,
) {
    loop {
        let order = tokio::select! {
            biased;
            _ = done.cancelled() => break,
            order = rx.recv() => match order {
                Some(order) => order,
                None => break,
            },
        };

        if ctx.limiter.wait(&done).await.is_err() {
            break;
        }

        match ctx.accrual.order_status(&order.number).await {
            Ok(result) => match ctx.store.apply_accrual(&result).await {
                Ok(user_id) => tracing::info!(
                    order = %result.number,
                    status = %result.status,
                    accrual = %result.accrual,
                    user_id,
                    "Order reconciled"
                ),
                Err(RepoError::Conflict(msg)) => {
                    tracing::debug!(order = %order.number, reason = %msg, "Order already final")
                }
                Err(e) => {
                    tracing::error!(order = %order.number, error = %e, "Failed to store accrual")
                }
            },
            Err(AccrualError::NoData) => {
                tracing::debug!(order = %order.number, "No accrual data yet");
            }
            Err(AccrualError::Transient(msg)) => {
                tracing::warn!(order = %order.number, error = %msg, "Accrual request failed");
            }
            Err(AccrualError::RateLimited { retry_after }) => {
                let pause = retry_after.map_or(ctx.config.cooldown, |r| r.max(ctx.config.cooldown));
                tracing::info!(
                    order = %order.number,
                    pause_ms = pause.as_millis() as u64,
                    "Accrual system is rate limiting, pausing"
                );

                tokio::select! {
                    biased;
                    _ = done.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }

                let interval = {
                    let mut current = ctx
                        .send_interval
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    *current += ctx.config.backoff_step;
                    *current
                };
                ctx.limiter.update(interval, ctx.config.rate_burst);
                tracing::info!(
                    interval_ms = interval.as_millis() as u64,
                    "Slowed down accrual requests"
                );
            }
        }
    }

    // Stopped from outside (parent token); `stop` handles its own bookkeeping
    let mut lc = lock(&lifecycle);
    if lc.generation == generation && lc.state == WorkerState::Running {
        lc.state = WorkerState::Stopped;
        lc.done = None;
    }
    tracing::debug!("Reconcile loop exited");
}
