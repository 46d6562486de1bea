//! Single-flight cycle scheduler
//!
//! - `trigger()` claims an atomic in-flight flag before any I/O. If the flag
//!   is already held the trigger is dropped, never queued.
//! - The flag is released by a guard, so a failing or panicking cycle still
//!   frees the scheduler.
//! - `run_until()` fires once immediately, then on every interval tick.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Work performed by one scheduled cycle
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    type Report: Send + 'static;

    async fn run_cycle(&self) -> Self::Report;
}

#[derive(Debug)]
pub enum TriggerOutcome<T> {
    Completed(T),
    /// A cycle was already running
    Skipped,
}

impl<T> TriggerOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TriggerOutcome::Skipped)
    }

    pub fn into_report(self) -> Option<T> {
        match self {
            TriggerOutcome::Completed(report) => Some(report),
            TriggerOutcome::Skipped => None,
        }
    }
}

/// Clears the in-flight flag on drop
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct CycleScheduler<R> {
    runner: Arc<R>,
    in_flight: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
}

impl<R> Clone for CycleScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            in_flight: Arc::clone(&self.in_flight),
            skipped: Arc::clone(&self.skipped),
        }
    }
}

impl<R: CycleRunner> CycleScheduler<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            runner,
            in_flight: Arc::new(AtomicBool::new(false)),
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn runner(&self) -> &Arc<R> {
        &self.runner
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Triggers dropped because a cycle was in flight
    pub fn skipped_count(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Run one cycle unless one is already in flight
    pub async fn trigger(&self) -> TriggerOutcome<R::Report> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            info!("Previous cycle still running; trigger skipped");
            return TriggerOutcome::Skipped;
        };

        TriggerOutcome::Completed(self.runner.run_cycle().await)
    }

    /// Trigger now and then every `period` until `shutdown` resolves.
    ///
    /// Each trigger runs as its own task, so a slow cycle makes later ticks
    /// skip instead of piling up. On shutdown an in-flight cycle is awaited.
    pub async fn run_until<F>(&self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tasks: JoinSet<()> = JoinSet::new();
        tokio::pin!(shutdown);

        info!(interval_secs = period.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let this = self.clone();
                    tasks.spawn(async move {
                        let _ = this.trigger().await;
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Cycle task failed");
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for the running cycle to finish");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Cycle task failed");
            }
        }
        info!("Scheduler stopped");
    }
}
