//! Background workers.
//!
//! Each worker wakes up on a timer, makes sure it holds its lock, and runs one pass of its job. An instance that cannot
//! get the lock just waits for the next tick, so exactly one instance works at a time and another takes over once the
//! holder stops renewing its lease. On shutdown the lock is released straight away instead of waiting for it to go
//! stale.
use std::{future::Future, time::Duration};

use bop_payment_engine::{
    lock::{DistributedLock, Lease, LockStore},
    processors::PaymentProcessors,
    PaymentReconciler,
    SqliteDatabase,
    StockApi,
};
use chrono::{DateTime, Utc};
use log::*;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

/// How far back the first sweep looks for lapsed cart reservations.
const INITIAL_LOOKBACK: chrono::Duration = chrono::Duration::hours(24);

/// A pass of background work that only one instance may run at a time.
pub trait LockedJob: Send + 'static {
    fn name(&self) -> &'static str;

    /// Runs one pass. The lease is held on entry but can be lost while the pass runs.
    fn run(&mut self, lease: &Lease) -> impl Future<Output = ()> + Send;
}

/// Checks every pending payment against its processor.
pub struct ReconciliationJob<P> {
    reconciler: PaymentReconciler<SqliteDatabase, P>,
}

impl<P> ReconciliationJob<P> {
    pub fn new(reconciler: PaymentReconciler<SqliteDatabase, P>) -> Self {
        Self { reconciler }
    }
}

impl<P: PaymentProcessors + 'static> LockedJob for ReconciliationJob<P> {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    async fn run(&mut self, lease: &Lease) {
        match self.reconciler.tick(lease).await {
            Ok(summary) if summary.lease_lost => {
                warn!("🕰️ Reconciliation tick cut short after {} orders. The lease was lost", summary.orders_checked)
            },
            Ok(summary) => trace!("🕰️ Reconciliation tick: {summary:?}"),
            Err(e) => error!("🕰️ Reconciliation tick failed: {e}"),
        }
    }
}

/// Gives the stock held by lapsed cart reservations back to the shop.
pub struct ReservationCleanupJob {
    stock: StockApi<SqliteDatabase>,
    last_sweep: Option<DateTime<Utc>>,
}

impl ReservationCleanupJob {
    pub fn new(stock: StockApi<SqliteDatabase>) -> Self {
        Self { stock, last_sweep: None }
    }

    /// Releases the reservations that lapsed since the previous successful sweep. Returns the number of products
    /// whose stock was refreshed.
    pub async fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let since = self.last_sweep.unwrap_or(now - INITIAL_LOOKBACK);
        match self.stock.refresh_expired_reservations(since, now).await {
            Ok(count) => {
                self.last_sweep = Some(now);
                count
            },
            Err(e) => {
                error!("🕰️ Could not release lapsed reservations since {since}: {e}");
                0
            },
        }
    }
}

impl LockedJob for ReservationCleanupJob {
    fn name(&self) -> &'static str {
        "reservation cleanup"
    }

    async fn run(&mut self, _lease: &Lease) {
        let count = self.sweep(Utc::now()).await;
        debug!("🕰️ Reservation sweep refreshed {count} products");
    }
}

/// Starts a worker that runs `job` every `period` while it holds `lock`. Do not await the returned JoinHandle unless
/// `shutdown` has been signalled, as it runs until then.
pub fn start_worker<J, S>(
    mut job: J,
    lock: DistributedLock<S>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    J: LockedJob,
    S: LockStore,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut lease: Option<Lease> = None;
        info!("🕰️ {} worker started on {}", job.name(), lock.owner());
        loop {
            tokio::select! {
                _ = timer.tick() => {},
                _ = shutdown.changed() => break,
            }
            if lease.as_ref().is_some_and(|l| !l.is_held()) {
                warn!("🕰️ The {} worker lost its lease", job.name());
                lease = None;
            }
            if lease.is_none() {
                lease = lock.acquire().await.unwrap_or_else(|e| {
                    warn!("🕰️ Could not take the lock for the {} worker: {e}", job.name());
                    None
                });
            }
            if let Some(held) = lease.as_ref() {
                job.run(held).await;
            }
        }
        if let Some(lease) = lease {
            if let Err(e) = lock.release(lease).await {
                warn!("🕰️ Could not release the lock of the {} worker: {e}", job.name());
            }
        }
        info!("🕰️ {} worker stopped", job.name());
    })
}
