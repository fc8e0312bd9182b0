//! A lease-based lock shared by every instance of the engine that talks to the same database.
//!
//! The lock is a row holding the owner's id and the time of its last heartbeat. It can be claimed if it is free,
//! already ours, or stale (no heartbeat within the TTL). A background task renews it every third of the TTL. If a
//! renewal is refused, or renewals keep failing for longer than the TTL, the lease is marked as lost and the holder
//! must stop work at its next checkpoint.
use std::{future::Future, time::Duration};

use log::*;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::Instant};

#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("Lock storage error: {0}")]
    StorageError(String),
}

impl From<sqlx::Error> for LockError {
    fn from(e: sqlx::Error) -> Self {
        LockError::StorageError(e.to_string())
    }
}

pub trait LockStore: Clone + Send + Sync + 'static {
    /// Claims or renews the lock `name` for `owner`. Returns false if another owner holds a fresh lease.
    fn try_claim(&self, name: &str, owner: &str, ttl: Duration)
        -> impl Future<Output = Result<bool, LockError>> + Send;

    /// Releases the lock if `owner` holds it.
    fn release(&self, name: &str, owner: &str) -> impl Future<Output = Result<(), LockError>> + Send;
}

#[derive(Debug, Clone)]
pub struct DistributedLock<S> {
    store: S,
    name: String,
    owner: String,
    ttl: Duration,
}

/// Proof of holding a [`DistributedLock`]. Dropping it stops the renewals; call [`DistributedLock::release`] to free
/// the lock straight away.
#[derive(Debug)]
pub struct Lease {
    name: String,
    held: watch::Receiver<bool>,
    renewal: JoinHandle<()>,
}

impl Lease {
    /// False once the lease has been lost. Checked between units of work.
    pub fn is_held(&self) -> bool {
        *self.held.borrow() && !self.renewal.is_finished()
    }

    /// Resolves when the lease is lost.
    pub async fn lost(&mut self) {
        while *self.held.borrow() {
            if self.held.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.renewal.abort();
    }
}

impl<S: LockStore> DistributedLock<S> {
    pub fn new<N: Into<String>, O: Into<String>>(store: S, name: N, owner: O, ttl: Duration) -> Self {
        Self { store, name: name.into(), owner: owner.into(), ttl }
    }

    pub fn owner(&self) -> &str {
        self.owner.as_str()
    }

    /// Tries to take the lock. Returns `None` if another instance holds it.
    pub async fn acquire(&self) -> Result<Option<Lease>, LockError> {
        if !self.store.try_claim(&self.name, &self.owner, self.ttl).await? {
            trace!("🔒️ Lock '{}' is held by another instance", self.name);
            return Ok(None);
        }
        info!("🔒️ Lock '{}' acquired by {}", self.name, self.owner);
        let (tx, rx) = watch::channel(true);
        let renewal = tokio::spawn(renew(self.clone(), tx));
        Ok(Some(Lease { name: self.name.clone(), held: rx, renewal }))
    }

    /// Stops renewing and frees the lock for other instances.
    pub async fn release(&self, lease: Lease) -> Result<(), LockError> {
        drop(lease);
        self.store.release(&self.name, &self.owner).await?;
        info!("🔒️ Lock '{}' released by {}", self.name, self.owner);
        Ok(())
    }
}

async fn renew<S: LockStore>(lock: DistributedLock<S>, held: watch::Sender<bool>) {
    let period = lock.ttl / 3;
    let mut last_renewal = Instant::now();
    loop {
        tokio::time::sleep(period).await;
        if held.is_closed() {
            break;
        }
        match lock.store.try_claim(&lock.name, &lock.owner, lock.ttl).await {
            Ok(true) => {
                trace!("🔒️ Lease on '{}' renewed", lock.name);
                last_renewal = Instant::now();
            },
            Ok(false) => {
                warn!("🔒️ Lease on '{}' was taken over by another instance", lock.name);
                let _ = held.send(false);
                break;
            },
            Err(e) => {
                warn!("🔒️ Could not renew lease on '{}': {e}", lock.name);
                if last_renewal.elapsed() >= lock.ttl {
                    error!("🔒️ Lease on '{}' expired without a successful renewal", lock.name);
                    let _ = held.send(false);
                    break;
                }
            },
        }
    }
}
