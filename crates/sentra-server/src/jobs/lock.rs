use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use sentra_storage::{StorageError, Store};

/// Lease resource shared by every scheduler node.
pub const LOCK_RESOURCE: &str = "crontab-lock";
/// Lease TTL in seconds; renewed every scheduler tick.
pub const LOCK_TTL_SECS: i64 = 90;

#[derive(Default)]
struct LocalLease {
    locked: bool,
    lock_id: String,
}

/// Leader election over a store-backed lease.
///
/// Every node calls [`try_lock`](Self::try_lock) each scheduler tick; only
/// the node with `has_lock() == true` runs the mutation jobs. Local state
/// sits behind an `RwLock` (status reads from jobs vs lock/unlock writes
/// from the scheduler) and the guard is never held across a store call.
pub struct DistributeLockManager {
    store: Arc<Store>,
    owner: String,
    state: RwLock<LocalLease>,
}

impl DistributeLockManager {
    pub fn new(store: Arc<Store>, owner: String) -> Self {
        Self {
            store,
            owner,
            state: RwLock::new(LocalLease::default()),
        }
    }

    /// Acquire or keep the lease. Not holding the lease is not an error;
    /// the node simply stays a follower.
    pub async fn try_lock(&self) -> Result<()> {
        let held = {
            let state = self.state.read().unwrap();
            state.locked.then(|| state.lock_id.clone())
        };

        match held {
            Some(lock_id) => match self.store.renew_lock(&lock_id, LOCK_TTL_SECS).await {
                Ok(()) => Ok(()),
                // Lease expired and was taken (then possibly released):
                // fall back to a fresh acquisition.
                Err(StorageError::LockNotFound) => self.lock().await,
                Err(e) => {
                    self.demote();
                    Err(e).context("renew lock failed")
                }
            },
            None => self.lock().await,
        }
    }

    async fn lock(&self) -> Result<()> {
        match self
            .store
            .acquire_lock(LOCK_RESOURCE, &self.owner, LOCK_TTL_SECS)
            .await
        {
            Ok(lease) => {
                let mut state = self.state.write().unwrap();
                state.locked = true;
                state.lock_id = lease.lock_id;
                tracing::info!(owner = %self.owner, "acquired scheduler lease");
                Ok(())
            }
            Err(StorageError::AlreadyLocked) => {
                self.demote();
                Ok(())
            }
            Err(e) => {
                self.demote();
                Err(e).context("acquire lock failed")
            }
        }
    }

    /// Release the lease on graceful shutdown. Any error still demotes the
    /// local state so no further mutation happens.
    pub async fn try_unlock(&self) -> Result<()> {
        let held = {
            let state = self.state.read().unwrap();
            state.locked.then(|| state.lock_id.clone())
        };

        let Some(lock_id) = held else {
            return Ok(());
        };

        let result = self.store.release_lock(&lock_id).await;
        self.demote();
        result.context("release lock failed")
    }

    pub fn has_lock(&self) -> bool {
        self.state.read().unwrap().locked
    }

    fn demote(&self) {
        let mut state = self.state.write().unwrap();
        state.locked = false;
        state.lock_id.clear();
    }
}
