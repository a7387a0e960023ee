pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use sentra_common::types::DispatchItem;
use sentra_notify::plugin::ChannelRegistry;
use sentra_storage::{QueueJob, Store};

/// Durable at-least-once dispatch queue.
///
/// Enqueues land in the `queue_jobs` collection; a pool of workers claims
/// due jobs and drives the channel adapters. A paused queue still accepts
/// enqueues; only the workers idle.
pub struct QueueManager {
    store: Arc<Store>,
    registry: ChannelRegistry,
    max_retry: i64,
    worker_num: usize,
    paused: AtomicBool,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Worker counters exposed on the control API.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct QueueStats {
    pub processed: u64,
    pub failed: u64,
    pub paused: bool,
}

impl QueueManager {
    pub fn new(
        store: Arc<Store>,
        registry: ChannelRegistry,
        max_retry: i64,
        worker_num: usize,
    ) -> Self {
        Self {
            store,
            registry,
            max_retry,
            worker_num,
            paused: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Fire-and-forget enqueue onto the per-channel queue.
    pub async fn enqueue(&self, item: &DispatchItem) -> Result<QueueJob> {
        let payload = serde_json::to_string(item)?;
        let job = self
            .store
            .enqueue_job(&item.channel, &payload, Utc::now())
            .await?;
        tracing::debug!(
            job_id = %job.id,
            channel = %item.channel,
            group_id = %item.group_id,
            "dispatch enqueued"
        );
        Ok(job)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("dispatch queue paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("dispatch queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            paused: self.is_paused(),
        }
    }

    pub(crate) fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub(crate) fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub(crate) fn max_retry(&self) -> i64 {
        self.max_retry
    }

    pub(crate) fn note_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Spawn the worker pool. Handles are returned so `main` can abort them
    /// on shutdown.
    pub fn start_workers(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.worker_num)
            .map(|worker_id| {
                let manager = self.clone();
                tokio::spawn(async move {
                    worker::worker_loop(manager, worker_id).await;
                })
            })
            .collect()
    }
}
