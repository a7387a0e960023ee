use std::sync::Arc;

use tokio::time::{interval, Duration};

use crate::bus::{Bus, BusEvent};

use super::aggregation::AggregationJob;
use super::lock::DistributeLockManager;
use super::recovery::RecoveryJob;
use super::trigger::TriggerJob;

const RECOVERY_SWEEP_SECS: u64 = 60;

/// Single driver task for the periodic jobs.
///
/// Every node runs a scheduler, but each tick first refreshes the lease and
/// only the leader dispatches to the jobs. Losing the lease mid-flight is
/// tolerated: the store-side upserts stay race-safe.
pub struct Scheduler {
    lock: Arc<DistributeLockManager>,
    aggregation: Arc<AggregationJob>,
    trigger: Arc<TriggerJob>,
    recovery: Arc<RecoveryJob>,
    bus: Bus,
    aggregation_period: Duration,
    action_trigger_period: Duration,
}

impl Scheduler {
    pub fn new(
        lock: Arc<DistributeLockManager>,
        aggregation: Arc<AggregationJob>,
        trigger: Arc<TriggerJob>,
        recovery: Arc<RecoveryJob>,
        bus: Bus,
        aggregation_period_secs: u64,
        action_trigger_period_secs: u64,
    ) -> Self {
        Self {
            lock,
            aggregation,
            trigger,
            recovery,
            bus,
            aggregation_period: Duration::from_secs(aggregation_period_secs),
            action_trigger_period: Duration::from_secs(action_trigger_period_secs),
        }
    }

    pub async fn run(&self) {
        tracing::info!(
            aggregation_period = self.aggregation_period.as_secs(),
            action_trigger_period = self.action_trigger_period.as_secs(),
            "scheduler started"
        );

        let mut aggregation_tick = interval(self.aggregation_period);
        let mut trigger_tick = interval(self.action_trigger_period);
        let mut recovery_tick = interval(Duration::from_secs(RECOVERY_SWEEP_SECS));
        let mut bus_rx = self.bus.subscribe();

        loop {
            tokio::select! {
                _ = aggregation_tick.tick() => {
                    if self.leading().await {
                        self.aggregation.handle().await;
                    }
                }
                _ = trigger_tick.tick() => {
                    if self.leading().await {
                        self.trigger.handle().await;
                    }
                }
                _ = recovery_tick.tick() => {
                    if self.leading().await {
                        self.recovery.handle().await;
                    }
                }
                // A freshly pending group shortens the wait until the next
                // trigger pass. Lag or closure just falls back to the tick.
                event = bus_rx.recv() => {
                    if let Ok(BusEvent::GroupPending { .. }) = event {
                        if self.leading().await {
                            self.trigger.handle().await;
                        }
                    }
                }
            }
        }
    }

    /// Refresh the lease, then report whether this node leads. A store
    /// error demotes to follower until the next tick.
    async fn leading(&self) -> bool {
        if let Err(e) = self.lock.try_lock().await {
            tracing::error!(error = %e, "lease refresh failed, staying follower");
            return false;
        }
        let leading = self.lock.has_lock();
        if !leading {
            tracing::debug!("not the leader, skipping tick");
        }
        leading
    }
}
