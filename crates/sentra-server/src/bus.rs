//! In-process event bus for pipeline notifications.
//!
//! Aggregation and the group-cut operation publish here; the trigger job
//! and a metrics logger subscribe. Delivery is lossy (`broadcast` drops for
//! slow receivers): the periodic jobs re-derive state from the store.

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A collecting group reached readiness and is waiting for the trigger
    /// pass.
    GroupPending { group_id: String, rule_id: String },
    /// A finished group was cut down to `keep` events.
    GroupReduced {
        group_id: String,
        keep: u64,
        deleted: u64,
    },
}

#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<BusEvent>,
}

impl Bus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn publish(&self, event: BusEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// Background consumer that turns bus traffic into structured logs.
pub fn spawn_bus_logger(bus: &Bus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(BusEvent::GroupPending { group_id, rule_id }) => {
                    tracing::info!(group_id, rule_id, "group pending");
                }
                Ok(BusEvent::GroupReduced {
                    group_id,
                    keep,
                    deleted,
                }) => {
                    tracing::info!(group_id, keep, deleted, "group reduced");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "bus logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}
