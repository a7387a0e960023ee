use chrono::{DateTime, Utc};
use std::sync::Arc;

use sentra_storage::Store;

use crate::bus::Bus;
use crate::config::Config;
use crate::queue::QueueManager;

/// Shared application state, wired explicitly in `main` and handed to the
/// HTTP handlers, the gRPC relay and the scheduler jobs.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub bus: Bus,
    pub queue: Arc<QueueManager>,
    pub config: Arc<Config>,
    pub start_time: DateTime<Utc>,
}
