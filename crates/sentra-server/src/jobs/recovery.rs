use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};

use sentra_common::types::{CommonEvent, EventControl, EVENT_TYPE_RECOVERY};
use sentra_storage::Store;

/// Inhibit records older than this can no longer suppress anything.
const INHIBIT_RETENTION_DAYS: i64 = 7;

/// Background sweep on the leader: markers quiet for their full
/// `recovery_after` produce a synthetic recovery event that re-enters
/// aggregation.
pub struct RecoveryJob {
    store: Arc<Store>,
}

impl RecoveryJob {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn handle(&self) {
        if let Err(e) = self.sweep().await {
            tracing::error!(error = %e, "recovery sweep failed");
        }
    }

    pub async fn sweep(&self) -> Result<()> {
        let now = Utc::now();

        for marker in self.store.due_recoveries(now).await? {
            let rule_name = match self.store.get_group(&marker.group_id).await? {
                Some(group) => group.rule.name,
                None => marker.rule_id.clone(),
            };

            let mut meta = std::collections::HashMap::new();
            meta.insert("recovery".to_string(), serde_json::json!(true));
            meta.insert(
                "recovery-for".to_string(),
                serde_json::json!(marker.dedup_id.clone()),
            );
            meta.insert("rule_id".to_string(), serde_json::json!(marker.rule_id));

            let event = CommonEvent {
                content: format!(
                    "[recovery] {}: no event with id {} for {}s",
                    rule_name, marker.dedup_id, marker.recovery_after_secs
                ),
                meta,
                tags: vec!["recovery".to_string()],
                origin: marker.origin.clone(),
                event_type: Some(EVENT_TYPE_RECOVERY.to_string()),
                control: EventControl {
                    id: marker.dedup_id.clone(),
                    ..Default::default()
                },
            }
            .into_event(now);

            self.store.insert_event(&event).await?;
            self.store.delete_recovery(&marker.dedup_id).await?;

            tracing::info!(
                dedup_id = %marker.dedup_id,
                event_id = %event.id,
                "synthesized recovery event"
            );
        }

        // Piggyback: drop inhibit records nothing can reference anymore.
        let cutoff = now - Duration::days(INHIBIT_RETENTION_DAYS);
        let pruned = self.store.prune_inhibits(cutoff).await?;
        if pruned > 0 {
            tracing::debug!(pruned, "pruned stale inhibit records");
        }

        Ok(())
    }
}
