use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;

use sentra_common::types::{ActionStatus, DispatchItem, GroupStatus, QueueJobStatus};
use sentra_storage::{QueueJob, Store};

use super::QueueManager;

const POLL_INTERVAL_MS: u64 = 1000;
const POLL_BATCH: u64 = 5;
/// Base backoff; doubles per retry.
const BACKOFF_BASE_SECS: i64 = 30;

pub async fn worker_loop(manager: Arc<QueueManager>, worker_id: usize) {
    tracing::info!(worker_id, "queue worker started");
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(POLL_INTERVAL_MS));

    loop {
        tick.tick().await;
        if manager.is_paused() {
            continue;
        }

        let due = match manager.store().due_queue_jobs(Utc::now(), POLL_BATCH).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "queue poll failed");
                continue;
            }
        };

        for job in due {
            // Workers race on the same rows; the conditional claim decides.
            match manager.store().claim_queue_job(&job.id).await {
                Ok(true) => run_job(&manager, job).await,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(worker_id, job_id = %job.id, error = %e, "claim failed");
                }
            }
        }
    }
}

async fn run_job(manager: &Arc<QueueManager>, job: QueueJob) {
    let item: DispatchItem = match serde_json::from_str(&job.payload) {
        Ok(item) => item,
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "malformed queue payload, canceling");
            let _ = manager
                .store()
                .finish_queue_job(&job.id, QueueJobStatus::Canceled)
                .await;
            manager.note_failed();
            return;
        }
    };

    let outcome = deliver(manager, &item).await;

    match outcome {
        Ok(()) => {
            if let Err(e) = manager
                .store()
                .finish_queue_job(&job.id, QueueJobStatus::Succeed)
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "failed to mark job succeeded");
            }
            manager.note_processed();
            stamp_action(manager.store(), &item, ActionStatus::Ok).await;
        }
        Err(e) => {
            if job.retry_count < manager.max_retry() {
                let retry = job.retry_count + 1;
                let backoff = Duration::seconds(BACKOFF_BASE_SECS * (1 << (retry - 1).min(16)));
                tracing::warn!(
                    job_id = %job.id,
                    retry,
                    backoff_secs = backoff.num_seconds(),
                    error = %e,
                    "dispatch failed, backing off"
                );
                if let Err(e) = manager
                    .store()
                    .retry_queue_job(&job.id, retry, Utc::now() + backoff)
                    .await
                {
                    tracing::error!(job_id = %job.id, error = %e, "failed to requeue job");
                }
            } else {
                tracing::error!(
                    job_id = %job.id,
                    retries = job.retry_count,
                    error = %e,
                    "dispatch failed terminally"
                );
                if let Err(e) = manager
                    .store()
                    .finish_queue_job(&job.id, QueueJobStatus::Failed)
                    .await
                {
                    tracing::error!(job_id = %job.id, error = %e, "failed to mark job failed");
                }
                manager.note_failed();
                stamp_action(manager.store(), &item, ActionStatus::Failed).await;
            }
        }
    }
}

async fn deliver(manager: &Arc<QueueManager>, item: &DispatchItem) -> anyhow::Result<()> {
    let config = channel_config(item);
    let channel = manager.registry().create_channel(&item.channel, &config)?;
    channel.send(item).await
}

/// Channel config assembled from the item's routing meta. Numeric and
/// boolean strings are coerced so plugins can deserialize typed fields
/// (e.g. `smtp_port`).
fn channel_config(item: &DispatchItem) -> Value {
    let mut map = serde_json::Map::new();
    for (k, v) in &item.meta {
        let coerced = if let Ok(n) = v.parse::<i64>() {
            Value::from(n)
        } else if let Ok(b) = v.parse::<bool>() {
            Value::from(b)
        } else {
            Value::from(v.clone())
        };
        map.insert(k.clone(), coerced);
    }
    Value::Object(map)
}

/// Write the delivery outcome back onto the group's action and settle the
/// group status once no dispatch is outstanding. Action status is
/// monotone: only `pending` advances.
async fn stamp_action(store: &Arc<Store>, item: &DispatchItem, status: ActionStatus) {
    let group = match store.get_group(&item.group_id).await {
        Ok(Some(group)) => group,
        Ok(None) => {
            tracing::warn!(group_id = %item.group_id, "group vanished before status stamp");
            return;
        }
        Err(e) => {
            tracing::error!(group_id = %item.group_id, error = %e, "group load failed");
            return;
        }
    };

    let mut group = group;
    let mut changed = false;
    for action in &mut group.actions {
        if action.id == item.action_id && action.trigger_status == ActionStatus::Pending {
            action.trigger_status = status;
            action.triggered_at = Some(Utc::now());
            changed = true;
        }
    }
    if !changed {
        return;
    }

    if let Some(settled) = settle_status(&group.actions) {
        group.status = settled;
    }

    if let Err(e) = store.update_group(&group).await {
        tracing::error!(group_id = %group.id, error = %e, "action status update failed");
    }
}

/// Final group status per the delivery contract: `okay` when every action
/// fired and delivered, `failed` when nothing delivered, `partial`
/// otherwise. `None` while any dispatch is still in flight.
fn settle_status(actions: &[sentra_common::types::GroupAction]) -> Option<GroupStatus> {
    if actions
        .iter()
        .any(|a| a.trigger_status == ActionStatus::Pending)
    {
        return None;
    }

    let ok = actions
        .iter()
        .filter(|a| a.trigger_status == ActionStatus::Ok)
        .count();

    Some(if ok == actions.len() && !actions.is_empty() {
        GroupStatus::Okay
    } else if ok == 0 {
        GroupStatus::Failed
    } else {
        GroupStatus::Partial
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_common::types::GroupAction;
    use std::collections::HashMap;

    fn action(status: ActionStatus) -> GroupAction {
        GroupAction {
            id: "a".into(),
            name: String::new(),
            channel: "webhook".into(),
            pre_condition: String::new(),
            template: String::new(),
            user_refs: vec![],
            meta: HashMap::new(),
            trigger_status: status,
            triggered_at: None,
        }
    }

    #[test]
    fn settle_waits_for_inflight_dispatches() {
        let actions = vec![action(ActionStatus::Ok), action(ActionStatus::Pending)];
        assert_eq!(settle_status(&actions), None);
    }

    #[test]
    fn settle_aggregates_outcomes() {
        assert_eq!(
            settle_status(&[action(ActionStatus::Ok), action(ActionStatus::Ok)]),
            Some(GroupStatus::Okay)
        );
        assert_eq!(
            settle_status(&[action(ActionStatus::Failed), action(ActionStatus::NoCondition)]),
            Some(GroupStatus::Failed)
        );
        assert_eq!(
            settle_status(&[action(ActionStatus::Ok), action(ActionStatus::Failed)]),
            Some(GroupStatus::Partial)
        );
    }

    #[test]
    fn channel_config_coerces_types() {
        let mut meta = HashMap::new();
        meta.insert("smtp_port".to_string(), "465".to_string());
        meta.insert("from".to_string(), "alerts@example.com".to_string());
        let item = DispatchItem {
            group_id: "g".into(),
            action_id: "a".into(),
            channel: "email".into(),
            body: String::new(),
            recipients: vec![],
            meta,
        };
        let config = channel_config(&item);
        assert_eq!(config["smtp_port"], serde_json::json!(465));
        assert_eq!(config["from"], serde_json::json!("alerts@example.com"));
    }
}
