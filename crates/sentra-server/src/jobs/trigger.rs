use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use sentra_common::duration::parse_duration;
use sentra_common::types::{
    ActionStatus, DispatchItem, Event, EventGroup, GroupStatus, Recovery,
};
use sentra_matcher::{TriggerEnv, TriggerHistory, TriggerMatcher};
use sentra_notify::render::{render, render_title, RenderContext};
use sentra_storage::{Store, UserRow};

use crate::queue::QueueManager;

/// How many events feed the rendered report.
const RENDER_SAMPLE: u64 = 10;
/// Upper bound on events loaded for inhibit/recovery control scanning.
const CONTROL_SCAN: u64 = 1000;

/// Store-backed history for trigger expressions.
///
/// Expression evaluation is synchronous, so the async store calls run via
/// `block_in_place` on the multi-threaded runtime.
struct StoreHistory {
    store: Arc<Store>,
}

impl TriggerHistory for StoreHistory {
    fn triggered_times_in_period(
        &self,
        action_id: &str,
        minutes: i64,
        status: &str,
    ) -> std::result::Result<i64, String> {
        let store = self.store.clone();
        let action_id = action_id.to_string();
        let status = status.to_string();
        let since = Utc::now() - Duration::minutes(minutes);

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                store
                    .count_action_fires_since(&action_id, since, &status)
                    .await
                    .map_err(|e| e.to_string())
            })
        })
    }

    fn last_triggered_group_at(
        &self,
        action_id: &str,
        status: &str,
    ) -> std::result::Result<Option<DateTime<Utc>>, String> {
        let store = self.store.clone();
        let action_id = action_id.to_string();
        let status = status.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                store
                    .last_action_fire_at(&action_id, &status)
                    .await
                    .map_err(|e| e.to_string())
            })
        })
    }
}

/// Periodic trigger evaluation over `pending` groups.
pub struct TriggerJob {
    store: Arc<Store>,
    queue: Arc<QueueManager>,
    preview_url: String,
}

impl TriggerJob {
    pub fn new(store: Arc<Store>, queue: Arc<QueueManager>, preview_url: String) -> Self {
        Self {
            store,
            queue,
            preview_url,
        }
    }

    pub async fn handle(&self) {
        let groups = match self.store.traverse_groups(GroupStatus::Pending).await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::error!(error = %e, "trigger pass: group traversal failed");
                return;
            }
        };

        for group in groups {
            let group_id = group.id.clone();
            if let Err(e) = self.process_group(group).await {
                tracing::error!(group_id, error = %e, "trigger evaluation failed for group");
            }
        }
    }

    async fn process_group(&self, mut group: EventGroup) -> Result<()> {
        let now = Utc::now();
        let history = StoreHistory {
            store: self.store.clone(),
        };

        // Control blocks of the group's source events drive inhibit and
        // recovery; fetched once per group.
        let events = self
            .store
            .events_in_group(&group.id, CONTROL_SCAN, 0)
            .await?;
        let suppressed = self.inhibited(&events, now).await?;

        let mut fired = 0usize;
        let mut evaluated = 0usize;

        for idx in 0..group.actions.len() {
            let action = group.actions[idx].clone();
            evaluated += 1;

            let matcher = match TriggerMatcher::new(action.clone()) {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!(
                        group_id = %group.id,
                        action_id = %action.id,
                        error = %e,
                        "trigger condition does not compile"
                    );
                    group.actions[idx].trigger_status = ActionStatus::Failed;
                    group.actions[idx].triggered_at = Some(now);
                    continue;
                }
            };

            let store = self.store.clone();
            let group_id = group.id.clone();
            let loader = Box::new(move || {
                let store = store.clone();
                let group_id = group_id.clone();
                tokio::task::block_in_place(|| {
                    tokio::runtime::Handle::current().block_on(async move {
                        store
                            .events_in_group(&group_id, CONTROL_SCAN, 0)
                            .await
                            .map_err(|e| e.to_string())
                    })
                })
            });
            let env = TriggerEnv::new(&group, &action.id, &history, loader);
            let match_result = matcher.matches(&env);
            drop(env);

            match match_result {
                Ok(true) => {
                    fired += 1;
                    if suppressed {
                        // Another group already reported this dedup id
                        // inside its inhibit window; the fire is considered
                        // handled without a dispatch.
                        tracing::info!(
                            group_id = %group.id,
                            action_id = %action.id,
                            "dispatch suppressed by inhibit interval"
                        );
                        group.actions[idx].trigger_status = ActionStatus::Ok;
                        group.actions[idx].triggered_at = Some(now);
                        continue;
                    }

                    match self.enqueue_dispatch(&group, idx, &events).await {
                        Ok(()) => {
                            group.actions[idx].trigger_status = ActionStatus::Pending;
                            group.actions[idx].triggered_at = Some(now);
                        }
                        Err(e) => {
                            tracing::error!(
                                group_id = %group.id,
                                action_id = %action.id,
                                error = %e,
                                "dispatch enqueue failed"
                            );
                            group.actions[idx].trigger_status = ActionStatus::Failed;
                            group.actions[idx].triggered_at = Some(now);
                        }
                    }
                }
                Ok(false) => {
                    group.actions[idx].trigger_status = ActionStatus::NoCondition;
                    group.actions[idx].triggered_at = Some(now);
                }
                Err(e) => {
                    tracing::error!(
                        group_id = %group.id,
                        action_id = %action.id,
                        error = %e,
                        "trigger evaluation errored"
                    );
                    group.actions[idx].trigger_status = ActionStatus::Failed;
                    group.actions[idx].triggered_at = Some(now);
                }
            }
        }

        // Intermediate status; the queue workers settle the final value
        // once delivery outcomes are known.
        group.status = if fired == 0 {
            GroupStatus::Failed
        } else if fired == evaluated {
            GroupStatus::Okay
        } else {
            GroupStatus::Partial
        };
        self.store.update_group(&group).await?;

        if fired > 0 && !suppressed {
            self.record_control_effects(&group, &events, now).await?;
        }

        Ok(())
    }

    /// True when any source event's dedup id produced a dispatch within its
    /// inhibit window.
    async fn inhibited(&self, events: &[Event], now: DateTime<Utc>) -> Result<bool> {
        for event in events {
            let ctl = &event.control;
            if ctl.id.is_empty() {
                continue;
            }
            let Some(window) = parse_duration(&ctl.inhibit_interval) else {
                continue;
            };
            if window.is_zero() {
                continue;
            }
            if let Some(fired_at) = self.store.last_fired(&ctl.id).await? {
                if now - fired_at < window {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// After a group fires: stamp inhibit records and seed recovery markers
    /// for every dedup-bearing source event.
    async fn record_control_effects(
        &self,
        group: &EventGroup,
        events: &[Event],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut seen: HashMap<&str, ()> = HashMap::new();

        for event in events {
            let ctl = &event.control;
            if ctl.id.is_empty() || seen.contains_key(ctl.id.as_str()) {
                continue;
            }
            seen.insert(&ctl.id, ());

            if parse_duration(&ctl.inhibit_interval).is_some_and(|w| !w.is_zero()) {
                self.store.mark_fired(&ctl.id, now).await?;
            }

            // Zero or absent recovery_after creates no marker.
            if let Some(after) = parse_duration(&ctl.recovery_after) {
                if !after.is_zero() {
                    self.store
                        .upsert_recovery(&Recovery {
                            dedup_id: ctl.id.clone(),
                            rule_id: group.rule.id.clone(),
                            group_id: group.id.clone(),
                            origin: event.origin.clone(),
                            recovery_after_secs: after.num_seconds(),
                            last_seen_at: now,
                            created_at: now,
                            updated_at: now,
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn enqueue_dispatch(
        &self,
        group: &EventGroup,
        action_idx: usize,
        events: &[Event],
    ) -> Result<()> {
        let action = &group.actions[action_idx];

        let sample: Vec<Event> = events.iter().take(RENDER_SAMPLE as usize).cloned().collect();
        let ctx = RenderContext {
            group,
            events: &sample,
            preview_url: &self.preview_url,
        };
        let body = render(&action.template, &ctx);

        let users = self.store.find_users_by_ids(&action.user_refs).await?;
        let recipients = resolve_recipients(&action.channel, &users);

        let mut meta = action.meta.clone();
        meta.insert("title".to_string(), render_title(group));

        // DingTalk actions reference a configured robot by id; resolve it
        // here so workers stay channel-agnostic.
        if action.channel == "dingtalk" {
            if let Some(robot_id) = action.meta.get("robot_id") {
                match self.store.get_robot(robot_id).await? {
                    Some(robot) => {
                        meta.insert("token".to_string(), robot.token);
                        meta.insert("secret".to_string(), robot.secret);
                    }
                    None => {
                        anyhow::bail!("dingding robot {robot_id} not found");
                    }
                }
            }
        }

        let item = DispatchItem {
            group_id: group.id.clone(),
            action_id: action.id.clone(),
            channel: action.channel.clone(),
            body,
            recipients,
            meta,
        };

        self.queue.enqueue(&item).await?;
        Ok(())
    }
}

/// Channel-native addresses for a user list.
fn resolve_recipients(channel: &str, users: &[UserRow]) -> Vec<String> {
    users
        .iter()
        .filter_map(|u| match channel {
            "email" => (!u.email.is_empty()).then(|| u.email.clone()),
            "webhook" => u
                .metas
                .iter()
                .find(|m| m.key == "webhook")
                .map(|m| m.value.clone()),
            _ => None,
        })
        .collect()
}
