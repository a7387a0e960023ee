use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Semaphore;

use sentra_common::types::{Event, EventGroup, EventStatus, GroupAction, GroupStatus};
use sentra_matcher::{build_event_finger, EventMatcher};
use sentra_storage::Store;

use crate::bus::{Bus, BusEvent};

/// Periodic aggregation: classify pending events into collecting groups,
/// re-test canceled events against the current rule set, and advance ripe
/// groups to `pending`.
pub struct AggregationJob {
    store: Arc<Store>,
    bus: Bus,
    /// One-slot guard: a tick that overlaps a still-running pass is skipped.
    executing: Semaphore,
}

impl AggregationJob {
    pub fn new(store: Arc<Store>, bus: Bus) -> Self {
        Self {
            store,
            bus,
            executing: Semaphore::new(1),
        }
    }

    pub async fn handle(&self) {
        let Ok(_permit) = self.executing.try_acquire() else {
            tracing::warn!("the last aggregation job is not finished yet, skip for this time");
            return;
        };

        if let Err(e) = self.run_once().await {
            tracing::error!(error = %e, "aggregation pass failed");
        }
    }

    /// One full aggregation pass. Also the body of the one-shot
    /// `sentra-server aggregate` subcommand.
    pub async fn run_once(&self) -> Result<()> {
        let matchers = self.initialize_matchers().await?;

        self.grouping_events(&matchers).await?;
        self.rematch_canceled(&matchers).await?;
        self.pending_event_groups().await?;
        Ok(())
    }

    /// Compile matchers for all enabled rules. A rule whose expressions do
    /// not compile is flagged and skipped, never fatal.
    async fn initialize_matchers(&self) -> Result<Vec<EventMatcher>> {
        let rules = self.store.enabled_rules().await?;

        let mut matchers = Vec::with_capacity(rules.len());
        for rule in rules {
            let rule_id = rule.id.clone();
            match EventMatcher::new(rule) {
                Ok(m) => matchers.push(m),
                Err(e) => {
                    tracing::error!(rule_id, error = %e, "invalid rule, skipped for evaluation");
                }
            }
        }
        Ok(matchers)
    }

    /// Pass 1: drain `pending` events into collecting groups.
    async fn grouping_events(&self, matchers: &[EventMatcher]) -> Result<()> {
        let now = Utc::now();
        // Group lookups within one pass hit this cache before the store.
        let mut collecting: HashMap<String, EventGroup> = HashMap::new();

        for mut event in self.store.traverse_events(EventStatus::Pending).await? {
            let mut can_ignore = false;

            for matcher in matchers {
                let (matched, ignored) = match matcher.matches(&event) {
                    Ok(v) => v,
                    Err(e) => {
                        // Runtime evaluation failure reads as "no match".
                        tracing::warn!(
                            rule_id = %matcher.rule().id,
                            event_id = %event.id,
                            error = %e,
                            "match evaluation failed"
                        );
                        continue;
                    }
                };
                if !matched {
                    continue;
                }

                if ignored {
                    can_ignore = true;
                    continue;
                }

                let rule = matcher.rule();
                let aggregate_key = build_event_finger(&rule.aggregate_rule, &event);
                let cache_key = format!("{}:{}:{}", rule.id, aggregate_key, event.event_type);

                if !collecting.contains_key(&cache_key) {
                    let actions: Vec<GroupAction> =
                        rule.actions.iter().cloned().map(GroupAction::from).collect();
                    let group = self
                        .store
                        .collecting_group(
                            &rule.to_group_rule(now),
                            &aggregate_key,
                            &event.event_type,
                            &actions,
                        )
                        .await?;
                    collecting.insert(cache_key.clone(), group);
                }

                let group = &collecting[&cache_key];
                if !event.group_ids.contains(&group.id) {
                    event.group_ids.push(group.id.clone());
                }
                event.status = EventStatus::Grouped;
            }

            // ignored flag x prior status:
            //   true  | pending -> ignored
            //   false | pending -> canceled
            //   any   | grouped -> grouped
            if event.status == EventStatus::Pending {
                event.status = if can_ignore {
                    EventStatus::Ignored
                } else {
                    EventStatus::Canceled
                };
            }

            // Only a matching event keeps its recovery marker fresh. An
            // unrelated event that merely shares the dedup id must not push
            // the recovery deadline out.
            if event.status == EventStatus::Grouped && !event.control.id.is_empty() {
                self.store
                    .touch_recovery(&event.control.id, event.created_at)
                    .await?;
            }

            tracing::debug!(event_id = %event.id, status = %event.status, "change event status");
            self.store.update_event(&event).await?;
        }

        Ok(())
    }

    /// Pass 2: a `canceled` event that now matches a rule (one created after
    /// the event was rejected) becomes `expired`, so operators can tell rule
    /// churn from genuine noise.
    async fn rematch_canceled(&self, matchers: &[EventMatcher]) -> Result<()> {
        for mut event in self.store.traverse_events(EventStatus::Canceled).await? {
            let matched = matchers.iter().any(|m| {
                m.matches(&event)
                    .map(|(matched, _)| matched)
                    .unwrap_or(false)
            });

            if matched {
                event.status = EventStatus::Expired;
                self.store.update_event(&event).await?;
            }
        }
        Ok(())
    }

    /// Pass 3: collecting groups past their readiness deadline get an
    /// authoritative event count and go `pending` for the trigger pass.
    async fn pending_event_groups(&self) -> Result<()> {
        let now = Utc::now();

        for mut group in self.store.traverse_groups(GroupStatus::Collecting).await? {
            if !group.ready(now) {
                continue;
            }

            let count = self.store.count_events_in_group(&group.id).await?;
            group.event_count = count;
            group.status = GroupStatus::Pending;

            tracing::debug!(group_id = %group.id, count, "group ready, moved to pending");
            self.store.update_group(&group).await?;

            self.bus.publish(BusEvent::GroupPending {
                group_id: group.id.clone(),
                rule_id: group.rule.id.clone(),
            });
        }
        Ok(())
    }
}

/// Which rules would claim this event right now, with the fingerprint each
/// would assign. Powers the events-test endpoint.
pub struct MatchedRule {
    pub rule: sentra_common::types::Rule,
    pub aggregate_key: String,
}

pub async fn match_test(store: &Store, event: &Event) -> Result<Vec<MatchedRule>> {
    let rules = store.enabled_rules().await?;
    let mut matched = Vec::new();

    for rule in rules {
        let matcher = match EventMatcher::new(rule) {
            Ok(m) => m,
            Err(_) => continue,
        };
        match matcher.matches(event) {
            Ok((true, _)) => {
                let aggregate_key =
                    build_event_finger(&matcher.rule().aggregate_rule, event);
                matched.push(MatchedRule {
                    rule: matcher.rule().clone(),
                    aggregate_key,
                });
            }
            _ => continue,
        }
    }

    Ok(matched)
}
