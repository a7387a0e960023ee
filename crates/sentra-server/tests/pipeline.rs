//! End-to-end pipeline tests over a real (tempdir) store: classification,
//! readiness, trigger gating, inhibit, and recovery.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use sentra_common::types::{
    Action, CommonEvent, Event, EventControl, EventStatus, GroupStatus, QueueJobStatus,
    ReadinessPolicy, Recovery, Rule, RuleStatus,
};
use sentra_notify::plugin::ChannelRegistry;
use sentra_storage::Store;

use sentra_server::bus::{Bus, BusEvent};
use sentra_server::jobs::aggregation::AggregationJob;
use sentra_server::jobs::lock::DistributeLockManager;
use sentra_server::jobs::recovery::RecoveryJob;
use sentra_server::jobs::trigger::TriggerJob;
use sentra_server::queue::QueueManager;

async fn setup() -> (TempDir, Arc<Store>) {
    sentra_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("sentra.db").to_str().unwrap()
    );
    let store = Arc::new(Store::connect(&url).await.unwrap());
    (dir, store)
}

fn logstash_rule(interval_secs: i64, actions: Vec<Action>) -> Rule {
    let now = Utc::now();
    Rule {
        id: sentra_common::id::next_id(),
        name: format!("logstash-{}", sentra_common::id::next_id()),
        status: RuleStatus::Enabled,
        match_rule: r#"Origin == "logstash""#.into(),
        ignore_rule: String::new(),
        aggregate_rule: r#"Meta["server"]"#.into(),
        readiness: ReadinessPolicy::Delay,
        interval_secs,
        actions,
        created_at: now,
        updated_at: now,
    }
}

fn push_event(server: &str, control: EventControl) -> Event {
    let mut meta = HashMap::new();
    meta.insert("server".to_string(), serde_json::json!(server));
    CommonEvent {
        content: format!("error on {server}"),
        meta,
        tags: vec![],
        origin: "logstash".into(),
        event_type: None,
        control,
    }
    .into_event(Utc::now())
}

fn action(pre_condition: &str) -> Action {
    Action {
        id: sentra_common::id::next_id(),
        name: "notify".into(),
        channel: "webhook".into(),
        pre_condition: pre_condition.into(),
        template: String::new(),
        user_refs: vec![],
        meta: HashMap::new(),
    }
}

fn queue(store: &Arc<Store>) -> Arc<QueueManager> {
    Arc::new(QueueManager::new(
        store.clone(),
        ChannelRegistry::default(),
        3,
        1,
    ))
}

#[tokio::test]
async fn basic_grouping_bundles_matching_events() {
    let (_dir, store) = setup().await;
    store.insert_rule(&logstash_rule(60, vec![])).await.unwrap();

    store.insert_event(&push_event("a", Default::default())).await.unwrap();
    store.insert_event(&push_event("a", Default::default())).await.unwrap();
    // Unmatched origin: must end canceled.
    let mut stray = push_event("a", Default::default());
    stray.origin = "unknown".into();
    store.insert_event(&stray).await.unwrap();

    let job = AggregationJob::new(store.clone(), Bus::new());
    job.run_once().await.unwrap();

    let collecting = store.traverse_groups(GroupStatus::Collecting).await.unwrap();
    assert_eq!(collecting.len(), 1, "same server must share one group");
    let group = &collecting[0];
    assert_eq!(store.count_events_in_group(&group.id).await.unwrap(), 2);

    let grouped = store.traverse_events(EventStatus::Grouped).await.unwrap();
    assert_eq!(grouped.len(), 2);
    for event in &grouped {
        assert!(event.group_ids.contains(&group.id));
    }

    let canceled = store.traverse_events(EventStatus::Canceled).await.unwrap();
    assert_eq!(canceled.len(), 1);
    assert_eq!(canceled[0].id, stray.id);
    assert!(store.traverse_events(EventStatus::Pending).await.unwrap().is_empty());
}

#[tokio::test]
async fn different_fingerprints_open_separate_groups() {
    let (_dir, store) = setup().await;
    store.insert_rule(&logstash_rule(60, vec![])).await.unwrap();

    store.insert_event(&push_event("a", Default::default())).await.unwrap();
    store.insert_event(&push_event("b", Default::default())).await.unwrap();

    let job = AggregationJob::new(store.clone(), Bus::new());
    job.run_once().await.unwrap();

    let collecting = store.traverse_groups(GroupStatus::Collecting).await.unwrap();
    assert_eq!(collecting.len(), 2);
    let keys: Vec<&str> = collecting.iter().map(|g| g.aggregate_key.as_str()).collect();
    assert!(keys.contains(&"a"));
    assert!(keys.contains(&"b"));
}

#[tokio::test]
async fn ready_group_moves_to_pending_and_publishes() {
    let (_dir, store) = setup().await;
    // Zero readiness interval: ready on the very next pass.
    store.insert_rule(&logstash_rule(0, vec![])).await.unwrap();
    store.insert_event(&push_event("a", Default::default())).await.unwrap();
    store.insert_event(&push_event("a", Default::default())).await.unwrap();

    let bus = Bus::new();
    let mut rx = bus.subscribe();
    let job = AggregationJob::new(store.clone(), bus);
    job.run_once().await.unwrap();

    let pending = store.traverse_groups(GroupStatus::Pending).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_count, 2, "count stamped at transition");

    match rx.try_recv() {
        Ok(BusEvent::GroupPending { group_id, .. }) => assert_eq!(group_id, pending[0].id),
        other => panic!("expected GroupPending on the bus, got {other:?}"),
    }
}

#[tokio::test]
async fn aggregation_is_idempotent() {
    let (_dir, store) = setup().await;
    store.insert_rule(&logstash_rule(60, vec![])).await.unwrap();
    store.insert_event(&push_event("a", Default::default())).await.unwrap();
    store.insert_event(&push_event("b", Default::default())).await.unwrap();
    let mut stray = push_event("c", Default::default());
    stray.origin = "unknown".into();
    store.insert_event(&stray).await.unwrap();

    let job = AggregationJob::new(store.clone(), Bus::new());
    job.run_once().await.unwrap();

    let events_after_first = snapshot_events(&store).await;
    let groups_after_first = snapshot_groups(&store).await;

    job.run_once().await.unwrap();

    assert_eq!(snapshot_events(&store).await, events_after_first);
    assert_eq!(snapshot_groups(&store).await, groups_after_first);
}

async fn snapshot_events(store: &Store) -> Vec<(String, String, Vec<String>)> {
    let mut all = Vec::new();
    for status in [
        EventStatus::Pending,
        EventStatus::Grouped,
        EventStatus::Canceled,
        EventStatus::Ignored,
        EventStatus::Expired,
    ] {
        for e in store.traverse_events(status).await.unwrap() {
            all.push((e.id, e.status.to_string(), e.group_ids));
        }
    }
    all.sort();
    all
}

async fn snapshot_groups(store: &Store) -> Vec<(String, String, i64)> {
    let mut all = Vec::new();
    for status in [
        GroupStatus::Collecting,
        GroupStatus::Pending,
        GroupStatus::Okay,
        GroupStatus::Failed,
        GroupStatus::Partial,
    ] {
        for g in store.traverse_groups(status).await.unwrap() {
            all.push((g.id, g.status.to_string(), g.event_count));
        }
    }
    all.sort();
    all
}

#[tokio::test]
async fn canceled_event_expires_once_a_rule_appears() {
    let (_dir, store) = setup().await;

    // No rules yet: the event is rejected.
    store.insert_event(&push_event("a", Default::default())).await.unwrap();
    let job = AggregationJob::new(store.clone(), Bus::new());
    job.run_once().await.unwrap();
    assert_eq!(store.traverse_events(EventStatus::Canceled).await.unwrap().len(), 1);

    // Operator adds a matching rule afterwards.
    store.insert_rule(&logstash_rule(60, vec![])).await.unwrap();
    job.run_once().await.unwrap();

    let expired = store.traverse_events(EventStatus::Expired).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert!(store.traverse_events(EventStatus::Canceled).await.unwrap().is_empty());
}

#[tokio::test]
async fn ignore_rule_consumes_event_without_grouping() {
    let (_dir, store) = setup().await;
    let mut rule = logstash_rule(60, vec![]);
    rule.ignore_rule = r#"Meta["server"] == "a""#.into();
    store.insert_rule(&rule).await.unwrap();

    store.insert_event(&push_event("a", Default::default())).await.unwrap();

    let job = AggregationJob::new(store.clone(), Bus::new());
    job.run_once().await.unwrap();

    assert_eq!(store.traverse_events(EventStatus::Ignored).await.unwrap().len(), 1);
    assert!(store.traverse_groups(GroupStatus::Collecting).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn trigger_gate_records_no_condition_without_dispatch() {
    let (_dir, store) = setup().await;
    store
        .insert_rule(&logstash_rule(0, vec![action("MessagesCount() > 5")]))
        .await
        .unwrap();
    store.insert_event(&push_event("a", Default::default())).await.unwrap();
    store.insert_event(&push_event("a", Default::default())).await.unwrap();

    AggregationJob::new(store.clone(), Bus::new())
        .run_once()
        .await
        .unwrap();

    let trigger = TriggerJob::new(store.clone(), queue(&store), String::new());
    trigger.handle().await;

    let failed = store.traverse_groups(GroupStatus::Failed).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].actions[0].trigger_status,
        sentra_common::types::ActionStatus::NoCondition
    );
    assert_eq!(store.count_queue_jobs(None).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn firing_action_enqueues_dispatch_item() {
    let (_dir, store) = setup().await;
    store
        .insert_rule(&logstash_rule(0, vec![action("MessagesCount() >= 2")]))
        .await
        .unwrap();
    store.insert_event(&push_event("a", Default::default())).await.unwrap();
    store.insert_event(&push_event("a", Default::default())).await.unwrap();

    AggregationJob::new(store.clone(), Bus::new())
        .run_once()
        .await
        .unwrap();

    let trigger = TriggerJob::new(store.clone(), queue(&store), String::new());
    trigger.handle().await;

    assert_eq!(
        store.count_queue_jobs(Some(QueueJobStatus::Wait)).await.unwrap(),
        1
    );
    let okay = store.traverse_groups(GroupStatus::Okay).await.unwrap();
    assert_eq!(okay.len(), 1);
    assert_eq!(
        okay[0].actions[0].trigger_status,
        sentra_common::types::ActionStatus::Pending
    );

    let jobs = store.paginate_queue_jobs(None, 10, 0).await.unwrap();
    let item: sentra_common::types::DispatchItem =
        serde_json::from_str(&jobs[0].payload).unwrap();
    assert_eq!(item.group_id, okay[0].id);
    assert!(item.body.contains("error on a"));
}

#[tokio::test(flavor = "multi_thread")]
async fn inhibit_interval_suppresses_repeat_dispatch() {
    let (_dir, store) = setup().await;
    let ctl = EventControl {
        id: "X".into(),
        inhibit_interval: "5m".into(),
        recovery_after: String::new(),
    };
    store
        .insert_rule(&logstash_rule(0, vec![action("")]))
        .await
        .unwrap();

    let aggregation = AggregationJob::new(store.clone(), Bus::new());
    let trigger = TriggerJob::new(store.clone(), queue(&store), String::new());

    // First incident fires and records the dedup id.
    store.insert_event(&push_event("a", ctl.clone())).await.unwrap();
    aggregation.run_once().await.unwrap();
    trigger.handle().await;
    assert_eq!(store.count_queue_jobs(None).await.unwrap(), 1);
    assert!(store.last_fired("X").await.unwrap().is_some());

    // Second incident with the same dedup id inside the window: no new
    // dispatch, but the action is considered handled.
    store.insert_event(&push_event("a", ctl)).await.unwrap();
    aggregation.run_once().await.unwrap();
    trigger.handle().await;

    assert_eq!(store.count_queue_jobs(None).await.unwrap(), 1);
    let okay = store.traverse_groups(GroupStatus::Okay).await.unwrap();
    assert_eq!(okay.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn recovery_marker_seeds_and_synthesizes_after_silence() {
    let (_dir, store) = setup().await;
    let ctl = EventControl {
        id: "X".into(),
        inhibit_interval: String::new(),
        recovery_after: "5m".into(),
    };
    store
        .insert_rule(&logstash_rule(0, vec![action("")]))
        .await
        .unwrap();
    store.insert_event(&push_event("a", ctl)).await.unwrap();

    let aggregation = AggregationJob::new(store.clone(), Bus::new());
    aggregation.run_once().await.unwrap();
    TriggerJob::new(store.clone(), queue(&store), String::new())
        .handle()
        .await;

    // The fire seeded a marker for the dedup id.
    let markers = store.list_recoveries(10, 0).await.unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].dedup_id, "X");
    assert_eq!(markers[0].recovery_after_secs, 300);

    // Simulate six minutes of silence.
    let past = Utc::now() - Duration::seconds(360);
    store
        .upsert_recovery(&Recovery {
            last_seen_at: past,
            ..markers[0].clone()
        })
        .await
        .unwrap();

    RecoveryJob::new(store.clone()).sweep().await.unwrap();

    let pending = store.traverse_events(EventStatus::Pending).await.unwrap();
    assert_eq!(pending.len(), 1);
    let synthetic = &pending[0];
    assert_eq!(synthetic.event_type, "recovery");
    assert_eq!(synthetic.meta["recovery"], serde_json::json!(true));
    assert_eq!(synthetic.control.id, "X");
    assert!(store.list_recoveries(10, 0).await.unwrap().is_empty());

    // The synthetic event re-enters aggregation and matches the same rule.
    aggregation.run_once().await.unwrap();
    let got = store.get_event(&synthetic.id).await.unwrap().unwrap();
    assert_eq!(got.status, EventStatus::Grouped);
}

#[tokio::test(flavor = "multi_thread")]
async fn non_matching_event_does_not_refresh_recovery_marker() {
    let (_dir, store) = setup().await;
    let ctl = EventControl {
        id: "X".into(),
        inhibit_interval: String::new(),
        recovery_after: "5m".into(),
    };
    store
        .insert_rule(&logstash_rule(0, vec![action("")]))
        .await
        .unwrap();
    store.insert_event(&push_event("a", ctl.clone())).await.unwrap();

    let aggregation = AggregationJob::new(store.clone(), Bus::new());
    aggregation.run_once().await.unwrap();
    TriggerJob::new(store.clone(), queue(&store), String::new())
        .handle()
        .await;

    // Six minutes of silence have elapsed.
    let markers = store.list_recoveries(10, 0).await.unwrap();
    assert_eq!(markers.len(), 1);
    let past = Utc::now() - Duration::seconds(360);
    store
        .upsert_recovery(&Recovery {
            last_seen_at: past,
            ..markers[0].clone()
        })
        .await
        .unwrap();

    // An unrelated event shares the dedup id but matches no rule: it ends
    // up canceled and must not push the recovery deadline out.
    let mut stray = push_event("a", ctl);
    stray.origin = "unknown".into();
    store.insert_event(&stray).await.unwrap();
    aggregation.run_once().await.unwrap();
    assert_eq!(
        store.get_event(&stray.id).await.unwrap().unwrap().status,
        EventStatus::Canceled
    );
    let marker = &store.list_recoveries(10, 0).await.unwrap()[0];
    assert_eq!(
        marker.last_seen_at.timestamp(),
        past.timestamp(),
        "canceled event must not refresh last_seen_at"
    );

    // The recovery still fires on schedule.
    RecoveryJob::new(store.clone()).sweep().await.unwrap();
    let pending = store.traverse_events(EventStatus::Pending).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_type, "recovery");
    assert_eq!(pending[0].control.id, "X");
    assert!(store.list_recoveries(10, 0).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_recovery_after_creates_no_marker() {
    let (_dir, store) = setup().await;
    store
        .insert_rule(&logstash_rule(0, vec![action("")]))
        .await
        .unwrap();
    store
        .insert_event(&push_event(
            "a",
            EventControl {
                id: "X".into(),
                inhibit_interval: String::new(),
                recovery_after: "0s".into(),
            },
        ))
        .await
        .unwrap();

    let aggregation = AggregationJob::new(store.clone(), Bus::new());
    aggregation.run_once().await.unwrap();

    TriggerJob::new(store.clone(), queue(&store), String::new())
        .handle()
        .await;

    assert!(store.list_recoveries(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn lock_manager_elects_single_leader() {
    let (_dir, store) = setup().await;

    let a = DistributeLockManager::new(store.clone(), "node-a".into());
    let b = DistributeLockManager::new(store.clone(), "node-b".into());

    a.try_lock().await.unwrap();
    assert!(a.has_lock());

    b.try_lock().await.unwrap();
    assert!(!b.has_lock(), "second node must stay follower");

    // Graceful handover.
    a.try_unlock().await.unwrap();
    assert!(!a.has_lock());

    b.try_lock().await.unwrap();
    assert!(b.has_lock());
}
