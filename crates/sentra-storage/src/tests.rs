use chrono::{Duration, Utc};
use std::collections::HashMap;
use tempfile::TempDir;

use sentra_common::types::{
    CommonEvent, EventStatus, GroupAction, GroupRule, GroupStatus, QueueJobStatus, ReadinessPolicy,
    Recovery,
};

use crate::{Store, StorageError};

async fn setup() -> (TempDir, Store) {
    sentra_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("sentra.db").to_str().unwrap()
    );
    let store = Store::connect(&url).await.unwrap();
    (dir, store)
}

fn make_event(content: &str, origin: &str) -> sentra_common::types::Event {
    let mut meta = HashMap::new();
    meta.insert("server".to_string(), serde_json::json!("a"));
    CommonEvent {
        content: content.to_string(),
        meta,
        tags: vec!["io".into()],
        origin: origin.to_string(),
        event_type: None,
        control: Default::default(),
    }
    .into_event(Utc::now())
}

fn make_group_rule(rule_id: &str) -> GroupRule {
    let now = Utc::now();
    GroupRule {
        id: rule_id.to_string(),
        name: "test rule".into(),
        match_rule: String::new(),
        ignore_rule: String::new(),
        aggregate_rule: String::new(),
        readiness: ReadinessPolicy::Delay,
        interval_secs: 60,
        expected_ready_at: now + Duration::seconds(60),
    }
}

#[tokio::test]
async fn event_insert_update_traverse() {
    let (_dir, store) = setup().await;

    let mut evt = make_event("disk full", "logstash");
    store.insert_event(&evt).await.unwrap();

    let pending = store.traverse_events(EventStatus::Pending).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].content, "disk full");
    assert_eq!(pending[0].meta["server"], serde_json::json!("a"));

    evt.status = EventStatus::Grouped;
    evt.group_ids.push("grp-1".into());
    store.update_event(&evt).await.unwrap();

    assert!(store
        .traverse_events(EventStatus::Pending)
        .await
        .unwrap()
        .is_empty());
    let got = store.get_event(&evt.id).await.unwrap().unwrap();
    assert_eq!(got.status, EventStatus::Grouped);
    assert_eq!(got.group_ids, vec!["grp-1".to_string()]);
    assert_eq!(store.count_events_in_group("grp-1").await.unwrap(), 1);
}

#[tokio::test]
async fn collecting_group_find_or_insert_is_stable() {
    let (_dir, store) = setup().await;
    let rule = make_group_rule("r1");

    let g1 = store
        .collecting_group(&rule, "web-1", "plain", &[])
        .await
        .unwrap();
    let g2 = store
        .collecting_group(&rule, "web-1", "plain", &[])
        .await
        .unwrap();
    assert_eq!(g1.id, g2.id, "same triple must reuse the collecting group");

    // A different aggregate key opens its own group.
    let g3 = store
        .collecting_group(&rule, "web-2", "plain", &[])
        .await
        .unwrap();
    assert_ne!(g1.id, g3.id);

    // Once the group leaves `collecting`, the triple opens a fresh one.
    let mut done = g1.clone();
    done.status = GroupStatus::Pending;
    store.update_group(&done).await.unwrap();

    let g4 = store
        .collecting_group(&rule, "web-1", "plain", &[])
        .await
        .unwrap();
    assert_ne!(g1.id, g4.id);
    assert_eq!(
        store
            .count_groups(Some(GroupStatus::Collecting), Some("r1"))
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn group_round_trips_rule_snapshot_and_actions() {
    let (_dir, store) = setup().await;
    let rule = make_group_rule("r1");
    let actions = vec![GroupAction {
        id: "act-1".into(),
        name: "notify".into(),
        channel: "dingtalk".into(),
        pre_condition: "MessagesCount() > 5".into(),
        template: String::new(),
        user_refs: vec!["u1".into()],
        meta: HashMap::new(),
        trigger_status: Default::default(),
        triggered_at: None,
    }];

    let grp = store
        .collecting_group(&rule, "k", "plain", &actions)
        .await
        .unwrap();
    let got = store.get_group(&grp.id).await.unwrap().unwrap();
    assert_eq!(got.rule.id, "r1");
    assert_eq!(got.rule.interval_secs, 60);
    assert_eq!(got.actions.len(), 1);
    assert_eq!(got.actions[0].pre_condition, "MessagesCount() > 5");
    assert_eq!(got.status, GroupStatus::Collecting);
}

#[tokio::test]
async fn lease_protocol_acquire_renew_steal() {
    let (_dir, store) = setup().await;

    // A acquires.
    let lease_a = store.acquire_lock("crontab-lock", "node-a", 90).await.unwrap();
    assert!(lease_a.expires_at > Utc::now());

    // B cannot.
    match store.acquire_lock("crontab-lock", "node-b", 90).await {
        Err(StorageError::AlreadyLocked) => {}
        other => panic!("expected AlreadyLocked, got {other:?}"),
    }

    // A renews fine.
    store.renew_lock(&lease_a.lock_id, 90).await.unwrap();

    // A crashes: simulate expiry by shrinking the lease to the past.
    store.renew_lock(&lease_a.lock_id, -1).await.unwrap();

    // B steals the expired lease.
    let lease_b = store.acquire_lock("crontab-lock", "node-b", 90).await.unwrap();
    assert_ne!(lease_a.lock_id, lease_b.lock_id);
    assert_eq!(lease_b.owner, "node-b");

    // A's renew now reports the lease gone.
    match store.renew_lock(&lease_a.lock_id, 90).await {
        Err(StorageError::LockNotFound) => {}
        other => panic!("expected LockNotFound, got {other:?}"),
    }

    // B releases; the resource is free again.
    store.release_lock(&lease_b.lock_id).await.unwrap();
    store.acquire_lock("crontab-lock", "node-c", 90).await.unwrap();
}

#[tokio::test]
async fn queue_claim_is_exclusive_and_retry_requeues() {
    let (_dir, store) = setup().await;
    let now = Utc::now();

    let job = store.enqueue_job("dingtalk", "{}", now).await.unwrap();

    let due = store.due_queue_jobs(now, 10).await.unwrap();
    assert_eq!(due.len(), 1);

    assert!(store.claim_queue_job(&job.id).await.unwrap());
    assert!(
        !store.claim_queue_job(&job.id).await.unwrap(),
        "second claim must lose"
    );

    // Failure path: requeue with backoff, then give up.
    store
        .retry_queue_job(&job.id, 1, now + Duration::seconds(60))
        .await
        .unwrap();
    assert!(
        store.due_queue_jobs(now, 10).await.unwrap().is_empty(),
        "backoff must defer the job"
    );
    let due_later = store
        .due_queue_jobs(now + Duration::seconds(61), 10)
        .await
        .unwrap();
    assert_eq!(due_later.len(), 1);
    assert_eq!(due_later[0].retry_count, 1);

    store
        .finish_queue_job(&job.id, QueueJobStatus::Failed)
        .await
        .unwrap();
    assert_eq!(
        store
            .count_queue_jobs(Some(QueueJobStatus::Failed))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn recovery_marker_refresh_and_due() {
    let (_dir, store) = setup().await;
    let now = Utc::now();

    let marker = Recovery {
        dedup_id: "X".into(),
        rule_id: "r1".into(),
        group_id: "g1".into(),
        origin: "logstash".into(),
        recovery_after_secs: 300,
        last_seen_at: now,
        created_at: now,
        updated_at: now,
    };
    store.upsert_recovery(&marker).await.unwrap();

    // Quiet for less than the interval: not due.
    assert!(store
        .due_recoveries(now + Duration::seconds(200))
        .await
        .unwrap()
        .is_empty());

    // A fresh sighting pushes the deadline out.
    store
        .touch_recovery("X", now + Duration::seconds(250))
        .await
        .unwrap();
    assert!(store
        .due_recoveries(now + Duration::seconds(400))
        .await
        .unwrap()
        .is_empty());

    // Full silence after the last sighting: due.
    let due = store
        .due_recoveries(now + Duration::seconds(551))
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].dedup_id, "X");

    store.delete_recovery("X").await.unwrap();
    assert!(store.list_recoveries(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn inhibit_bookkeeping() {
    let (_dir, store) = setup().await;
    let now = Utc::now();

    assert!(store.last_fired("X").await.unwrap().is_none());
    store.mark_fired("X", now).await.unwrap();
    let at = store.last_fired("X").await.unwrap().unwrap();
    assert!((at - now).num_seconds().abs() < 2);

    store.mark_fired("X", now + Duration::seconds(30)).await.unwrap();
    let at = store.last_fired("X").await.unwrap().unwrap();
    assert!(at > now);

    let pruned = store
        .prune_inhibits(now + Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(pruned, 1);
    assert!(store.last_fired("X").await.unwrap().is_none());
}

#[tokio::test]
async fn users_and_robots_round_trip() {
    let (_dir, store) = setup().await;

    let user = crate::UserRow {
        id: sentra_common::id::next_id(),
        name: "ops".into(),
        email: "ops@example.com".into(),
        phone: "".into(),
        role: "admin".into(),
        status: String::new(),
        metas: vec![crate::store::user::UserMeta {
            key: "webhook".into(),
            value: "https://hooks.example.com/ops".into(),
        }],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.insert_user(&user).await.unwrap();

    let found = store
        .find_users_by_ids(&[user.id.clone(), "missing".into()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].email, "ops@example.com");
    assert_eq!(found[0].status, "enabled", "blank status defaults on insert");
    assert_eq!(found[0].metas[0].key, "webhook");

    let robot = store.insert_robot("oncall", "tok-123", "sec-456").await.unwrap();
    let got = store.get_robot(&robot.id).await.unwrap().unwrap();
    assert_eq!(got.token, "tok-123");
    assert_eq!(got.secret, "sec-456");
}

#[tokio::test]
async fn template_seeding_is_insert_if_absent() {
    let (_dir, store) = setup().await;

    assert!(store
        .insert_template_if_absent("by origin", "origin check", r#"Origin == "logstash""#, crate::TEMPLATE_TYPE_MATCH_RULE)
        .await
        .unwrap());
    // Same name again: kept, not overwritten.
    assert!(!store
        .insert_template_if_absent("by origin", "changed", "Origin != \"x\"", crate::TEMPLATE_TYPE_MATCH_RULE)
        .await
        .unwrap());

    let all = store
        .list_templates(Some(crate::TEMPLATE_TYPE_MATCH_RULE), 10, 0)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].description, "origin check");
    assert!(store
        .list_templates(Some(crate::TEMPLATE_TYPE_TRIGGER_RULE), 10, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn action_fire_history_counts_by_status() {
    let (_dir, store) = setup().await;
    let rule = make_group_rule("r1");
    let mut actions = vec![GroupAction {
        id: "act-9".into(),
        name: String::new(),
        channel: "webhook".into(),
        pre_condition: String::new(),
        template: String::new(),
        user_refs: vec![],
        meta: HashMap::new(),
        trigger_status: Default::default(),
        triggered_at: None,
    }];

    let mut grp = store
        .collecting_group(&rule, "k", "plain", &actions)
        .await
        .unwrap();

    actions[0].trigger_status = sentra_common::types::ActionStatus::Ok;
    grp.actions = actions.clone();
    grp.status = GroupStatus::Okay;
    store.update_group(&grp).await.unwrap();

    let since = Utc::now() - Duration::minutes(30);
    assert_eq!(
        store.count_action_fires_since("act-9", since, "ok").await.unwrap(),
        1
    );
    assert_eq!(
        store
            .count_action_fires_since("act-9", since, "failed")
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store.count_action_fires_since("act-9", since, "").await.unwrap(),
        1
    );
    assert!(store
        .last_action_fire_at("act-9", "ok")
        .await
        .unwrap()
        .is_some());
    assert!(store
        .last_action_fire_at("act-9", "failed")
        .await
        .unwrap()
        .is_none());
}
