use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

use sentra_common::types::{
    ActionStatus, Event, EventControl, EventGroup, EventStatus, GroupAction, GroupRule,
    GroupStatus, ReadinessPolicy, Rule, RuleStatus,
};

use crate::event_matcher::EventMatcher;
use crate::fingerprint::{build_event_finger, FINGER_EVAL_FAILED, FINGER_INVALID_RULE};
use crate::trigger_env::{TriggerEnv, TriggerHistory};
use crate::trigger_matcher::TriggerMatcher;

fn sample_event() -> Event {
    let now = Utc::now();
    let mut meta = HashMap::new();
    meta.insert("environment".to_string(), serde_json::json!("dev"));
    meta.insert("server".to_string(), serde_json::json!("192.168.1.1"));

    Event {
        id: "evt-1".into(),
        content: r#"{"log_level": "debug", "message": "request", "context": {"user_id": 123}}"#
            .into(),
        meta,
        tags: vec!["php".into(), "nodejs".into()],
        origin: "Filebeat".into(),
        event_type: "plain".into(),
        control: EventControl::default(),
        status: EventStatus::Pending,
        group_ids: vec![],
        created_at: now,
        updated_at: now,
    }
}

fn rule_with_match(expr: &str) -> Rule {
    let now = Utc::now();
    Rule {
        id: "r1".into(),
        name: "test".into(),
        status: RuleStatus::Enabled,
        match_rule: expr.into(),
        ignore_rule: String::new(),
        aggregate_rule: String::new(),
        readiness: ReadinessPolicy::Delay,
        interval_secs: 60,
        actions: vec![],
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn event_matcher_matches_expressions() {
    let cases: Vec<(&str, bool)> = vec![
        (r#""php" in Tags"#, true),
        (r#""java" in Tags"#, false),
        (r#""nodejs" in Tags or "java" in Tags"#, true),
        (r#""java" not in Tags"#, true),
        (r#"Meta["server"] == "192.168.1.1""#, true),
        (r#"Meta["server"] == "192.168.1.2""#, false),
        (r#"Meta["environment"] != "production""#, true),
        (r#"Meta["environment"] in ["dev", "test"]"#, true),
        (r#"Meta["environment"] not in ["production", "test"]"#, true),
        (r#"Content matches "\"request\"""#, true),
        (r#"JsonGet("context.user_id", "0") == "123""#, true),
        (r#"JsonGet("context.enterprise_id", "0") == "0""#, true),
        (r#"Content startsWith "{""#, true),
        (r#"Content endsWith "XX""#, false),
        (r#"Upper(Meta["environment"]) == "DEV""#, true),
        (r#"Lower(Origin) == "filebeat""#, true),
    ];

    let event = sample_event();
    for (expr, want) in cases {
        let matcher = EventMatcher::new(rule_with_match(expr)).unwrap();
        let (matched, ignored) = matcher.matches(&event).unwrap();
        assert_eq!(matched, want, "expr: {expr}");
        assert!(!ignored, "expr: {expr}");
        assert_eq!(matcher.rule().match_rule, expr);
    }
}

#[test]
fn invalid_match_expression_fails_compilation() {
    assert!(EventMatcher::new(rule_with_match("xxxxxxx")).is_err());
    assert!(EventMatcher::new(rule_with_match(r#"Content matches "[""#)).is_err());
    assert!(EventMatcher::new(rule_with_match("NoSuchFunc(1)")).is_err());
    assert!(EventMatcher::new(rule_with_match("Upper(1, 2)")).is_err());
}

#[test]
fn empty_match_expression_matches_everything() {
    let matcher = EventMatcher::new(rule_with_match("")).unwrap();
    let (matched, ignored) = matcher.matches(&sample_event()).unwrap();
    assert!(matched);
    assert!(!ignored);
}

#[test]
fn ignore_rule_marks_soft_match() {
    let mut rule = rule_with_match(r#"Origin == "Filebeat""#);
    rule.ignore_rule = r#"Meta["environment"] == "dev""#.into();
    let matcher = EventMatcher::new(rule).unwrap();
    let (matched, ignored) = matcher.matches(&sample_event()).unwrap();
    assert!(matched);
    assert!(ignored);
}

#[test]
fn runtime_failure_surfaces_as_error() {
    // `in` over a non-collection is a runtime type error; callers treat it
    // as "no match".
    let matcher = EventMatcher::new(rule_with_match(r#""x" in Content"#)).unwrap();
    assert!(matcher.matches(&sample_event()).is_err());
}

#[test]
fn fingerprint_is_deterministic() {
    let event = sample_event();
    let a = build_event_finger(r#"Meta["server"]"#, &event);
    let b = build_event_finger(r#"Meta["server"]"#, &event);
    assert_eq!(a, "192.168.1.1");
    assert_eq!(a, b);
}

#[test]
fn fingerprint_empty_rule_collapses_to_one_group() {
    assert_eq!(build_event_finger("", &sample_event()), "");
    assert_eq!(build_event_finger("   ", &sample_event()), "");
}

#[test]
fn fingerprint_errors_use_sentinels() {
    let event = sample_event();
    assert_eq!(
        build_event_finger("((broken", &event),
        FINGER_INVALID_RULE
    );
    // Compiles but fails at runtime: ordering a string against an int.
    assert_eq!(
        build_event_finger(r#"Content > 5"#, &event),
        FINGER_EVAL_FAILED
    );
}

// ---- trigger environment ----

struct NoHistory;

impl TriggerHistory for NoHistory {
    fn triggered_times_in_period(
        &self,
        _action_id: &str,
        _minutes: i64,
        _status: &str,
    ) -> Result<i64, String> {
        Ok(0)
    }

    fn last_triggered_group_at(
        &self,
        _action_id: &str,
        _status: &str,
    ) -> Result<Option<DateTime<Utc>>, String> {
        Ok(None)
    }
}

struct FixedHistory(i64);

impl TriggerHistory for FixedHistory {
    fn triggered_times_in_period(
        &self,
        _action_id: &str,
        _minutes: i64,
        _status: &str,
    ) -> Result<i64, String> {
        Ok(self.0)
    }

    fn last_triggered_group_at(
        &self,
        _action_id: &str,
        _status: &str,
    ) -> Result<Option<DateTime<Utc>>, String> {
        Ok(Some(Utc::now()))
    }
}

fn sample_group(event_count: i64) -> EventGroup {
    let now = Utc::now();
    EventGroup {
        id: "grp-1".into(),
        rule: GroupRule {
            id: "r1".into(),
            name: "nginx errors".into(),
            match_rule: String::new(),
            ignore_rule: String::new(),
            aggregate_rule: String::new(),
            readiness: ReadinessPolicy::Delay,
            interval_secs: 60,
            expected_ready_at: now,
        },
        aggregate_key: "web-1".into(),
        event_type: "plain".into(),
        status: GroupStatus::Pending,
        event_count,
        actions: vec![],
        created_at: now,
        updated_at: now,
    }
}

fn group_action(pre_condition: &str) -> GroupAction {
    GroupAction {
        id: "act-1".into(),
        name: "notify ops".into(),
        channel: "dingtalk".into(),
        pre_condition: pre_condition.into(),
        template: String::new(),
        user_refs: vec![],
        meta: HashMap::new(),
        trigger_status: ActionStatus::None,
        triggered_at: None,
    }
}

fn env<'a>(
    group: &'a EventGroup,
    history: &'a dyn TriggerHistory,
) -> TriggerEnv<'a> {
    TriggerEnv::new(group, "act-1", history, Box::new(|| Ok(vec![])))
}

#[test]
fn empty_trigger_condition_always_fires() {
    let group = sample_group(2);
    let matcher = TriggerMatcher::new(group_action("")).unwrap();
    assert!(matcher.matches(&env(&group, &NoHistory)).unwrap());
}

#[test]
fn messages_count_gates_trigger() {
    let group = sample_group(2);
    let matcher = TriggerMatcher::new(group_action("MessagesCount() > 5")).unwrap();
    assert!(!matcher.matches(&env(&group, &NoHistory)).unwrap());

    let group = sample_group(6);
    assert!(matcher.matches(&env(&group, &NoHistory)).unwrap());
}

#[test]
fn triggered_times_in_period_reads_history() {
    let group = sample_group(1);
    let matcher =
        TriggerMatcher::new(group_action(r#"TriggeredTimesInPeriod(30, "failed") < 5"#)).unwrap();
    assert!(matcher.matches(&env(&group, &FixedHistory(3))).unwrap());
    assert!(!matcher.matches(&env(&group, &FixedHistory(9))).unwrap());
}

#[test]
fn daily_time_between_wraps_midnight() {
    let group = sample_group(1);
    let matcher =
        TriggerMatcher::new(group_action(r#"DailyTimeBetween("22:00", "09:00")"#)).unwrap();

    let at = |h: u32| {
        env(&group, &NoHistory).with_now(Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap())
    };

    assert!(matcher.matches(&at(23)).unwrap());
    assert!(!matcher.matches(&at(10)).unwrap());
    assert!(matcher.matches(&at(8)).unwrap());
}

#[test]
fn messages_fetches_once_and_memoizes() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let group = sample_group(3);
    let calls = AtomicUsize::new(0);
    let loader = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![sample_event(), sample_event(), sample_event()])
    };
    let history = NoHistory;
    let env = TriggerEnv::new(&group, "act-1", &history, Box::new(loader));

    let matcher = TriggerMatcher::new(group_action(
        r#"Messages(2)[0] contains "request" and Messages(10)[2] contains "request""#,
    ))
    .unwrap();
    assert!(matcher.matches(&env).unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1, "loader must run exactly once");
}

#[test]
fn trigger_condition_compile_failures_are_errors() {
    assert!(TriggerMatcher::new(group_action("Tags")).is_err());
    assert!(TriggerMatcher::new(group_action("MessagesCount(1)")).is_err());
}
