use chrono::Utc;

use sentra_common::types::{
    CommonEvent, EventGroup, GroupRule, GroupStatus, ReadinessPolicy,
};

use crate::plugin::ChannelRegistry;
use crate::render::{render, render_title, RenderContext};

fn sample_group() -> EventGroup {
    let now = Utc::now();
    EventGroup {
        id: "42".into(),
        rule: GroupRule {
            id: "r1".into(),
            name: "nginx 5xx".into(),
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
        event_count: 3,
        actions: vec![],
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn default_registry_has_builtin_channels() {
    let registry = ChannelRegistry::default();
    assert!(registry.has_plugin("dingtalk"));
    assert!(registry.has_plugin("email"));
    assert!(registry.has_plugin("webhook"));
    assert!(!registry.has_plugin("pager"));
}

#[test]
fn registry_rejects_bad_config() {
    let registry = ChannelRegistry::default();
    // dingtalk requires a token.
    assert!(registry
        .create_channel("dingtalk", &serde_json::json!({}))
        .is_err());
    assert!(registry
        .create_channel("dingtalk", &serde_json::json!({"token": "abc"}))
        .is_ok());
}

#[test]
fn template_placeholders_substitute() {
    let group = sample_group();
    let events = vec![CommonEvent {
        content: "upstream timed out".into(),
        ..Default::default()
    }
    .into_event(Utc::now())];
    let ctx = RenderContext {
        group: &group,
        events: &events,
        preview_url: "https://alerts.example.com/groups/{id}",
    };

    let out = render(
        "{{rule_name}} on {{aggregate_key}}: {{event_count}} events\n{{messages}}\n{{preview_url}}",
        &ctx,
    );
    assert!(out.contains("nginx 5xx on web-1: 3 events"));
    assert!(out.contains("- upstream timed out"));
    assert!(out.contains("https://alerts.example.com/groups/42"));
}

#[test]
fn empty_template_renders_default_summary() {
    let group = sample_group();
    let ctx = RenderContext {
        group: &group,
        events: &[],
        preview_url: "",
    };

    let out = render("", &ctx);
    assert!(out.contains("nginx 5xx"));
    assert!(out.contains("**Events**: 3"));
    assert!(!out.contains("[view group]"));
}

#[test]
fn title_includes_key_and_count() {
    let title = render_title(&sample_group());
    assert_eq!(title, "[sentra] nginx 5xx [web-1] (3 events)");
}
