use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordinary event pushed by an upstream.
pub const EVENT_TYPE_PLAIN: &str = "plain";
/// Synthetic event emitted by the recovery tracker after a quiet interval.
pub const EVENT_TYPE_RECOVERY: &str = "recovery";

/// Sender-supplied control block. All fields optional; `id` is the
/// deduplication key that inhibit and recovery tracking hang off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventControl {
    #[serde(default)]
    pub id: String,
    /// Duration string ("30s", "5m"). Within this window a second firing
    /// for the same control id is suppressed at dispatch time.
    #[serde(default)]
    pub inhibit_interval: String,
    /// Duration string. A recovery event is synthesized after this much
    /// silence for the control id.
    #[serde(default)]
    pub recovery_after: String,
}

impl EventControl {
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Grouped,
    Canceled,
    Ignored,
    Expired,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventStatus::Pending => write!(f, "pending"),
            EventStatus::Grouped => write!(f, "grouped"),
            EventStatus::Canceled => write!(f, "canceled"),
            EventStatus::Ignored => write!(f, "ignored"),
            EventStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "grouped" => Ok(EventStatus::Grouped),
            "canceled" => Ok(EventStatus::Canceled),
            "ignored" => Ok(EventStatus::Ignored),
            "expired" => Ok(EventStatus::Expired),
            _ => Err(format!("unknown event status: {s}")),
        }
    }
}

/// A single raw alert observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub origin: String,
    #[serde(rename = "type", default = "default_event_type")]
    pub event_type: String,
    #[serde(default)]
    pub control: EventControl,
    pub status: EventStatus,
    #[serde(default)]
    pub group_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_event_type() -> String {
    EVENT_TYPE_PLAIN.to_string()
}

/// Wire shape exchanged with upstreams and edge agents: an [`Event`] before
/// the server assigns id/status/timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommonEvent {
    pub content: String,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub origin: String,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub control: EventControl,
}

impl CommonEvent {
    /// Promote to a stored event with a fresh id, `pending` status and
    /// server-side timestamps.
    pub fn into_event(self, now: DateTime<Utc>) -> Event {
        Event {
            id: crate::id::next_id(),
            content: self.content,
            meta: self.meta,
            tags: self.tags,
            origin: self.origin,
            event_type: self
                .event_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_event_type),
            control: self.control,
            status: EventStatus::Pending,
            group_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Enabled,
    Disabled,
}

/// How a collecting group's `expected_ready_at` is derived at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessPolicy {
    /// created-at + interval.
    Delay,
    /// Next wall-clock multiple of the interval.
    Aligned,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        ReadinessPolicy::Delay
    }
}

/// One notification hook inside a rule, gated by its own trigger expression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Channel type name registered in the notify plugin registry.
    pub channel: String,
    /// Trigger expression over the group; empty means "always fire".
    #[serde(default)]
    pub pre_condition: String,
    /// Report template; empty falls back to the built-in markdown summary.
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub user_refs: Vec<String>,
    /// Channel-specific routing hints (e.g. `robot_id` for DingTalk).
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// A user-authored classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub status: RuleStatus,
    /// Match expression over an event; empty matches everything.
    #[serde(default)]
    pub match_rule: String,
    /// Soft-match expression: a matching event is consumed as `ignored`.
    #[serde(default)]
    pub ignore_rule: String,
    /// Aggregate expression; its string result is the grouping fingerprint.
    #[serde(default)]
    pub aggregate_rule: String,
    #[serde(default)]
    pub readiness: ReadinessPolicy,
    /// Readiness interval in seconds.
    pub interval_secs: i64,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Snapshot this rule into a group, fixing `expected_ready_at` so later
    /// rule edits cannot retroactively change an in-flight group.
    pub fn to_group_rule(&self, now: DateTime<Utc>) -> GroupRule {
        let interval = self.interval_secs.max(0);
        let expected_ready_at = match self.readiness {
            ReadinessPolicy::Delay => now + chrono::Duration::seconds(interval),
            ReadinessPolicy::Aligned => {
                if interval == 0 {
                    now
                } else {
                    let ts = now.timestamp();
                    let next = (ts / interval + 1) * interval;
                    DateTime::from_timestamp(next, 0).unwrap_or(now)
                }
            }
        };

        GroupRule {
            id: self.id.clone(),
            name: self.name.clone(),
            match_rule: self.match_rule.clone(),
            ignore_rule: self.ignore_rule.clone(),
            aggregate_rule: self.aggregate_rule.clone(),
            readiness: self.readiness,
            interval_secs: self.interval_secs,
            expected_ready_at,
        }
    }
}

/// Embedded rule snapshot carried by a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub match_rule: String,
    #[serde(default)]
    pub ignore_rule: String,
    #[serde(default)]
    pub aggregate_rule: String,
    #[serde(default)]
    pub readiness: ReadinessPolicy,
    pub interval_secs: i64,
    pub expected_ready_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Collecting,
    Pending,
    Okay,
    Failed,
    Partial,
    Recovering,
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupStatus::Collecting => write!(f, "collecting"),
            GroupStatus::Pending => write!(f, "pending"),
            GroupStatus::Okay => write!(f, "okay"),
            GroupStatus::Failed => write!(f, "failed"),
            GroupStatus::Partial => write!(f, "partial"),
            GroupStatus::Recovering => write!(f, "recovering"),
        }
    }
}

impl std::str::FromStr for GroupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collecting" => Ok(GroupStatus::Collecting),
            "pending" => Ok(GroupStatus::Pending),
            "okay" => Ok(GroupStatus::Okay),
            "failed" => Ok(GroupStatus::Failed),
            "partial" => Ok(GroupStatus::Partial),
            "recovering" => Ok(GroupStatus::Recovering),
            _ => Err(format!("unknown group status: {s}")),
        }
    }
}

/// Per-action outcome within a group. Monotone:
/// `pending` is stamped at dispatch enqueue and only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "noCondition")]
    NoCondition,
}

impl Default for ActionStatus {
    fn default() -> Self {
        ActionStatus::None
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::None => write!(f, "none"),
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::Ok => write!(f, "ok"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::NoCondition => write!(f, "noCondition"),
        }
    }
}

/// An [`Action`] copied into a group, extended with runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAction {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub channel: String,
    #[serde(default)]
    pub pre_condition: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub user_refs: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub trigger_status: ActionStatus,
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,
}

impl From<Action> for GroupAction {
    fn from(a: Action) -> Self {
        GroupAction {
            id: a.id,
            name: a.name,
            channel: a.channel,
            pre_condition: a.pre_condition,
            template: a.template,
            user_refs: a.user_refs,
            meta: a.meta,
            trigger_status: ActionStatus::None,
            triggered_at: None,
        }
    }
}

/// A bundle of events sharing (rule, aggregate key, event type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventGroup {
    pub id: String,
    pub rule: GroupRule,
    #[serde(default)]
    pub aggregate_key: String,
    #[serde(rename = "type", default = "default_event_type")]
    pub event_type: String,
    pub status: GroupStatus,
    /// Total events observed, including any later cut for storage economy.
    #[serde(default)]
    pub event_count: i64,
    #[serde(default)]
    pub actions: Vec<GroupAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventGroup {
    /// Whether a collecting group has reached its readiness deadline.
    pub fn ready(&self, now: DateTime<Utc>) -> bool {
        self.rule.expected_ready_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueJobStatus {
    Wait,
    Running,
    Failed,
    Succeed,
    Canceled,
}

impl std::fmt::Display for QueueJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueJobStatus::Wait => write!(f, "wait"),
            QueueJobStatus::Running => write!(f, "running"),
            QueueJobStatus::Failed => write!(f, "failed"),
            QueueJobStatus::Succeed => write!(f, "succeed"),
            QueueJobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for QueueJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wait" => Ok(QueueJobStatus::Wait),
            "running" => Ok(QueueJobStatus::Running),
            "failed" => Ok(QueueJobStatus::Failed),
            "succeed" => Ok(QueueJobStatus::Succeed),
            "canceled" => Ok(QueueJobStatus::Canceled),
            _ => Err(format!("unknown queue job status: {s}")),
        }
    }
}

/// One queued unit of delivery work: an action that fired for a group,
/// rendered and addressed, waiting for a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchItem {
    pub group_id: String,
    pub action_id: String,
    pub channel: String,
    /// Rendered report body.
    pub body: String,
    /// Channel-native addresses resolved from the action's user refs.
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Channel routing hints copied from the action.
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// Recovery marker: fires a synthetic recovery event once the control id
/// has been quiet for `recovery_after`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recovery {
    pub dedup_id: String,
    pub rule_id: String,
    pub group_id: String,
    pub origin: String,
    pub recovery_after_secs: i64,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn common_event_round_trips_user_fields() {
        let raw = r#"{"content":"disk full","meta":{"server":"a","n":1},"tags":["io"],"origin":"logstash","control":{"id":"x","inhibit_interval":"5m","recovery_after":""}}"#;
        let evt: CommonEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(evt.content, "disk full");
        assert_eq!(evt.meta["server"], serde_json::json!("a"));
        assert_eq!(evt.control.inhibit_interval, "5m");

        let back = serde_json::to_string(&evt).unwrap();
        let again: CommonEvent = serde_json::from_str(&back).unwrap();
        assert_eq!(again.tags, vec!["io".to_string()]);
        assert_eq!(again.control.id, "x");
    }

    #[test]
    fn into_event_assigns_identity_and_pending_status() {
        let now = Utc::now();
        let evt = CommonEvent {
            content: "hello".into(),
            ..Default::default()
        }
        .into_event(now);
        assert!(!evt.id.is_empty());
        assert_eq!(evt.status, EventStatus::Pending);
        assert_eq!(evt.event_type, EVENT_TYPE_PLAIN);
        assert!(evt.group_ids.is_empty());
        assert_eq!(evt.created_at, now);
    }

    #[test]
    fn delay_readiness_adds_interval() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let rule = sample_rule(ReadinessPolicy::Delay, 60);
        let grp_rule = rule.to_group_rule(now);
        assert_eq!(grp_rule.expected_ready_at, now + chrono::Duration::seconds(60));
    }

    #[test]
    fn aligned_readiness_rounds_up_to_interval_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 7).unwrap();
        let rule = sample_rule(ReadinessPolicy::Aligned, 300);
        let grp_rule = rule.to_group_rule(now);
        assert_eq!(grp_rule.expected_ready_at.timestamp() % 300, 0);
        assert!(grp_rule.expected_ready_at > now);
        assert!(grp_rule.expected_ready_at <= now + chrono::Duration::seconds(300));
    }

    #[test]
    fn action_status_serializes_spec_names() {
        assert_eq!(
            serde_json::to_string(&ActionStatus::NoCondition).unwrap(),
            "\"noCondition\""
        );
        assert_eq!(serde_json::to_string(&ActionStatus::Ok).unwrap(), "\"ok\"");
    }

    fn sample_rule(readiness: ReadinessPolicy, interval_secs: i64) -> Rule {
        let now = Utc::now();
        Rule {
            id: "r1".into(),
            name: "sample".into(),
            status: RuleStatus::Enabled,
            match_rule: String::new(),
            ignore_rule: String::new(),
            aggregate_rule: String::new(),
            readiness,
            interval_secs,
            actions: vec![],
            created_at: now,
            updated_at: now,
        }
    }
}
