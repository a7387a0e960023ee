use std::cell::RefCell;

use chrono::{DateTime, NaiveTime, Utc};
use sentra_common::types::{Event, EventGroup};

use crate::expr::{Env, EnvSpec, EvalError, Value};

/// Store-backed lookups available to trigger expressions. Implementations
/// receive ids, never object graphs, so the context stays acyclic.
pub trait TriggerHistory: Send + Sync {
    /// How many groups fired this action with the given trigger status within
    /// the last `minutes` minutes. Empty status counts every firing.
    fn triggered_times_in_period(
        &self,
        action_id: &str,
        minutes: i64,
        status: &str,
    ) -> Result<i64, String>;

    /// `updated_at` of the most recent group that fired this action with the
    /// given status, if any.
    fn last_triggered_group_at(
        &self,
        action_id: &str,
        status: &str,
    ) -> Result<Option<DateTime<Utc>>, String>;
}

/// Lazy fetch of the group's events, realized at most once per evaluation.
pub type EventsLoader<'a> = Box<dyn Fn() -> Result<Vec<Event>, String> + Send + 'a>;

/// Capability record for trigger expressions: the group plus time and
/// history helpers.
pub fn trigger_env_spec() -> EnvSpec {
    EnvSpec::new()
        .with_func("Now", 0, 0)
        .with_func("ParseTime", 2, 2)
        .with_func("DailyTimeBetween", 2, 2)
        .with_func("TriggeredTimesInPeriod", 2, 2)
        .with_func("LastTriggeredGroupAt", 1, 1)
        .with_func("Messages", 1, 1)
        .with_func("MessagesCount", 0, 0)
        .with_func("RuleName", 0, 0)
        .with_func("AggregateKey", 0, 0)
        .with_func("GroupType", 0, 0)
        .with_func("Upper", 1, 1)
        .with_func("Lower", 1, 1)
}

pub struct TriggerEnv<'a> {
    group: &'a EventGroup,
    action_id: &'a str,
    history: &'a dyn TriggerHistory,
    loader: EventsLoader<'a>,
    fetched: RefCell<Option<Vec<Event>>>,
    now: DateTime<Utc>,
}

impl<'a> TriggerEnv<'a> {
    pub fn new(
        group: &'a EventGroup,
        action_id: &'a str,
        history: &'a dyn TriggerHistory,
        loader: EventsLoader<'a>,
    ) -> Self {
        Self {
            group,
            action_id,
            history,
            loader,
            fetched: RefCell::new(None),
            now: Utc::now(),
        }
    }

    /// Pin `Now()` for tests.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// First call runs the loader; later calls reuse the result.
    fn messages(&self, limit: usize) -> Result<Value, EvalError> {
        let mut cache = self.fetched.borrow_mut();
        if cache.is_none() {
            let events = (self.loader)().map_err(EvalError::Helper)?;
            *cache = Some(events);
        }
        let events = cache.as_ref().unwrap();
        Ok(Value::Array(
            events
                .iter()
                .take(limit)
                .map(|e| Value::Str(e.content.clone()))
                .collect(),
        ))
    }

    fn daily_time_between(start: &str, end: &str, now: DateTime<Utc>) -> Result<bool, EvalError> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .map_err(|e| EvalError::Helper(format!("bad time of day `{s}`: {e}")))
        };
        let start = parse(start)?;
        let end = parse(end)?;
        let current = now.time();

        // An end before the start wraps past midnight (22:00-09:00).
        if start <= end {
            Ok(current >= start && current <= end)
        } else {
            Ok(current >= start || current <= end)
        }
    }
}

impl Env for TriggerEnv<'_> {
    fn var(&self, name: &str) -> Result<Value, EvalError> {
        Err(EvalError::Helper(format!("unknown variable `{name}`")))
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            "Now" => Ok(Value::Time(self.now)),
            "ParseTime" => {
                let layout = args[0].to_display_string();
                let value = args[1].to_display_string();
                match chrono::NaiveDateTime::parse_from_str(&value, &layout) {
                    Ok(dt) => Ok(Value::Time(dt.and_utc())),
                    // Mirror the permissive contract: a bad value reads as
                    // the zero time rather than failing the whole rule.
                    Err(_) => Ok(Value::Time(DateTime::UNIX_EPOCH)),
                }
            }
            "DailyTimeBetween" => {
                let start = args[0].to_display_string();
                let end = args[1].to_display_string();
                Self::daily_time_between(&start, &end, self.now).map(Value::Bool)
            }
            "TriggeredTimesInPeriod" => {
                let minutes = match &args[0] {
                    Value::Int(n) => *n,
                    other => {
                        return Err(EvalError::TypeMismatch(format!(
                            "TriggeredTimesInPeriod wants minutes as int, got {}",
                            other.type_name()
                        )))
                    }
                };
                let status = args[1].to_display_string();
                self.history
                    .triggered_times_in_period(self.action_id, minutes, &status)
                    .map(Value::Int)
                    .map_err(EvalError::Helper)
            }
            "LastTriggeredGroupAt" => {
                let status = args[0].to_display_string();
                let at = self
                    .history
                    .last_triggered_group_at(self.action_id, &status)
                    .map_err(EvalError::Helper)?;
                Ok(Value::Time(at.unwrap_or(DateTime::UNIX_EPOCH)))
            }
            "Messages" => {
                let limit = match &args[0] {
                    Value::Int(n) if *n >= 0 => *n as usize,
                    Value::Int(_) => 0,
                    other => {
                        return Err(EvalError::TypeMismatch(format!(
                            "Messages wants a count, got {}",
                            other.type_name()
                        )))
                    }
                };
                self.messages(limit)
            }
            "MessagesCount" => Ok(Value::Int(self.group.event_count)),
            "RuleName" => Ok(Value::Str(self.group.rule.name.clone())),
            "AggregateKey" => Ok(Value::Str(self.group.aggregate_key.clone())),
            "GroupType" => Ok(Value::Str(self.group.event_type.clone())),
            "Upper" => Ok(Value::Str(args[0].to_display_string().to_uppercase())),
            "Lower" => Ok(Value::Str(args[0].to_display_string().to_lowercase())),
            other => Err(EvalError::Helper(format!("unknown function `{other}`"))),
        }
    }
}
