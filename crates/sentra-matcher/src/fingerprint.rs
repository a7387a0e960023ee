use sentra_common::types::Event;

use crate::event_env::{event_env_spec, EventEnv};
use crate::expr::{EvalError, ExprError, Program};

/// Fingerprint for an uncompilable aggregate expression. The prefix keeps
/// degenerate groups visible to operators while still collapsing them.
pub const FINGER_INVALID_RULE: &str = "[error]invalid_rule";
/// Fingerprint for an aggregate expression that failed at evaluation time.
pub const FINGER_EVAL_FAILED: &str = "[error]eval_failed";

/// Compiled aggregate expression deriving a grouping key from an event.
pub struct EventFinger {
    program: Program,
}

impl EventFinger {
    pub fn new(aggregate_rule: &str) -> Result<Self, ExprError> {
        let program = Program::compile(aggregate_rule, &event_env_spec())?;
        Ok(Self { program })
    }

    pub fn run(&self, event: &Event) -> Result<String, EvalError> {
        self.program.run_string(&EventEnv::new(event))
    }
}

/// Derive the aggregate key for an event under a rule's aggregate
/// expression. Never fails: an empty expression collapses everything into
/// one group, and errors map to `[error]` sentinels.
pub fn build_event_finger(aggregate_rule: &str, event: &Event) -> String {
    if aggregate_rule.trim().is_empty() {
        return String::new();
    }

    let finger = match EventFinger::new(aggregate_rule) {
        Ok(f) => f,
        Err(err) => {
            tracing::error!(rule = aggregate_rule, error = %err, "parse aggregate rule failed");
            return FINGER_INVALID_RULE.to_string();
        }
    };

    match finger.run(event) {
        Ok(key) => key,
        Err(err) => {
            tracing::error!(rule = aggregate_rule, error = %err, "aggregate rule evaluation failed");
            FINGER_EVAL_FAILED.to_string()
        }
    }
}
