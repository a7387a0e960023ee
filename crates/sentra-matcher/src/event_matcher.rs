use sentra_common::types::{Event, Rule};

use crate::event_env::{event_env_spec, EventEnv};
use crate::expr::{EvalError, ExprError, Program};

/// A rule compiled for event classification.
///
/// The match expression decides whether the event belongs to the rule at
/// all; the optional ignore expression turns a match into a soft match (the
/// event is consumed without being grouped).
pub struct EventMatcher {
    rule: Rule,
    match_program: Option<Program>,
    ignore_program: Option<Program>,
}

impl EventMatcher {
    /// Compile both expressions. An empty match expression matches every
    /// event; an empty ignore expression never ignores.
    pub fn new(rule: Rule) -> Result<Self, ExprError> {
        let spec = event_env_spec();

        let match_program = if rule.match_rule.trim().is_empty() {
            None
        } else {
            Some(Program::compile(&rule.match_rule, &spec)?)
        };

        let ignore_program = if rule.ignore_rule.trim().is_empty() {
            None
        } else {
            Some(Program::compile(&rule.ignore_rule, &spec)?)
        };

        Ok(Self {
            rule,
            match_program,
            ignore_program,
        })
    }

    /// Returns `(matched, ignored)`.
    pub fn matches(&self, event: &Event) -> Result<(bool, bool), EvalError> {
        let env = EventEnv::new(event);

        let matched = match &self.match_program {
            Some(program) => program.run_bool(&env)?,
            None => true,
        };
        if !matched {
            return Ok((false, false));
        }

        let ignored = match &self.ignore_program {
            Some(program) => program.run_bool(&env)?,
            None => false,
        };

        Ok((true, ignored))
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }
}
