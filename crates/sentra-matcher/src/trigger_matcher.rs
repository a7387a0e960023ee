use sentra_common::types::GroupAction;

use crate::expr::{EvalError, ExprError, Program};
use crate::trigger_env::{trigger_env_spec, TriggerEnv};

/// An action's trigger condition compiled against the trigger environment.
pub struct TriggerMatcher {
    action: GroupAction,
    program: Option<Program>,
}

impl TriggerMatcher {
    /// An empty condition always fires.
    pub fn new(action: GroupAction) -> Result<Self, ExprError> {
        let program = if action.pre_condition.trim().is_empty() {
            None
        } else {
            Some(Program::compile(&action.pre_condition, &trigger_env_spec())?)
        };

        Ok(Self { action, program })
    }

    pub fn matches(&self, env: &TriggerEnv<'_>) -> Result<bool, EvalError> {
        match &self.program {
            Some(program) => program.run_bool(env),
            None => Ok(true),
        }
    }

    pub fn action(&self) -> &GroupAction {
        &self.action
    }
}
