use std::cell::RefCell;
use std::collections::HashMap;

use sentra_common::types::Event;

use crate::expr::{Env, EnvSpec, EvalError, Value};

/// Capability record for match and aggregate expressions: one event.
pub fn event_env_spec() -> EnvSpec {
    EnvSpec::new()
        .with_var("Content")
        .with_var("Origin")
        .with_var("Type")
        .with_var("Tags")
        .with_var("Meta")
        .with_func("Upper", 1, 1)
        .with_func("Lower", 1, 1)
        .with_func("JsonGet", 2, 2)
}

/// Evaluation environment over a single event.
pub struct EventEnv<'a> {
    event: &'a Event,
    /// `Content` parsed as JSON, realized on the first `JsonGet` call.
    parsed_content: RefCell<Option<Option<serde_json::Value>>>,
}

impl<'a> EventEnv<'a> {
    pub fn new(event: &'a Event) -> Self {
        Self {
            event,
            parsed_content: RefCell::new(None),
        }
    }

    fn json_get(&self, path: &str, default: &str) -> Value {
        let mut cache = self.parsed_content.borrow_mut();
        let parsed =
            cache.get_or_insert_with(|| serde_json::from_str(&self.event.content).ok());

        let Some(root) = parsed.as_ref() else {
            return Value::Str(default.to_string());
        };

        let mut cursor = root;
        for seg in path.split('.') {
            let next = match cursor {
                serde_json::Value::Object(map) => map.get(seg),
                serde_json::Value::Array(items) => {
                    seg.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                _ => None,
            };
            match next {
                Some(v) => cursor = v,
                None => return Value::Str(default.to_string()),
            }
        }

        Value::Str(Value::from_json(cursor).to_display_string())
    }
}

impl Env for EventEnv<'_> {
    fn var(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "Content" => Ok(Value::Str(self.event.content.clone())),
            "Origin" => Ok(Value::Str(self.event.origin.clone())),
            "Type" => Ok(Value::Str(self.event.event_type.clone())),
            "Tags" => Ok(Value::Array(
                self.event
                    .tags
                    .iter()
                    .map(|t| Value::Str(t.clone()))
                    .collect(),
            )),
            "Meta" => {
                let map: HashMap<String, Value> = self
                    .event
                    .meta
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect();
                Ok(Value::Map(map))
            }
            other => Err(EvalError::Helper(format!("unknown variable `{other}`"))),
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            "Upper" => Ok(Value::Str(args[0].to_display_string().to_uppercase())),
            "Lower" => Ok(Value::Str(args[0].to_display_string().to_lowercase())),
            "JsonGet" => Ok(self.json_get(
                &args[0].to_display_string(),
                &args[1].to_display_string(),
            )),
            other => Err(EvalError::Helper(format!("unknown function `{other}`"))),
        }
    }
}
