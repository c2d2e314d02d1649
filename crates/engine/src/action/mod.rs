//! The boundary between the engine and external provisioning work.
//!
//! An [`Action`] is an opaque unit of work: create an instance, enable a
//! service, build an image. The engine hands it the resolved input for a step
//! plus the explicit [`RunContext`], and never looks inside.

use std::{collections::BTreeSet, sync::Arc};

use anyhow::anyhow;
use indexmap::IndexMap;
use serde_json::Value;

use crate::resolve::{RunContext, format_json_value};

pub mod command;

pub use command::{CommandAction, CommandActionSpec, OutputFormat};

/// Resolved field values for one step invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInput {
    pub step_key: String,
    pub values: serde_json::Map<String, Value>,
    /// Names of the fields whose values must never be logged or persisted.
    pub secrets: BTreeSet<String>,
}

impl StepInput {
    pub fn new(step_key: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            ..Self::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// Fetch a field as text, failing when the step was not given it.
    pub fn require_str(&self, name: &str) -> anyhow::Result<&str> {
        self.get_str(name)
            .ok_or_else(|| anyhow!("step '{}' was not given a value for '{}'", self.step_key, name))
    }

    /// Textual values of secret fields, for redaction.
    pub fn secret_values(&self) -> Vec<String> {
        self.secrets
            .iter()
            .filter_map(|name| self.values.get(name))
            .map(format_json_value)
            .collect()
    }
}

/// Outcome of an idempotency probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The target already exists in the desired state; carries a synthesized result.
    Satisfied(Value),
    /// The target is missing or not in the desired state.
    Absent,
}

/// A single opaque unit of external work.
///
/// Implementations block for as long as the work takes. They must not retry
/// on their own; a failed step is retried by re-invoking the whole run.
pub trait Action: Send + Sync {
    /// Perform the work and return its result.
    fn execute(&self, input: &StepInput, context: &RunContext) -> anyhow::Result<Value>;

    /// Report whether the work is already done.
    ///
    /// Actions without a meaningful check keep the default, which forces
    /// re-execution whenever the engine asks.
    fn probe(&self, _input: &StepInput, _context: &RunContext) -> anyhow::Result<ProbeOutcome> {
        Ok(ProbeOutcome::Absent)
    }
}

/// Action implementations keyed by the action name steps refer to.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: IndexMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, action: impl Action + 'static) -> &mut Self {
        self.actions.insert(key.into(), Arc::new(action));
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.actions.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry").field("actions", &self.actions.keys().collect::<Vec<_>>()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl Action for Echo {
        fn execute(&self, input: &StepInput, _context: &RunContext) -> anyhow::Result<Value> {
            Ok(json!({ "name": input.require_str("name")? }))
        }
    }

    #[test]
    fn registry_resolves_actions_and_defaults_probe_to_absent() {
        let mut registry = ActionRegistry::new();
        registry.register("echo", Echo);

        let action = registry.get("echo").expect("registered");
        let mut input = StepInput::new("echo");
        input.values.insert("name".into(), json!("mysite"));

        let context = RunContext::default();
        assert_eq!(action.execute(&input, &context).expect("execute"), json!({ "name": "mysite" }));
        assert_eq!(action.probe(&input, &context).expect("probe"), ProbeOutcome::Absent);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn require_str_names_missing_field() {
        let input = StepInput::new("create_database");
        let error = input.require_str("database_name").expect_err("missing");
        assert!(error.to_string().contains("database_name"), "unexpected error: {error}");
    }

    #[test]
    fn secret_values_only_lists_secret_fields() {
        let mut input = StepInput::new("create_database");
        input.values.insert("database_password".into(), json!("hunter22"));
        input.values.insert("database_name".into(), json!("mysite-db"));
        input.secrets.insert("database_password".into());
        assert_eq!(input.secret_values(), vec!["hunter22".to_string()]);
    }
}
