//! Input resolution for step fields.
//!
//! For each field a step declares, values are taken from, in order:
//!
//! 1. the run context, when an earlier step of this run already resolved it;
//! 2. operator presets from configuration or the command line;
//! 3. the progress record of a prior run (never for secret fields);
//! 4. the interpolated default, for non-interactive fields;
//! 5. the [`Prompter`], re-asking only the failing field when validation rejects an answer.
//!
//! Invalid presets and recorded values are logged and skipped rather than
//! trusted. Defaults may reference other fields, which are resolved first.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value;
use skyward_types::{InputFieldSpec, InputValidation, validate_candidate_value};
use tracing::{debug, warn};

use crate::{
    action::StepInput,
    catalog::StepDefinition,
    error::{InputError, PromptError, ValidationError},
    resolve::{RunContext, format_json_value, interpolate_string, referenced_inputs},
};

pub const DEFAULT_MAX_PROMPT_ATTEMPTS: usize = 10;

/// One question put to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest<'a> {
    pub field: &'a InputFieldSpec,
    /// Interpolated default offered to the operator; an empty answer accepts it.
    pub default: Option<String>,
    /// True for the second entry of a field that must be typed twice.
    pub confirmation: bool,
    /// Label of the step that needs the value.
    pub step_label: &'a str,
}

/// Collects values from the operator.
///
/// Implementations mask input when `request.field.secret` is set.
pub trait Prompter {
    fn ask(&mut self, request: &PromptRequest<'_>) -> Result<String, PromptError>;

    /// Called when an answer failed validation, before the field is asked again.
    fn reject(&mut self, _request: &PromptRequest<'_>, _error: &ValidationError) {}
}

/// Accepts defaults and fails on anything that would need a human.
#[derive(Debug, Default)]
pub struct NonInteractivePrompter {
    rejected: HashSet<String>,
}

impl NonInteractivePrompter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Prompter for NonInteractivePrompter {
    fn ask(&mut self, request: &PromptRequest<'_>) -> Result<String, PromptError> {
        let unavailable = || PromptError::Unavailable {
            field: request.field.name.clone(),
        };
        if self.rejected.contains(&request.field.name) {
            return Err(unavailable());
        }
        request.default.clone().ok_or_else(unavailable)
    }

    fn reject(&mut self, request: &PromptRequest<'_>, error: &ValidationError) {
        warn!(field = %request.field.name, error = %error, "default value rejected in non-interactive mode");
        self.rejected.insert(request.field.name.clone());
    }
}

/// Resolves field values with the priority described in the module docs.
#[derive(Debug, Clone)]
pub struct InputResolver {
    fields: IndexMap<String, InputFieldSpec>,
    presets: serde_json::Map<String, Value>,
    max_attempts: usize,
}

impl InputResolver {
    /// `fields` is every field known to the catalog, used to resolve references in defaults.
    pub fn new(fields: IndexMap<String, InputFieldSpec>) -> Self {
        Self {
            fields,
            presets: serde_json::Map::new(),
            max_attempts: DEFAULT_MAX_PROMPT_ATTEMPTS,
        }
    }

    pub fn with_presets(mut self, presets: serde_json::Map<String, Value>) -> Self {
        self.presets = presets;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Resolve every field `step` declares, prompting where needed.
    pub fn resolve_step(
        &self,
        step: &StepDefinition,
        context: &mut RunContext,
        recorded: &serde_json::Map<String, Value>,
        prompter: &mut dyn Prompter,
    ) -> Result<StepInput, InputError> {
        let mut input = StepInput::new(step.key.clone());
        for field in &step.inputs {
            let value = self.resolve_field(field, &step.label, context, recorded, prompter)?;
            input.values.insert(field.name.clone(), value);
            if field.secret {
                input.secrets.insert(field.name.clone());
            }
        }
        Ok(input)
    }

    /// Resolve a single field and store it in the run context.
    pub fn resolve_field(
        &self,
        field: &InputFieldSpec,
        step_label: &str,
        context: &mut RunContext,
        recorded: &serde_json::Map<String, Value>,
        prompter: &mut dyn Prompter,
    ) -> Result<Value, InputError> {
        let mut resolving = Vec::new();
        self.resolve_field_inner(field, step_label, context, recorded, prompter, &mut resolving)
    }

    fn resolve_field_inner(
        &self,
        field: &InputFieldSpec,
        step_label: &str,
        context: &mut RunContext,
        recorded: &serde_json::Map<String, Value>,
        prompter: &mut dyn Prompter,
        resolving: &mut Vec<String>,
    ) -> Result<Value, InputError> {
        if let Some(value) = context.inputs.get(&field.name) {
            return Ok(value.clone());
        }
        if resolving.contains(&field.name) {
            return Err(InputError::CyclicDefault(field.name.clone()));
        }

        if let Some(value) = self.stored_candidate(field, recorded) {
            context.inputs.insert(field.name.clone(), value.clone());
            return Ok(value);
        }

        resolving.push(field.name.clone());
        for reference in default_references(field) {
            if context.inputs.contains_key(&reference) {
                continue;
            }
            if let Some(referenced_field) = self.fields.get(&reference) {
                self.resolve_field_inner(referenced_field, step_label, context, recorded, prompter, resolving)?;
            }
        }
        resolving.pop();

        let default = interpolated_default(field, context);
        let value = if field.interactive {
            self.prompt_for(field, step_label, default, prompter)?
        } else {
            let value = default.ok_or_else(|| PromptError::Unavailable {
                field: field.name.clone(),
            })?;
            validate(field, &value)?;
            value
        };
        context.inputs.insert(field.name.clone(), value.clone());
        Ok(value)
    }

    /// Resolve what can be resolved without asking the operator.
    ///
    /// Used for idempotency probes; fields that would need a prompt are left out.
    pub fn resolve_available(
        &self,
        step: &StepDefinition,
        context: &mut RunContext,
        recorded: &serde_json::Map<String, Value>,
    ) -> StepInput {
        let mut input = StepInput::new(step.key.clone());
        for field in &step.inputs {
            let mut resolving = Vec::new();
            if let Some(value) = self.peek_field(field, context, recorded, &mut resolving) {
                input.values.insert(field.name.clone(), value);
                if field.secret {
                    input.secrets.insert(field.name.clone());
                }
            }
        }
        input
    }

    fn peek_field(
        &self,
        field: &InputFieldSpec,
        context: &mut RunContext,
        recorded: &serde_json::Map<String, Value>,
        resolving: &mut Vec<String>,
    ) -> Option<Value> {
        if let Some(value) = context.inputs.get(&field.name) {
            return Some(value.clone());
        }
        if let Some(value) = self.stored_candidate(field, recorded) {
            context.inputs.insert(field.name.clone(), value.clone());
            return Some(value);
        }
        if field.interactive || resolving.contains(&field.name) {
            return None;
        }

        resolving.push(field.name.clone());
        for reference in default_references(field) {
            let referenced_field = self.fields.get(&reference)?;
            self.peek_field(referenced_field, context, recorded, resolving)?;
        }
        resolving.pop();

        let value = interpolated_default(field, context)?;
        validate(field, &value).ok()?;
        context.inputs.insert(field.name.clone(), value.clone());
        Some(value)
    }

    /// First valid value among presets and, for non-secret fields, the progress record.
    fn stored_candidate(&self, field: &InputFieldSpec, recorded: &serde_json::Map<String, Value>) -> Option<Value> {
        let recorded_value = if field.secret { None } else { recorded.get(&field.name) };
        let sources = [("configuration", self.presets.get(&field.name)), ("progress record", recorded_value)];
        for (source, candidate) in sources {
            let Some(candidate) = candidate else {
                continue;
            };
            match validate(field, candidate) {
                Ok(()) => {
                    debug!(field = %field.name, source, "reusing stored value");
                    return Some(candidate.clone());
                }
                Err(error) => warn!(field = %field.name, source, error = %error, "ignoring stored value"),
            }
        }
        None
    }

    fn prompt_for(
        &self,
        field: &InputFieldSpec,
        step_label: &str,
        default: Option<Value>,
        prompter: &mut dyn Prompter,
    ) -> Result<Value, InputError> {
        let default_text = default.as_ref().map(format_json_value);
        let mut last_error = ValidationError::new(&field.name, "no answer");

        for _ in 0..self.max_attempts {
            let request = PromptRequest {
                field,
                default: default_text.clone(),
                confirmation: false,
                step_label,
            };
            let answer = prompter.ask(&request)?;
            let answer = if field.secret { answer } else { answer.trim().to_string() };
            let candidate = match (&default, answer.is_empty()) {
                (Some(default), true) => default.clone(),
                _ => Value::String(answer.clone()),
            };

            let outcome = validate(field, &candidate).and_then(|()| {
                if !field.confirm {
                    return Ok(());
                }
                let confirmation = prompter.ask(&PromptRequest {
                    default: None,
                    confirmation: true,
                    ..request.clone()
                });
                match confirmation {
                    Ok(repeated) if repeated == answer => Ok(()),
                    Ok(_) => Err(ValidationError::new(&field.name, "values do not match, please try again")),
                    Err(error) => Err(ValidationError::new(&field.name, error.to_string())),
                }
            });

            match outcome {
                Ok(()) => return Ok(candidate),
                Err(error) => {
                    debug!(field = %field.name, error = %error, "answer rejected");
                    prompter.reject(&request, &error);
                    last_error = error;
                }
            }
        }

        Err(InputError::TooManyAttempts {
            field: field.name.clone(),
            attempts: self.max_attempts,
            last: last_error,
        })
    }
}

fn default_references(field: &InputFieldSpec) -> Vec<String> {
    match &field.default {
        Some(Value::String(template)) => referenced_inputs(template),
        _ => Vec::new(),
    }
}

fn interpolated_default(field: &InputFieldSpec, context: &RunContext) -> Option<Value> {
    match &field.default {
        Some(Value::String(template)) => Some(Value::String(interpolate_string(template, context))),
        other => other.clone(),
    }
}

/// Apply the field's rules; fields without explicit rules still reject blank values.
fn validate(field: &InputFieldSpec, candidate: &Value) -> Result<(), ValidationError> {
    let required = InputValidation::required();
    let rules = field.validate.as_ref().unwrap_or(&required);
    validate_candidate_value(candidate, rules).map_err(|message| ValidationError::new(&field.name, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Answers from a script and records every question asked.
    #[derive(Default)]
    struct ScriptedPrompter {
        answers: VecDeque<String>,
        asked: Vec<(String, bool)>,
        rejected: Vec<String>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|answer| answer.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn ask(&mut self, request: &PromptRequest<'_>) -> Result<String, PromptError> {
            self.asked.push((request.field.name.clone(), request.confirmation));
            self.answers.pop_front().ok_or(PromptError::Interrupted)
        }

        fn reject(&mut self, request: &PromptRequest<'_>, _error: &ValidationError) {
            self.rejected.push(request.field.name.clone());
        }
    }

    fn resolver_for(fields: Vec<InputFieldSpec>) -> InputResolver {
        InputResolver::new(fields.into_iter().map(|field| (field.name.clone(), field)).collect())
    }

    fn step_with(fields: Vec<InputFieldSpec>) -> StepDefinition {
        fields
            .into_iter()
            .fold(StepDefinition::new("create_database", "Creating database"), StepDefinition::input)
    }

    fn project_field() -> InputFieldSpec {
        InputFieldSpec::text("project_id", "Project ID")
            .with_validation(InputValidation::required().with_pattern("^[a-z][a-z0-9-]{5,29}$"))
    }

    #[test]
    fn invalid_answer_reprompts_only_that_field() {
        let app = InputFieldSpec::text("app_name", "Application name").with_default("mysite");
        let resolver = resolver_for(vec![project_field(), app.clone()]);
        let step = step_with(vec![project_field(), app]);
        let mut prompter = ScriptedPrompter::new(&["Bad_ID", "my-project-42", ""]);
        let mut context = RunContext::default();

        let input = resolver
            .resolve_step(&step, &mut context, &serde_json::Map::new(), &mut prompter)
            .expect("resolve");

        assert_eq!(input.get_str("project_id"), Some("my-project-42"));
        assert_eq!(input.get_str("app_name"), Some("mysite"));
        assert_eq!(prompter.rejected, vec!["project_id".to_string()]);
        let project_questions = prompter.asked.iter().filter(|(name, _)| name == "project_id").count();
        assert_eq!(project_questions, 2);
    }

    #[test]
    fn confirmed_secret_mismatch_is_retried() {
        let password = InputFieldSpec::secret("database_password", "Database password")
            .with_validation(InputValidation::required().with_length(Some(6), None));
        let resolver = resolver_for(vec![password.clone()]);
        let step = step_with(vec![password]);
        let mut prompter = ScriptedPrompter::new(&["hunter22", "hunter23", "hunter22", "hunter22"]);
        let mut context = RunContext::default();

        let input = resolver
            .resolve_step(&step, &mut context, &serde_json::Map::new(), &mut prompter)
            .expect("resolve");

        assert_eq!(input.get_str("database_password"), Some("hunter22"));
        assert!(input.secrets.contains("database_password"));
        assert_eq!(prompter.rejected.len(), 1);
        assert_eq!(
            prompter.asked,
            vec![
                ("database_password".to_string(), false),
                ("database_password".to_string(), true),
                ("database_password".to_string(), false),
                ("database_password".to_string(), true),
            ]
        );
    }

    #[test]
    fn context_then_presets_then_record_then_prompt() {
        let fields = vec![
            InputFieldSpec::text("app_name", "App"),
            InputFieldSpec::text("region", "Region"),
            InputFieldSpec::text("billing_account", "Billing"),
            InputFieldSpec::text("admin_email", "Email"),
        ];
        let mut presets = serde_json::Map::new();
        presets.insert("region".into(), json!("europe-west1"));
        let resolver = resolver_for(fields.clone()).with_presets(presets);
        let step = step_with(fields);

        let mut recorded = serde_json::Map::new();
        recorded.insert("region".into(), json!("us-west1"));
        recorded.insert("billing_account".into(), json!("000000-000000-000000"));

        let mut context = RunContext::default();
        context.inputs.insert("app_name".into(), json!("mysite"));
        let mut prompter = ScriptedPrompter::new(&["ops@example.com"]);

        let input = resolver.resolve_step(&step, &mut context, &recorded, &mut prompter).expect("resolve");
        assert_eq!(input.get_str("app_name"), Some("mysite"));
        assert_eq!(input.get_str("region"), Some("europe-west1"));
        assert_eq!(input.get_str("billing_account"), Some("000000-000000-000000"));
        assert_eq!(input.get_str("admin_email"), Some("ops@example.com"));
        assert_eq!(prompter.asked.len(), 1);
    }

    #[test]
    fn invalid_recorded_value_falls_back_to_prompt() {
        let resolver = resolver_for(vec![project_field()]);
        let mut recorded = serde_json::Map::new();
        recorded.insert("project_id".into(), json!("NOT VALID"));
        let mut prompter = ScriptedPrompter::new(&["my-project-42"]);
        let mut context = RunContext::default();

        let value = resolver
            .resolve_field(&project_field(), "Creating project", &mut context, &recorded, &mut prompter)
            .expect("resolve");
        assert_eq!(value, json!("my-project-42"));
    }

    #[test]
    fn secrets_are_never_taken_from_the_record() {
        let password = InputFieldSpec::secret("database_password", "Database password");
        let resolver = resolver_for(vec![password.clone()]);
        let mut recorded = serde_json::Map::new();
        recorded.insert("database_password".into(), json!("leaked"));
        let mut prompter = ScriptedPrompter::new(&["fresh-secret", "fresh-secret"]);
        let mut context = RunContext::default();

        let value = resolver
            .resolve_field(&password, "Migrating database", &mut context, &recorded, &mut prompter)
            .expect("resolve");
        assert_eq!(value, json!("fresh-secret"));
    }

    #[test]
    fn derived_defaults_resolve_their_references_first() {
        let app = InputFieldSpec::text("app_name", "Application name").with_default("mysite");
        let instance = InputFieldSpec::derived("database_instance", "${{ inputs.app_name }}-instance");
        let resolver = resolver_for(vec![app, instance.clone()]);
        let mut prompter = ScriptedPrompter::new(&["blog"]);
        let mut context = RunContext::default();

        let value = resolver
            .resolve_field(&instance, "Creating database", &mut context, &serde_json::Map::new(), &mut prompter)
            .expect("resolve");
        assert_eq!(value, json!("blog-instance"));
        assert_eq!(context.input_str("app_name"), Some("blog"));
    }

    #[test]
    fn cyclic_defaults_are_reported() {
        let first = InputFieldSpec::derived("first", "${{ inputs.second }}");
        let second = InputFieldSpec::derived("second", "${{ inputs.first }}");
        let resolver = resolver_for(vec![first.clone(), second]);
        let mut prompter = ScriptedPrompter::default();

        let error = resolver
            .resolve_field(&first, "x", &mut RunContext::default(), &serde_json::Map::new(), &mut prompter)
            .expect_err("cycle");
        assert!(matches!(error, InputError::CyclicDefault(ref name) if name == "first"), "unexpected error: {error}");
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let resolver = resolver_for(vec![project_field()]).with_max_attempts(2);
        let mut prompter = ScriptedPrompter::new(&["x", "y", "my-project-42"]);
        let error = resolver
            .resolve_field(&project_field(), "x", &mut RunContext::default(), &serde_json::Map::new(), &mut prompter)
            .expect_err("too many attempts");
        assert!(matches!(error, InputError::TooManyAttempts { attempts: 2, .. }), "unexpected error: {error}");
    }

    #[test]
    fn non_interactive_prompter_accepts_defaults_and_fails_without_one() {
        let app = InputFieldSpec::text("app_name", "Application name").with_default("mysite");
        let resolver = resolver_for(vec![app.clone(), project_field()]);
        let mut prompter = NonInteractivePrompter::new();
        let mut context = RunContext::default();

        let value = resolver
            .resolve_field(&app, "x", &mut context, &serde_json::Map::new(), &mut prompter)
            .expect("default accepted");
        assert_eq!(value, json!("mysite"));

        let error = resolver
            .resolve_field(&project_field(), "x", &mut context, &serde_json::Map::new(), &mut prompter)
            .expect_err("no default");
        assert!(matches!(error, InputError::Prompt(PromptError::Unavailable { .. })), "unexpected error: {error}");
    }

    #[test]
    fn resolve_available_skips_fields_needing_prompts() {
        let app = InputFieldSpec::text("app_name", "Application name").with_default("mysite");
        let instance = InputFieldSpec::derived("database_instance", "${{ inputs.app_name }}-instance");
        let password = InputFieldSpec::secret("database_password", "Database password");
        let resolver = resolver_for(vec![app.clone(), instance.clone(), password.clone()]);
        let step = step_with(vec![app, instance, password]);

        let mut recorded = serde_json::Map::new();
        recorded.insert("app_name".into(), json!("blog"));
        let mut context = RunContext::default();

        let input = resolver.resolve_available(&step, &mut context, &recorded);
        assert_eq!(input.get_str("app_name"), Some("blog"));
        assert_eq!(input.get_str("database_instance"), Some("blog-instance"));
        assert!(input.get("database_password").is_none());
    }
}
