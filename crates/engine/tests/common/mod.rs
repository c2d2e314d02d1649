//! Test doubles shared by the engine integration tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use anyhow::bail;
use serde_json::{Value, json};
use skyward_engine::{
    Action, ActionRegistry, Adoption, CancellationToken, Catalog, ProbeOutcome, PromptError, PromptRequest, Prompter,
    StepDefinition, StepInput, ValidationError, resolve::RunContext,
};
use skyward_types::{BackendTag, InputFieldSpec, InputValidation, OperationTag, StepEvent};

/// Fake cloud that remembers created resources and counts every call.
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
}

#[derive(Default)]
struct CloudState {
    resources: HashMap<String, Value>,
    executions: HashMap<String, usize>,
    probes: HashMap<String, usize>,
    failing: HashSet<String>,
    results: HashMap<String, Value>,
    observed_steps: HashMap<String, Vec<HashMap<String, Value>>>,
    observed_inputs: HashMap<String, Vec<serde_json::Map<String, Value>>>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, key: &str) {
        self.state.lock().expect("cloud lock").failing.insert(key.to_string());
    }

    pub fn recover(&self, key: &str) {
        self.state.lock().expect("cloud lock").failing.remove(key);
    }

    /// Create a resource out of band, as if an operator made it by hand.
    pub fn provision(&self, key: &str, resource: Value) {
        self.state.lock().expect("cloud lock").resources.insert(key.to_string(), resource);
    }

    /// Remove a resource out of band, as if an operator deleted it.
    pub fn destroy(&self, key: &str) {
        self.state.lock().expect("cloud lock").resources.remove(key);
    }

    pub fn set_result(&self, key: &str, result: Value) {
        self.state.lock().expect("cloud lock").results.insert(key.to_string(), result);
    }

    pub fn executions(&self, key: &str) -> usize {
        self.state.lock().expect("cloud lock").executions.get(key).copied().unwrap_or(0)
    }

    pub fn total_executions(&self) -> usize {
        self.state.lock().expect("cloud lock").executions.values().sum()
    }

    pub fn probes(&self, key: &str) -> usize {
        self.state.lock().expect("cloud lock").probes.get(key).copied().unwrap_or(0)
    }

    /// Context step results each execution of `key` saw, in call order.
    pub fn observed_steps(&self, key: &str) -> Vec<HashMap<String, Value>> {
        self.state.lock().expect("cloud lock").observed_steps.get(key).cloned().unwrap_or_default()
    }

    pub fn observed_inputs(&self, key: &str) -> Vec<serde_json::Map<String, Value>> {
        self.state.lock().expect("cloud lock").observed_inputs.get(key).cloned().unwrap_or_default()
    }
}

/// Action double that creates a resource named after its step in a [`FakeCloud`].
pub struct RecordingAction {
    key: String,
    cloud: Arc<FakeCloud>,
}

impl Action for RecordingAction {
    fn execute(&self, input: &StepInput, context: &RunContext) -> anyhow::Result<Value> {
        let mut state = self.cloud.state.lock().expect("cloud lock");
        *state.executions.entry(self.key.clone()).or_default() += 1;
        state.observed_steps.entry(self.key.clone()).or_default().push(context.steps.clone());
        state.observed_inputs.entry(self.key.clone()).or_default().push(input.values.clone());
        if state.failing.contains(&self.key) {
            bail!("simulated failure in {}", self.key);
        }
        let result = state.results.get(&self.key).cloned().unwrap_or_else(|| json!({ "step": self.key }));
        state.resources.insert(self.key.clone(), result.clone());
        Ok(result)
    }

    fn probe(&self, _input: &StepInput, _context: &RunContext) -> anyhow::Result<ProbeOutcome> {
        let mut state = self.cloud.state.lock().expect("cloud lock");
        *state.probes.entry(self.key.clone()).or_default() += 1;
        Ok(match state.resources.get(&self.key) {
            Some(resource) => ProbeOutcome::Satisfied(resource.clone()),
            None => ProbeOutcome::Absent,
        })
    }
}

/// Register a recording action for every step of `catalog`.
pub fn recording_actions(catalog: &Catalog, cloud: &Arc<FakeCloud>) -> ActionRegistry {
    recording_actions_except(catalog, cloud, &[])
}

pub fn recording_actions_except(catalog: &Catalog, cloud: &Arc<FakeCloud>, missing: &[&str]) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    for step in catalog.steps().iter().filter(|step| !missing.contains(&step.action.as_str())) {
        registry.register(
            step.action.clone(),
            RecordingAction {
                key: step.action.clone(),
                cloud: Arc::clone(cloud),
            },
        );
    }
    registry
}

/// Answers questions from per-field scripts, falling back to the offered default.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: HashMap<String, VecDeque<String>>,
    pub asked: Vec<String>,
    pub rejected: Vec<String>,
    cancel_on: Option<(String, CancellationToken)>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, field: &str, answers: &[&str]) -> Self {
        self.answers
            .entry(field.to_string())
            .or_default()
            .extend(answers.iter().map(|answer| answer.to_string()));
        self
    }

    /// Cancel `token` when `field` is asked, as a Ctrl-C during the prompt would.
    pub fn cancel_when_asked(mut self, field: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((field.to_string(), token));
        self
    }

    pub fn times_asked(&self, field: &str) -> usize {
        self.asked.iter().filter(|name| *name == field).count()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, request: &PromptRequest<'_>) -> Result<String, PromptError> {
        self.asked.push(request.field.name.clone());
        if let Some((field, token)) = &self.cancel_on
            && *field == request.field.name
        {
            token.cancel();
        }
        if let Some(answer) = self.answers.get_mut(&request.field.name).and_then(VecDeque::pop_front) {
            return Ok(answer);
        }
        request.default.clone().ok_or(PromptError::Interrupted)
    }

    fn reject(&mut self, request: &PromptRequest<'_>, _error: &ValidationError) {
        self.rejected.push(request.field.name.clone());
    }
}

pub fn project_field() -> InputFieldSpec {
    InputFieldSpec::text("project_id", "Project ID")
        .with_validation(InputValidation::required().with_pattern("^[a-z][a-z0-9-]{5,29}$"))
}

/// Small two-backend catalog mirroring the shape of the standard one.
pub fn deployment_catalog() -> Catalog {
    Catalog::new(vec![
        StepDefinition::new("create_project", "Creating project")
            .operation(OperationTag::Create)
            .adopts_existing(Adoption::Required)
            .input(project_field()),
        StepDefinition::new("create_database", "Creating database")
            .operation(OperationTag::Create)
            .depends_on(["create_project"])
            .adopts_existing(Adoption::IfPresent)
            .input(InputFieldSpec::text("app_name", "Application name").with_default("mysite"))
            .input(InputFieldSpec::derived("database_instance", "${{ inputs.app_name }}-instance")),
        StepDefinition::new("migrate_database", "Migrating database")
            .depends_on(["create_database"])
            .input(
                InputFieldSpec::secret("database_password", "Database password")
                    .with_validation(InputValidation::required().with_length(Some(6), None)),
            ),
        StepDefinition::new("create_admin_user", "Creating admin user")
            .operation(OperationTag::Create)
            .depends_on(["migrate_database"])
            .input(
                InputFieldSpec::text("admin_email", "Admin email")
                    .with_validation(InputValidation::required().with_pattern(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")),
            ),
        StepDefinition::new("create_cluster", "Creating cluster")
            .backend(BackendTag::Cluster)
            .operation(OperationTag::Create)
            .depends_on(["create_project"]),
        StepDefinition::new("build_image", "Building image")
            .backend(BackendTag::Cluster)
            .depends_on(["create_project"]),
        StepDefinition::new("rollout_to_cluster", "Rolling out")
            .backend(BackendTag::Cluster)
            .depends_on(["create_cluster", "build_image", "migrate_database"])
            .provides_endpoint(),
        StepDefinition::new("deploy_serverless", "Deploying")
            .backend(BackendTag::Serverless)
            .depends_on(["migrate_database"])
            .provides_endpoint(),
    ])
    .expect("deployment catalog is valid")
}

/// Prompter with valid answers for every interactive field of [`deployment_catalog`].
pub fn happy_prompter() -> ScriptedPrompter {
    ScriptedPrompter::new()
        .answer("project_id", &["my-project-42"])
        .answer("database_password", &["hunter22", "hunter22"])
        .answer("admin_email", &["ops@example.com"])
}

/// Collects progress events.
pub fn event_sink(events: &mut Vec<StepEvent>) -> impl FnMut(&StepEvent) + '_ {
    move |event: &StepEvent| events.push(event.clone())
}
