//! Workflow execution.
//!
//! [`Engine`] runs a [`Workflow`] one step at a time, in order:
//!
//! - a step already recorded as completed is probed; when the probe confirms
//!   the target still exists the step is skipped and its persisted result is
//!   carried into the [`RunContext`];
//! - otherwise inputs are resolved and the action executes;
//! - after every successful step the progress record is saved;
//! - the first failure halts the run. Completed steps stay recorded, so
//!   re-running the same command resumes at the failed step.
//!
//! Nothing is rolled back and nothing is retried automatically.
//!
//! When the engine is told the project already exists, steps marked with an
//! [`Adoption`] policy are probed even without a record, and an existing
//! target is recorded as completed instead of being created again.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use skyward_types::{Backend, InputFieldSpec, InputValidation, Operation, RunStatus, StepEvent, StepStatus};
use tracing::{debug, info, warn};

use crate::{
    action::{ActionRegistry, ProbeOutcome},
    catalog::{Adoption, Catalog, StepDefinition, Workflow, standard::PROJECT_ID_FIELD},
    error::{EngineError, StepFailure},
    inputs::{InputResolver, Prompter},
    progress::{ProgressRecord, ProgressStore},
    resolve::{RunContext, format_json_value},
};

pub use tokio_util::sync::CancellationToken;

/// Receives `pending` as each step is reached, `running` once it executes, and its final status.
pub trait ProgressObserver {
    fn on_event(&mut self, event: &StepEvent);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&StepEvent),
{
    fn on_event(&mut self, event: &StepEvent) {
        self(event)
    }
}

/// Final status of one step in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub key: String,
    pub label: String,
    pub status: StepStatus,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub project_id: String,
    pub backend: Backend,
    pub operation: Operation,
    /// Externally reachable URL reported by the endpoint step, when there is one.
    pub endpoint: Option<String>,
    pub steps: Vec<StepReport>,
}

impl RunSummary {
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|step| step.status == status).count()
    }
}

/// Drives create and update runs against a catalog.
pub struct Engine<'a> {
    catalog: &'a Catalog,
    actions: &'a ActionRegistry,
    store: &'a dyn ProgressStore,
    prompter: &'a mut dyn Prompter,
    observer: Option<&'a mut dyn ProgressObserver>,
    resolver: InputResolver,
    environment: HashMap<String, String>,
    cancellation: CancellationToken,
    existing_project: bool,
}

impl<'a> Engine<'a> {
    pub fn new(catalog: &'a Catalog, actions: &'a ActionRegistry, store: &'a dyn ProgressStore, prompter: &'a mut dyn Prompter) -> Self {
        Self {
            catalog,
            actions,
            store,
            prompter,
            observer: None,
            resolver: InputResolver::new(catalog.fields().clone()),
            environment: HashMap::new(),
            cancellation: CancellationToken::new(),
            existing_project: false,
        }
    }

    pub fn with_observer(mut self, observer: &'a mut dyn ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Operator-supplied field values, validated like any other source.
    pub fn with_presets(mut self, presets: serde_json::Map<String, Value>) -> Self {
        self.resolver = self.resolver.with_presets(presets);
        self
    }

    pub fn with_max_prompt_attempts(mut self, max_attempts: usize) -> Self {
        self.resolver = self.resolver.with_max_attempts(max_attempts);
        self
    }

    /// Variables exposed to templates as `env.*`.
    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Reuse targets that already exist instead of creating them; the project itself must exist.
    pub fn with_existing_project(mut self, existing_project: bool) -> Self {
        self.existing_project = existing_project;
        self
    }

    /// Provision a new deployment, resuming a prior interrupted create run for the same project.
    pub fn run_create(&mut self, backend: Backend) -> Result<RunSummary, EngineError> {
        let workflow = self.catalog.build_workflow(backend, Operation::Create)?;
        self.ensure_actions(&workflow)?;

        let mut context = RunContext::with_environment(self.environment.clone());
        let project_field = self.project_field();
        let first_step = &workflow.steps[0];
        let project_id = self
            .resolver
            .resolve_field(&project_field, &first_step.label, &mut context, &serde_json::Map::new(), &mut *self.prompter)
            .map_err(|source| EngineError::Input {
                step: first_step.key.clone(),
                source,
            })?;
        let project_id = format_json_value(&project_id);

        self.execute(&workflow, &project_id, context)
    }

    /// Update an existing deployment, reusing the values remembered for `project_id`.
    pub fn run_update(&mut self, project_id: &str, backend: Backend) -> Result<RunSummary, EngineError> {
        let workflow = self.catalog.build_workflow(backend, Operation::Update)?;
        self.ensure_actions(&workflow)?;

        let mut context = RunContext::with_environment(self.environment.clone());
        context.inputs.insert(PROJECT_ID_FIELD.to_string(), Value::String(project_id.to_string()));

        self.execute(&workflow, project_id, context)
    }

    fn project_field(&self) -> InputFieldSpec {
        self.catalog
            .field(PROJECT_ID_FIELD)
            .cloned()
            .unwrap_or_else(|| InputFieldSpec::text(PROJECT_ID_FIELD, "Project ID").with_validation(InputValidation::required()))
    }

    /// Fail before any step runs when a step has no action implementation.
    fn ensure_actions(&self, workflow: &Workflow) -> Result<(), EngineError> {
        match workflow.steps.iter().find(|step| !self.actions.contains(&step.action)) {
            Some(step) => Err(EngineError::MissingAction {
                step: step.key.clone(),
                action: step.action.clone(),
            }),
            None => Ok(()),
        }
    }

    fn secret_fields(&self) -> Vec<&'a str> {
        let catalog: &'a Catalog = self.catalog;
        catalog
            .fields()
            .values()
            .filter(|field| field.secret)
            .map(|field| field.name.as_str())
            .collect()
    }

    fn load_record(&self, workflow: &Workflow, project_id: &str) -> Result<ProgressRecord, EngineError> {
        match self.store.load(project_id)? {
            Some(record) if record.backend != workflow.backend => Err(EngineError::BackendMismatch {
                project_id: project_id.to_string(),
                recorded: record.backend,
                requested: workflow.backend,
            }),
            Some(record) => {
                info!(project_id, completed = record.completed.len(), "resuming from recorded progress");
                Ok(record)
            }
            None => {
                if workflow.operation == Operation::Update {
                    warn!(project_id, "no progress recorded for this project; values will be collected again");
                }
                Ok(ProgressRecord::new(project_id, workflow.backend))
            }
        }
    }

    /// Carry results of recorded steps outside this workflow into the context.
    fn seed_context(workflow: &Workflow, record: &ProgressRecord, context: &mut RunContext) {
        let update_results = record.update.iter().flat_map(|cycle| cycle.completed.iter());
        for (key, completed) in record.completed.iter().chain(update_results) {
            if !workflow.contains(key) {
                context.record_step(key, completed.result.clone());
            }
        }
        for dependency in workflow.external_dependencies() {
            if !context.is_completed(dependency) {
                warn!(dependency, "dependency is outside this workflow and has no recorded result");
            }
        }
    }

    fn execute(&mut self, workflow: &Workflow, project_id: &str, mut context: RunContext) -> Result<RunSummary, EngineError> {
        let operation = workflow.operation;
        let mut record = self.load_record(workflow, project_id)?;
        if operation == Operation::Update {
            let cycle = record.begin_update_cycle();
            debug!(project_id, cycle, "update cycle");
        }
        Self::seed_context(workflow, &record, &mut context);
        record.mark_run(operation, RunStatus::InProgress, None, None);
        self.store.save(project_id, &record)?;

        let secret_fields = self.secret_fields();
        let total = workflow.len();
        let mut reports = Vec::with_capacity(total);

        for (position, step) in workflow.steps.iter().enumerate() {
            let index = position + 1;
            if self.cancellation.is_cancelled() {
                return Err(self.stop_cancelled(workflow, project_id, &context, &mut record, position));
            }

            self.emit(index, total, step, StepStatus::Pending, None);
            match self.run_step(workflow, step, index, &mut context, &mut record, project_id, &secret_fields) {
                Ok(status) => {
                    self.emit(index, total, step, status, None);
                    reports.push(StepReport {
                        key: step.key.clone(),
                        label: step.label.clone(),
                        status,
                    });
                }
                Err(EngineError::ProgressStore(error)) => return Err(EngineError::ProgressStore(error)),
                Err(EngineError::Cancelled { .. }) => {
                    return Err(self.stop_cancelled(workflow, project_id, &context, &mut record, position));
                }
                Err(error) => {
                    warn!(step = %step.key, error = %error, "run halted");
                    record.remember_inputs(&context.inputs, secret_fields.iter().copied());
                    record.mark_run(operation, RunStatus::Failed, Some(step.key.clone()), None);
                    self.store.save(project_id, &record)?;
                    self.emit(index, total, step, StepStatus::Failed, Some(error.to_string()));
                    return Err(error);
                }
            }
        }

        let endpoint = workflow
            .endpoint_step()
            .and_then(|step| context.steps.get(&step.key))
            .and_then(endpoint_from_result);
        if operation == Operation::Update {
            record.finish_update_cycle();
        }
        record.remember_inputs(&context.inputs, secret_fields.iter().copied());
        record.mark_run(operation, RunStatus::Completed, None, endpoint.clone());
        self.store.save(project_id, &record)?;
        info!(project_id, endpoint = endpoint.as_deref().unwrap_or("-"), "run completed");

        Ok(RunSummary {
            project_id: project_id.to_string(),
            backend: workflow.backend,
            operation,
            endpoint,
            steps: reports,
        })
    }

    /// Persist a cancelled run; completed steps and answered inputs stay recorded.
    fn stop_cancelled(
        &self,
        workflow: &Workflow,
        project_id: &str,
        context: &RunContext,
        record: &mut ProgressRecord,
        completed: usize,
    ) -> EngineError {
        let total = workflow.len();
        info!(project_id, completed, total, "run cancelled");
        record.remember_inputs(&context.inputs, self.secret_fields());
        record.mark_run(workflow.operation, RunStatus::Cancelled, None, None);
        match self.store.save(project_id, record) {
            Ok(()) => EngineError::Cancelled { completed, total },
            Err(error) => error.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_step(
        &mut self,
        workflow: &Workflow,
        step: &StepDefinition,
        index: usize,
        context: &mut RunContext,
        record: &mut ProgressRecord,
        project_id: &str,
        secret_fields: &[&str],
    ) -> Result<StepStatus, EngineError> {
        let operation = workflow.operation;
        let failure = |reason: String| StepFailure {
            step_key: step.key.clone(),
            label: step.label.clone(),
            index,
            total: workflow.len(),
            reason,
        };

        if let Some(reason) = dependency_block(workflow, step, context) {
            return Err(failure(reason).into());
        }
        let action = self.actions.get(&step.action).ok_or_else(|| EngineError::MissingAction {
            step: step.key.clone(),
            action: step.action.clone(),
        })?;

        let recorded = record.is_completed(operation, &step.key);
        let adoption = step.adoption.filter(|_| self.existing_project && !recorded);
        if recorded || adoption.is_some() {
            let input = self.resolver.resolve_available(step, context, &record.inputs);
            match action.probe(&input, context) {
                Ok(ProbeOutcome::Satisfied(probed)) if adoption.is_some() => {
                    info!(step = %step.key, "adopting existing target");
                    context.record_step(&step.key, probed.clone());
                    record.record_completion(operation, &step.key, probed);
                    record.remember_inputs(&context.inputs, secret_fields.iter().copied());
                    self.store.save(project_id, record)?;
                    return Ok(StepStatus::Skipped);
                }
                Ok(ProbeOutcome::Absent) if adoption == Some(Adoption::Required) => {
                    return Err(failure("target does not exist and this run may not create it".into()).into());
                }
                Ok(ProbeOutcome::Absent) if adoption.is_some() => {
                    debug!(step = %step.key, "nothing to adopt; running step");
                }
                Ok(ProbeOutcome::Satisfied(probed)) => {
                    let result = record
                        .completed_result(operation, &step.key)
                        .filter(|persisted| !persisted.is_null())
                        .cloned()
                        .unwrap_or(probed);
                    debug!(step = %step.key, "probe confirms recorded step; skipping");
                    context.record_step(&step.key, result);
                    return Ok(StepStatus::Skipped);
                }
                Ok(ProbeOutcome::Absent) => {
                    info!(step = %step.key, "recorded step no longer satisfied; running it again");
                }
                Err(error) => return Err(failure(format!("idempotency probe failed: {error:#}")).into()),
            }
        }

        let input = self
            .resolver
            .resolve_step(step, context, &record.inputs, &mut *self.prompter)
            .map_err(|source| EngineError::Input {
                step: step.key.clone(),
                source,
            })?;

        if self.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled {
                completed: index - 1,
                total: workflow.len(),
            });
        }

        self.emit(index, workflow.len(), step, StepStatus::Running, None);
        debug!(step = %step.key, action = %step.action, "executing step");
        let result = action.execute(&input, context).map_err(|error| failure(format!("{error:#}")))?;

        context.record_step(&step.key, result.clone());
        record.record_completion(operation, &step.key, result);
        record.remember_inputs(&context.inputs, secret_fields.iter().copied());
        self.store.save(project_id, record)?;
        info!(step = %step.key, index, total = workflow.len(), "step completed");
        Ok(StepStatus::Succeeded)
    }

    fn emit(&mut self, index: usize, total: usize, step: &StepDefinition, status: StepStatus, detail: Option<String>) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.on_event(&StepEvent {
                index,
                total,
                step_key: step.key.clone(),
                label: step.label.clone(),
                status,
                detail,
            });
        }
    }
}

/// Reason a step may not run yet: an in-workflow dependency without a recorded success.
fn dependency_block(workflow: &Workflow, step: &StepDefinition, context: &RunContext) -> Option<String> {
    step.depends_on
        .iter()
        .find(|dependency| workflow.contains(dependency) && !context.is_completed(dependency))
        .map(|dependency| format!("dependency '{}' has not completed", dependency))
}

/// `url` field of an object result, or the result itself when it is a string.
fn endpoint_from_result(result: &Value) -> Option<String> {
    match result {
        Value::String(url) if !url.is_empty() => Some(url.clone()),
        Value::Object(fields) => fields.get("url").and_then(Value::as_str).filter(|url| !url.is_empty()).map(str::to_string),
        _ => None,
    }
}
