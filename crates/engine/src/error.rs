//! Error taxonomy for catalog construction, input collection, step execution,
//! and progress persistence.

use std::path::PathBuf;

use skyward_types::{Backend, Operation};
use thiserror::Error;

/// Malformed step graph. Surfaces at startup and is never operator-recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate step identifier detected: '{0}'")]
    DuplicateStep(String),
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },
    #[error("step '{0}' cannot depend on itself")]
    SelfDependency(String),
    #[error("cycle detected in workflow steps involving: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("no steps match backend '{backend}' and operation '{operation}'")]
    EmptyWorkflow { backend: Backend, operation: Operation },
    #[error("input field '{field}' declared by step '{step}' conflicts with an earlier declaration")]
    ConflictingField { field: String, step: String },
}

/// Bad operator input for a single field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid value for '{field}': {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// An external action failed; the run halted at this step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("step {index}/{total} '{label}' ({step_key}) failed: {reason}")]
pub struct StepFailure {
    pub step_key: String,
    pub label: String,
    /// One-based position within the workflow.
    pub index: usize,
    pub total: usize,
    pub reason: String,
}

/// Persistence failure. Durability of completed-step state can no longer be guaranteed.
#[derive(Debug, Error)]
pub enum ProgressStoreError {
    #[error("progress store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("progress record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("progress record at {} is unreadable: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("'{0}' cannot be used as a project identifier for progress records")]
    InvalidProjectId(String),
}

/// Failure reported by a prompt collaborator.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("input interrupted by the operator")]
    Interrupted,
    #[error("no value available for '{field}' and prompting is disabled")]
    Unavailable { field: String },
}

/// Input resolution could not produce a valid value for a field.
#[derive(Debug, Error)]
pub enum InputError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("gave up on '{field}' after {attempts} invalid attempts: {last}")]
    TooManyAttempts {
        field: String,
        attempts: usize,
        last: ValidationError,
    },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("default for '{0}' refers back to itself")]
    CyclicDefault(String),
}

/// Top-level error returned by `Engine` runs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("step '{step}' uses action '{action}', which has no implementation configured")]
    MissingAction { step: String, action: String },
    #[error(transparent)]
    Step(#[from] StepFailure),
    #[error(transparent)]
    ProgressStore(#[from] ProgressStoreError),
    #[error("could not collect input for '{step}': {source}")]
    Input {
        step: String,
        #[source]
        source: InputError,
    },
    #[error("project '{project_id}' was deployed to the {recorded} backend; refusing to run against {requested}")]
    BackendMismatch {
        project_id: String,
        recorded: Backend,
        requested: Backend,
    },
    #[error("run cancelled after {completed} of {total} steps")]
    Cancelled { completed: usize, total: usize },
}

impl EngineError {
    /// Returns true when re-running the same command resumes the interrupted work.
    pub fn is_resumable(&self) -> bool {
        matches!(self, EngineError::Step(_) | EngineError::Cancelled { .. } | EngineError::Input { .. })
    }
}
