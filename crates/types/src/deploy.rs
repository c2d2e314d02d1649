//! Deployment model types shared by the engine and the CLI.
//!
//! Step catalogs are tagged with a [`BackendTag`] and an [`OperationTag`]; a run
//! is always for one concrete [`Backend`] and one concrete [`Operation`].

use std::{error::Error, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod validation;

pub use validation::validate_candidate_value;

/// Target deployment platform for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Managed serverless platform with a platform-provided router.
    Serverless,
    /// Managed container cluster exposed through an ingress.
    Cluster,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Serverless => "serverless",
            Backend::Cluster => "cluster",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serverless" | "gae" => Ok(Self::Serverless),
            "cluster" | "gke" => Ok(Self::Cluster),
            other => Err(ParseTagError::new("backend", other, "'serverless' or 'cluster'")),
        }
    }
}

/// Kind of run requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "new" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            other => Err(ParseTagError::new("operation", other, "'create' or 'update'")),
        }
    }
}

/// Error returned when a backend or operation name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTagError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl ParseTagError {
    fn new(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

impl fmt::Display for ParseTagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}'; expected {}", self.kind, self.value, self.expected)
    }
}

impl Error for ParseTagError {}

/// Backend selector attached to a catalog step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTag {
    Serverless,
    Cluster,
    #[default]
    Both,
}

impl BackendTag {
    /// Returns true when a step carrying this tag belongs to a run on `backend`.
    pub fn matches(&self, backend: Backend) -> bool {
        match self {
            BackendTag::Both => true,
            BackendTag::Serverless => backend == Backend::Serverless,
            BackendTag::Cluster => backend == Backend::Cluster,
        }
    }
}

/// Operation selector attached to a catalog step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationTag {
    Create,
    Update,
    #[default]
    Both,
}

impl OperationTag {
    pub fn matches(&self, operation: Operation) -> bool {
        match self {
            OperationTag::Both => true,
            OperationTag::Create => operation == Operation::Create,
            OperationTag::Update => operation == Operation::Update,
        }
    }
}

/// Declarative validation rules applied to collected field values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputValidation {
    /// Whether an empty value is rejected.
    #[serde(default)]
    pub required: bool,
    /// Enumerated set of allowed values, if constrained.
    #[serde(rename = "enum")]
    #[serde(default)]
    pub allowed_values: Vec<JsonValue>,
    /// Regular expression the value must match.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl InputValidation {
    /// Validation that only rejects empty values.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_length(mut self, min_length: Option<usize>, max_length: Option<usize>) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }
}

/// Describes one operator-supplied value a step needs before it can run.
///
/// Field values are shared across steps by `name`: once a field is resolved
/// during a run, every later step declaring the same field reuses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFieldSpec {
    /// Key under which the value is stored in the run context.
    pub name: String,
    /// Question shown to the operator.
    pub prompt: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Default value; string defaults may contain `${{ inputs.<field> }}` templates.
    #[serde(default)]
    pub default: Option<JsonValue>,
    /// Masked when collected and never written to a progress record.
    #[serde(default)]
    pub secret: bool,
    /// The operator must type the value twice.
    #[serde(default)]
    pub confirm: bool,
    /// When false, the interpolated default is used without asking.
    #[serde(default = "default_interactive")]
    pub interactive: bool,
    #[serde(default)]
    pub validate: Option<InputValidation>,
}

fn default_interactive() -> bool {
    true
}

impl InputFieldSpec {
    /// A plain interactive text field.
    pub fn text(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            description: None,
            default: None,
            secret: false,
            confirm: false,
            interactive: true,
            validate: None,
        }
    }

    /// A secret field that is masked, confirmed, and never persisted.
    pub fn secret(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        let mut field = Self::text(name, prompt);
        field.secret = true;
        field.confirm = true;
        field
    }

    /// A field computed from other fields without asking the operator.
    pub fn derived(name: impl Into<String>, template: impl Into<String>) -> Self {
        let name = name.into();
        let mut field = Self::text(name.clone(), name);
        field.default = Some(JsonValue::String(template.into()));
        field.interactive = false;
        field
    }

    pub fn with_default(mut self, default: impl Into<JsonValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_validation(mut self, validation: InputValidation) -> Self {
        self.validate = Some(validation);
        self
    }
}

/// Per-step state reported through progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    /// Already completed in a prior run and confirmed by the idempotency probe.
    Skipped,
    Succeeded,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Skipped => "skipped",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Overall state of a run as recorded in progress records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunStatus::InProgress => "in progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Progress notification emitted before and after each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    /// One-based position of the step within the workflow.
    pub index: usize,
    pub total: usize,
    pub step_key: String,
    pub label: String,
    pub status: StepStatus,
    /// Failure reason or other short note for the operator.
    #[serde(default)]
    pub detail: Option<String>,
}
