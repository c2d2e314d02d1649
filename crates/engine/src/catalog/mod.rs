//! Step catalog and workflow assembly.
//!
//! A [`Catalog`] is the static, validated set of every step the tool knows
//! about. [`Catalog::build_workflow`] selects the steps whose backend and
//! operation tags match a run and orders them topologically.

use indexmap::IndexMap;
use skyward_types::{Backend, BackendTag, InputFieldSpec, Operation, OperationTag};

use crate::error::CatalogError;

pub mod planning;
pub mod standard;

pub use planning::order_steps;
pub use standard::standard_catalog;

/// How a step treats a target that already exists when the run reuses an existing project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    /// The target must already exist; the step is never executed in such a run.
    Required,
    /// An existing target is adopted; otherwise the step runs as usual.
    IfPresent,
}

/// Static description of one step. Never mutated at run time.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    /// Stable key, unique within a catalog.
    pub key: String,
    /// Human-readable progress label.
    pub label: String,
    /// Key of the action implementation this step invokes.
    pub action: String,
    pub depends_on: Vec<String>,
    pub backend: BackendTag,
    pub operation: OperationTag,
    /// Input fields collected before the step runs.
    pub inputs: Vec<InputFieldSpec>,
    /// The step's result carries the externally reachable endpoint.
    pub provides_endpoint: bool,
    pub adoption: Option<Adoption>,
}

impl StepDefinition {
    /// New step tagged for every backend and operation, invoking the action named after its key.
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            action: key.clone(),
            key,
            label: label.into(),
            depends_on: Vec::new(),
            backend: BackendTag::Both,
            operation: OperationTag::Both,
            inputs: Vec::new(),
            provides_endpoint: false,
            adoption: None,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn backend(mut self, backend: BackendTag) -> Self {
        self.backend = backend;
        self
    }

    pub fn operation(mut self, operation: OperationTag) -> Self {
        self.operation = operation;
        self
    }

    pub fn input(mut self, field: InputFieldSpec) -> Self {
        self.inputs.push(field);
        self
    }

    pub fn provides_endpoint(mut self) -> Self {
        self.provides_endpoint = true;
        self
    }

    pub fn adopts_existing(mut self, adoption: Adoption) -> Self {
        self.adoption = Some(adoption);
        self
    }

    /// Returns true when the step belongs to a run for `backend` and `operation`.
    pub fn selected_for(&self, backend: Backend, operation: Operation) -> bool {
        self.backend.matches(backend) && self.operation.matches(operation)
    }
}

/// Validated, declaration-ordered collection of steps.
#[derive(Debug, Clone)]
pub struct Catalog {
    steps: Vec<StepDefinition>,
    fields: IndexMap<String, InputFieldSpec>,
}

impl Catalog {
    /// Validate the step graph and field declarations.
    ///
    /// The whole catalog must be a DAG; a field name declared by several
    /// steps must carry the same definition everywhere.
    pub fn new(steps: Vec<StepDefinition>) -> Result<Self, CatalogError> {
        order_steps(&steps, |_| true)?;

        let mut fields: IndexMap<String, InputFieldSpec> = IndexMap::new();
        for step in &steps {
            for field in &step.inputs {
                match fields.get(&field.name) {
                    Some(existing) if existing != field => {
                        return Err(CatalogError::ConflictingField {
                            field: field.name.clone(),
                            step: step.key.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        fields.insert(field.name.clone(), field.clone());
                    }
                }
            }
        }

        Ok(Self { steps, fields })
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step(&self, key: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.key == key)
    }

    /// Every distinct input field in declaration order.
    pub fn fields(&self) -> &IndexMap<String, InputFieldSpec> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&InputFieldSpec> {
        self.fields.get(name)
    }

    /// Select and order the steps for one run.
    ///
    /// A step is selected when its backend tag is `both` or the requested
    /// backend and its operation tag is `both` or the requested operation.
    pub fn build_workflow(&self, backend: Backend, operation: Operation) -> Result<Workflow, CatalogError> {
        let order = order_steps(&self.steps, |step| step.selected_for(backend, operation))?;
        if order.is_empty() {
            return Err(CatalogError::EmptyWorkflow { backend, operation });
        }
        Ok(Workflow {
            backend,
            operation,
            steps: order.into_iter().map(|index| self.steps[index].clone()).collect(),
        })
    }
}

/// Ordered, filtered steps for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub backend: Backend,
    pub operation: Operation,
    pub steps: Vec<StepDefinition>,
}

impl Workflow {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.key.as_str()).collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.steps.iter().any(|step| step.key == key)
    }

    /// Last step flagged as providing the public endpoint.
    pub fn endpoint_step(&self) -> Option<&StepDefinition> {
        self.steps.iter().rev().find(|step| step.provides_endpoint)
    }

    /// Dependencies named by workflow steps that are not themselves part of the workflow.
    pub fn external_dependencies(&self) -> Vec<&str> {
        let mut external: Vec<&str> = Vec::new();
        for dependency in self.steps.iter().flat_map(|step| step.depends_on.iter()) {
            if !self.contains(dependency) && !external.contains(&dependency.as_str()) {
                external.push(dependency.as_str());
            }
        }
        external
    }
}
