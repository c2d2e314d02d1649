//! # Skyward Engine
//!
//! Provisions and updates a web application's cloud runtime by driving a
//! dependency-ordered pipeline of steps, idempotently and resumably, on either
//! a serverless platform or a managed container cluster.
//!
//! ## Architecture
//!
//! - **`catalog`**: static step definitions, backend/operation tags, and
//!   deterministic workflow assembly
//! - **`action`**: the boundary to external work, plus command-backed actions
//! - **`inputs`**: field resolution and the prompt collaborator interface
//! - **`progress`**: per-project progress records and their stores
//! - **`executor`**: the run loop with probe-based skipping and resumption
//! - **`config`**: operator configuration
//!
//! ## Usage
//!
//! ```rust
//! use skyward_engine::{ActionRegistry, Catalog, Engine, InMemoryProgressStore, NonInteractivePrompter, StepDefinition};
//! use skyward_engine::action::{Action, StepInput};
//! use skyward_engine::resolve::RunContext;
//! use skyward_types::{Backend, InputFieldSpec};
//! use serde_json::{Value, json};
//!
//! struct Deploy;
//! impl Action for Deploy {
//!     fn execute(&self, input: &StepInput, _context: &RunContext) -> anyhow::Result<Value> {
//!         Ok(json!({ "url": format!("https://{}.example.com", input.require_str("project_id")?) }))
//!     }
//! }
//!
//! let catalog = Catalog::new(vec![
//!     StepDefinition::new("deploy", "Deploying")
//!         .input(InputFieldSpec::text("project_id", "Project ID").with_default("demo-project"))
//!         .provides_endpoint(),
//! ])?;
//! let mut actions = ActionRegistry::new();
//! actions.register("deploy", Deploy);
//! let store = InMemoryProgressStore::new();
//! let mut prompter = NonInteractivePrompter::new();
//!
//! let summary = Engine::new(&catalog, &actions, &store, &mut prompter).run_create(Backend::Serverless)?;
//! assert_eq!(summary.endpoint.as_deref(), Some("https://demo-project.example.com"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod action;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod inputs;
pub mod progress;
pub mod resolve;

pub use action::{Action, ActionRegistry, CommandAction, CommandActionSpec, ProbeOutcome, StepInput};
pub use catalog::{Adoption, Catalog, StepDefinition, Workflow, standard_catalog};
pub use config::{DeployConfig, load_config};
pub use error::{CatalogError, EngineError, InputError, ProgressStoreError, PromptError, StepFailure, ValidationError};
pub use executor::{CancellationToken, Engine, ProgressObserver, RunSummary, StepReport};
pub use inputs::{InputResolver, NonInteractivePrompter, PromptRequest, Prompter};
pub use progress::{InMemoryProgressStore, JsonProgressStore, ProgressRecord, ProgressStore};
pub use resolve::RunContext;
