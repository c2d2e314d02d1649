//! Persistence of completed-step state, keyed by project identifier.
//!
//! A [`ProgressRecord`] is written after every successful step. Records are
//! append-only with respect to create-run completions: a completed step is
//! never marked uncompleted. Update runs track their completions per cycle so
//! each new update re-runs its steps while an interrupted one resumes.

use std::{
    collections::{HashMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use dirs_next::config_dir;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skyward_types::{Backend, Operation, RunStatus};
use skyward_util::expand_tilde;

use crate::error::ProgressStoreError;

/// Environment variable overriding where progress records are kept.
pub const STATE_DIR_ENV: &str = "SKYWARD_STATE_DIR";

pub const PROGRESS_SCHEMA_VERSION: u32 = 1;

/// Result of one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub result: Value,
    pub completed_at: DateTime<Utc>,
}

/// Completions of the current update run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateCycle {
    /// Starts at 1 and increases each time a finished cycle is followed by a new update.
    pub cycle: u32,
    pub finished: bool,
    #[serde(default)]
    pub completed: IndexMap<String, CompletedStep>,
}

/// Outcome of the most recent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMarker {
    pub operation: Operation,
    pub status: RunStatus,
    #[serde(default)]
    pub failed_step: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub at: DateTime<Utc>,
}

/// Everything remembered about one project between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub schema_version: u32,
    pub project_id: String,
    pub backend: Backend,
    /// Resolved non-secret field values.
    #[serde(default)]
    pub inputs: serde_json::Map<String, Value>,
    /// Completions from create runs, in completion order.
    #[serde(default)]
    pub completed: IndexMap<String, CompletedStep>,
    #[serde(default)]
    pub update: Option<UpdateCycle>,
    #[serde(default)]
    pub last_run: Option<RunMarker>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(project_id: impl Into<String>, backend: Backend) -> Self {
        Self {
            schema_version: PROGRESS_SCHEMA_VERSION,
            project_id: project_id.into(),
            backend,
            inputs: serde_json::Map::new(),
            completed: IndexMap::new(),
            update: None,
            last_run: None,
            updated_at: Utc::now(),
        }
    }

    /// Completions relevant to `operation`.
    pub fn completions(&self, operation: Operation) -> Option<&IndexMap<String, CompletedStep>> {
        match operation {
            Operation::Create => Some(&self.completed),
            Operation::Update => self.update.as_ref().map(|cycle| &cycle.completed),
        }
    }

    pub fn is_completed(&self, operation: Operation, step_key: &str) -> bool {
        self.completions(operation).is_some_and(|completed| completed.contains_key(step_key))
    }

    pub fn completed_result(&self, operation: Operation, step_key: &str) -> Option<&Value> {
        self.completions(operation)
            .and_then(|completed| completed.get(step_key))
            .map(|step| &step.result)
    }

    pub fn record_completion(&mut self, operation: Operation, step_key: &str, result: Value) {
        let completed = CompletedStep {
            result,
            completed_at: Utc::now(),
        };
        match operation {
            Operation::Create => {
                self.completed.insert(step_key.to_string(), completed);
            }
            Operation::Update => {
                self.update
                    .get_or_insert_with(|| UpdateCycle {
                        cycle: 1,
                        ..UpdateCycle::default()
                    })
                    .completed
                    .insert(step_key.to_string(), completed);
            }
        }
        self.touch();
    }

    /// Resume the unfinished update cycle or start a new one. Returns the cycle number.
    pub fn begin_update_cycle(&mut self) -> u32 {
        if let Some(cycle) = &mut self.update {
            if cycle.finished {
                cycle.cycle += 1;
                cycle.finished = false;
                cycle.completed.clear();
            }
            return cycle.cycle;
        }
        self.update = Some(UpdateCycle {
            cycle: 1,
            ..UpdateCycle::default()
        });
        1
    }

    pub fn finish_update_cycle(&mut self) {
        if let Some(cycle) = &mut self.update {
            cycle.finished = true;
        }
        self.touch();
    }

    /// Merge `inputs` into the remembered values, skipping the named secret fields.
    pub fn remember_inputs<'a>(&mut self, inputs: &serde_json::Map<String, Value>, secret_fields: impl IntoIterator<Item = &'a str>) {
        let secret_fields: HashSet<&str> = secret_fields.into_iter().collect();
        for (name, value) in inputs {
            if !secret_fields.contains(name.as_str()) {
                self.inputs.insert(name.clone(), value.clone());
            }
        }
    }

    pub fn mark_run(&mut self, operation: Operation, status: RunStatus, failed_step: Option<String>, endpoint: Option<String>) {
        self.last_run = Some(RunMarker {
            operation,
            status,
            failed_step,
            endpoint,
            at: Utc::now(),
        });
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Storage for progress records.
pub trait ProgressStore: Send + Sync {
    /// Load the record for `project_id`, or `None` when nothing was recorded yet.
    fn load(&self, project_id: &str) -> Result<Option<ProgressRecord>, ProgressStoreError>;

    /// Durably replace the record for `project_id`.
    fn save(&self, project_id: &str, record: &ProgressRecord) -> Result<(), ProgressStoreError>;

    /// Project identifiers with a stored record, sorted.
    fn list(&self) -> Result<Vec<String>, ProgressStoreError>;
}

/// One pretty-printed JSON file per project inside a directory.
pub struct JsonProgressStore {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonProgressStore {
    /// Create a store rooted at `directory` (or the default directory when omitted).
    pub fn new<P: Into<Option<PathBuf>>>(directory: P) -> Self {
        let directory = match directory.into() {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => default_progress_dir(),
        };
        Self {
            directory,
            write_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn record_path(&self, project_id: &str) -> Result<PathBuf, ProgressStoreError> {
        if !is_storable_project_id(project_id) {
            return Err(ProgressStoreError::InvalidProjectId(project_id.to_string()));
        }
        Ok(self.directory.join(format!("{project_id}.json")))
    }
}

impl ProgressStore for JsonProgressStore {
    fn load(&self, project_id: &str) -> Result<Option<ProgressRecord>, ProgressStoreError> {
        let path = self.record_path(project_id)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(ProgressStoreError::Io(error)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ProgressStoreError::Corrupt { path, source })
    }

    fn save(&self, project_id: &str, record: &ProgressRecord) -> Result<(), ProgressStoreError> {
        let path = self.record_path(project_id)?;
        let _guard = self.write_lock.lock().expect("progress store lock poisoned");
        fs::create_dir_all(&self.directory)?;

        let content = serde_json::to_string_pretty(record)?;
        let staging = self.directory.join(format!(".{project_id}.json.tmp"));
        fs::write(&staging, content)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, ProgressStoreError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(ProgressStoreError::Io(error)),
        };
        let mut projects = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|extension| extension == "json")
                && let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
                && is_storable_project_id(stem)
            {
                projects.push(stem.to_string());
            }
        }
        projects.sort();
        Ok(projects)
    }
}

/// Volatile store used by tests and previews.
#[derive(Default)]
pub struct InMemoryProgressStore {
    records: Mutex<HashMap<String, ProgressRecord>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the stored record, if any.
    pub fn snapshot(&self, project_id: &str) -> Option<ProgressRecord> {
        self.records.lock().expect("progress store lock poisoned").get(project_id).cloned()
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn load(&self, project_id: &str) -> Result<Option<ProgressRecord>, ProgressStoreError> {
        Ok(self.snapshot(project_id))
    }

    fn save(&self, project_id: &str, record: &ProgressRecord) -> Result<(), ProgressStoreError> {
        self.records
            .lock()
            .expect("progress store lock poisoned")
            .insert(project_id.to_string(), record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, ProgressStoreError> {
        let mut projects: Vec<String> = self.records.lock().expect("progress store lock poisoned").keys().cloned().collect();
        projects.sort();
        Ok(projects)
    }
}

/// Directory holding progress records: `SKYWARD_STATE_DIR`, else `<config dir>/skyward/progress`.
pub fn default_progress_dir() -> PathBuf {
    if let Ok(path) = env::var(STATE_DIR_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skyward")
        .join("progress")
}

fn is_storable_project_id(project_id: &str) -> bool {
    !project_id.is_empty()
        && !project_id.starts_with('.')
        && project_id
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | '.'))
}
