//! Operator configuration: where progress lives, preset answers, and the
//! command each step's action runs.
//!
//! ```yaml
//! state_dir: ~/.skyward/progress
//! max_prompt_attempts: 5
//! inputs:
//!   region: europe-west1
//! actions:
//!   create_project:
//!     run: ["gcloud", "projects", "create", "${{ inputs.project_id }}"]
//!     probe: ["gcloud", "projects", "describe", "${{ inputs.project_id }}", "--format=json"]
//!     output: json
//! ```

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use dirs_next::config_dir;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skyward_util::expand_tilde;

use crate::{
    action::{ActionRegistry, CommandAction, CommandActionSpec},
    inputs::DEFAULT_MAX_PROMPT_ATTEMPTS,
    progress::default_progress_dir,
};

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "SKYWARD_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Directory for progress records.
    #[serde(default)]
    pub state_dir: Option<String>,
    #[serde(default)]
    pub max_prompt_attempts: Option<usize>,
    /// Preset answers keyed by field name.
    #[serde(default)]
    pub inputs: serde_json::Map<String, Value>,
    /// Command actions keyed by action name.
    #[serde(default)]
    pub actions: IndexMap<String, CommandActionSpec>,
}

impl DeployConfig {
    pub fn progress_dir(&self) -> PathBuf {
        match self.state_dir.as_deref() {
            Some(directory) if !directory.trim().is_empty() => expand_tilde(directory),
            _ => default_progress_dir(),
        }
    }

    pub fn max_prompt_attempts(&self) -> usize {
        self.max_prompt_attempts.unwrap_or(DEFAULT_MAX_PROMPT_ATTEMPTS)
    }

    /// Build command actions for every configured entry.
    pub fn build_actions(&self) -> Result<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        for (name, spec) in &self.actions {
            let action = CommandAction::new(spec.clone()).with_context(|| format!("invalid action '{}'", name))?;
            registry.register(name.clone(), action);
        }
        Ok(registry)
    }
}

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("skyward").join("config.yaml")
}

/// Load configuration from `path`, or the default path when omitted. A missing file yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<DeployConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    load_config_from_path(&path)
}

pub fn load_config_from_path(path: &Path) -> Result<DeployConfig> {
    if !path.exists() {
        return Ok(DeployConfig::default());
    }
    let content = fs::read_to_string(path).with_context(|| format!("failed to read configuration at {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(DeployConfig::default());
    }
    serde_yaml::from_str(&content).with_context(|| format!("invalid configuration at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("absent.yaml")).expect("load");
        assert_eq!(config, DeployConfig::default());
        assert_eq!(config.max_prompt_attempts(), DEFAULT_MAX_PROMPT_ATTEMPTS);
    }

    #[test]
    fn parses_inputs_and_actions() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
state_dir: /var/lib/skyward
max_prompt_attempts: 3
inputs:
  region: europe-west1
actions:
  create_project:
    run: ["gcloud", "projects", "create", "${{ inputs.project_id }}"]
    timeout: 5m
"#,
        )
        .expect("write");

        let config = load_config_from_path(&path).expect("load");
        assert_eq!(config.progress_dir(), PathBuf::from("/var/lib/skyward"));
        assert_eq!(config.max_prompt_attempts(), 3);
        assert_eq!(config.inputs.get("region"), Some(&Value::String("europe-west1".into())));

        let registry = config.build_actions().expect("actions");
        assert!(registry.contains("create_project"));
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, "actions: [not, a, map]").expect("write");

        let error = load_config_from_path(&path).expect_err("malformed");
        assert!(error.to_string().contains("config.yaml"), "unexpected error: {error}");
    }

    #[test]
    fn invalid_action_is_reported_by_name() {
        let mut config = DeployConfig::default();
        config.actions.insert("build_image".into(), CommandActionSpec::default());
        let error = config.build_actions().expect_err("empty run");
        assert!(error.to_string().contains("build_image"), "unexpected error: {error}");
    }

    #[test]
    fn sample_configuration_covers_the_standard_catalog() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/skyward.example.yaml");
        let config = load_config_from_path(&path).expect("sample configuration");
        let registry = config.build_actions().expect("sample actions");
        let catalog = crate::catalog::standard_catalog().expect("catalog");
        for step in catalog.steps() {
            assert!(registry.contains(&step.action), "no sample action for {}", step.action);
        }
    }

    #[test]
    fn default_path_honors_environment_override() {
        temp_env::with_var(CONFIG_PATH_ENV, Some("~/custom/skyward.yaml"), || {
            assert_eq!(default_config_path(), expand_tilde("~/custom/skyward.yaml"));
        });
    }
}
