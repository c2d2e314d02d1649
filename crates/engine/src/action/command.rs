//! Actions that run external programs, typically a cloud provider CLI.
//!
//! Arguments, environment values and result templates use the `${{ ... }}`
//! syntax from [`crate::resolve`]. Each call is bounded by a timeout; an
//! expired call kills the child process and fails the step.

use std::{process::Stdio, time::Duration};

use anyhow::{Context, anyhow, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use skyward_util::{block_on_future, parse_duration, redact_with_secrets, run_with_timeout};
use tracing::{debug, warn};

use super::{Action, ProbeOutcome, StepInput};
use crate::resolve::{RunContext, try_interpolate_string};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

const STDERR_TAIL_LINES: usize = 20;

/// How a command's stdout becomes a step result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// `{"stdout": "..."}`.
    #[default]
    Text,
    /// Parsed JSON; empty output is `null`.
    Json,
}

/// Configuration for one command-backed action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandActionSpec {
    /// Program and arguments to perform the work.
    pub run: Vec<String>,
    /// Program and arguments whose success means the work is already done.
    #[serde(default)]
    pub probe: Option<Vec<String>>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Duration such as `30s`, `15m` or `1h`.
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub output: OutputFormat,
    /// Result fields computed from the parsed output, which is visible as `steps.<this step>`.
    #[serde(default)]
    pub result: IndexMap<String, String>,
}

/// [`Action`] implementation backed by a child process.
#[derive(Debug, Clone)]
pub struct CommandAction {
    spec: CommandActionSpec,
    timeout: Duration,
}

struct CommandOutput {
    success: bool,
    status: String,
    stdout: String,
    stderr: String,
}

impl CommandAction {
    pub fn new(spec: CommandActionSpec) -> anyhow::Result<Self> {
        if spec.run.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("command action requires a non-empty 'run' list");
        }
        if let Some(probe) = &spec.probe
            && probe.first().is_none_or(|program| program.trim().is_empty())
        {
            bail!("command action 'probe' must name a program");
        }
        let timeout = match spec.timeout.as_deref() {
            Some(text) => parse_duration(text).ok_or_else(|| anyhow!("invalid timeout '{}'", text))?,
            None => DEFAULT_COMMAND_TIMEOUT,
        };
        Ok(Self { spec, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Context in which templates see the step's own input values.
    fn scoped_context(input: &StepInput, context: &RunContext) -> RunContext {
        let mut scoped = context.clone();
        for (name, value) in &input.values {
            scoped.inputs.insert(name.clone(), value.clone());
        }
        scoped
    }

    fn render_argv(argv: &[String], context: &RunContext) -> anyhow::Result<Vec<String>> {
        argv.iter()
            .map(|argument| {
                try_interpolate_string(argument, context).map_err(|expression| anyhow!("argument '{}' refers to unknown value '{}'", argument, expression))
            })
            .collect()
    }

    fn render_env(&self, context: &RunContext) -> anyhow::Result<Vec<(String, String)>> {
        self.spec
            .env
            .iter()
            .map(|(name, template)| {
                try_interpolate_string(template, context)
                    .map(|value| (name.clone(), value))
                    .map_err(|expression| anyhow!("environment variable {} refers to unknown value '{}'", name, expression))
            })
            .collect()
    }

    fn run_command(&self, argv: Vec<String>, env: Vec<(String, String)>, secrets: &[String]) -> anyhow::Result<CommandOutput> {
        let command_line = redact_with_secrets(&argv.join(" "), secrets);
        debug!(command = %command_line, timeout_secs = self.timeout.as_secs(), "running command");

        let timeout = self.timeout;
        let working_dir = self.spec.working_dir.clone();
        block_on_future(async move {
            let (program, arguments) = argv.split_first().ok_or_else(|| anyhow!("empty command"))?;
            let mut command = tokio::process::Command::new(program);
            command
                .args(arguments)
                .envs(env)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(directory) = working_dir {
                command.current_dir(directory);
            }
            let child = command.spawn().with_context(|| format!("failed to start '{}'", program))?;
            let output = run_with_timeout(
                async move { child.wait_with_output().await.map_err(anyhow::Error::from) },
                timeout,
                &command_line,
            )
            .await?;
            Ok(CommandOutput {
                success: output.status.success(),
                status: output.status.to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }

    fn parse_stdout(&self, stdout: &str) -> anyhow::Result<Value> {
        match self.spec.output {
            OutputFormat::Json if stdout.trim().is_empty() => Ok(Value::Null),
            OutputFormat::Json => serde_json::from_str(stdout).context("command output is not valid JSON"),
            OutputFormat::Text => Ok(json!({ "stdout": stdout.trim_end() })),
        }
    }

    /// Apply `result` templates on top of the parsed output.
    fn shape_result(&self, step_key: &str, parsed: Value, context: &RunContext) -> anyhow::Result<Value> {
        if self.spec.result.is_empty() {
            return Ok(parsed);
        }
        let mut scoped = context.clone();
        scoped.steps.insert(step_key.to_string(), parsed.clone());

        let mut shaped = serde_json::Map::new();
        for (field, template) in &self.spec.result {
            let value = try_interpolate_string(template, &scoped)
                .map_err(|expression| anyhow!("result field '{}' refers to missing value '{}'", field, expression))?;
            shaped.insert(field.clone(), Value::String(value));
        }
        shaped.insert("output".into(), parsed);
        Ok(Value::Object(shaped))
    }
}

impl Action for CommandAction {
    fn execute(&self, input: &StepInput, context: &RunContext) -> anyhow::Result<Value> {
        let scoped = Self::scoped_context(input, context);
        let argv = Self::render_argv(&self.spec.run, &scoped)?;
        let env = self.render_env(&scoped)?;
        let secrets = input.secret_values();
        let command_line = redact_with_secrets(&argv.join(" "), &secrets);

        let output = self.run_command(argv, env, &secrets)?;
        if !output.success {
            bail!(
                "`{}` exited with {}: {}",
                command_line,
                output.status,
                redact_with_secrets(&stderr_tail(&output.stderr), &secrets)
            );
        }

        let parsed = self.parse_stdout(&output.stdout)?;
        self.shape_result(&input.step_key, parsed, &scoped)
    }

    fn probe(&self, input: &StepInput, context: &RunContext) -> anyhow::Result<ProbeOutcome> {
        let Some(probe) = &self.spec.probe else {
            return Ok(ProbeOutcome::Absent);
        };
        let scoped = Self::scoped_context(input, context);
        let (argv, env) = match (Self::render_argv(probe, &scoped), self.render_env(&scoped)) {
            (Ok(argv), Ok(env)) => (argv, env),
            (Err(error), _) | (_, Err(error)) => {
                warn!(step = %input.step_key, error = %error, "probe cannot be rendered with the values available; treating as absent");
                return Ok(ProbeOutcome::Absent);
            }
        };

        let output = self.run_command(argv, env, &input.secret_values())?;
        if !output.success {
            debug!(step = %input.step_key, status = %output.status, "probe reports target absent");
            return Ok(ProbeOutcome::Absent);
        }
        let parsed = self
            .parse_stdout(&output.stdout)
            .unwrap_or_else(|_| json!({ "stdout": output.stdout.trim_end() }));
        match self.shape_result(&input.step_key, parsed, &scoped) {
            Ok(result) => Ok(ProbeOutcome::Satisfied(result)),
            Err(error) => {
                warn!(step = %input.step_key, error = %error, "probe output lacks result fields; treating as absent");
                Ok(ProbeOutcome::Absent)
            }
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join("\n");
    if tail.is_empty() { "no error output".to_string() } else { tail }
}
