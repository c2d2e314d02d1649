use std::{collections::HashMap, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use skyward_engine::{
    CancellationToken, DeployConfig, Engine, EngineError, JsonProgressStore, NonInteractivePrompter, ProgressRecord, ProgressStore,
    Prompter, RunSummary, load_config, standard_catalog,
};
use skyward_types::{Backend, Operation, StepStatus};
use skyward_util::expand_tilde;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod console;

use console::{ConsoleObserver, ConsolePrompter};

/// Deploy a web application to a serverless platform or a managed container cluster.
#[derive(Parser, Debug)]
#[command(name = "skyward", version, about)]
struct Cli {
    /// Configuration file (defaults to $SKYWARD_CONFIG_PATH or <config dir>/skyward/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision a new deployment, resuming an interrupted one for the same project
    New {
        /// Deploy into a project that already exists instead of creating it
        #[arg(long)]
        use_existing_project: bool,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Redeploy application changes to an existing deployment
    Update {
        /// Project the deployment lives in
        #[arg(long)]
        project_id: String,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Print the ordered steps a run would execute
    Plan {
        #[arg(long)]
        backend: Backend,

        #[arg(long, default_value = "create")]
        operation: Operation,
    },
    /// Show recorded progress for a project, or list recorded projects
    Status {
        #[arg(long)]
        project_id: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Target backend: serverless or cluster
    #[arg(long)]
    backend: Backend,

    /// Preset a field value, skipping its prompt (repeatable)
    #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_preset)]
    presets: Vec<(String, Value)>,

    /// Accept defaults and fail on fields without one
    #[arg(long)]
    non_interactive: bool,
}

enum Target {
    Create { use_existing_project: bool },
    Update(String),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.map(|path| expand_tilde(&path.to_string_lossy())).as_deref())?;

    match cli.command {
        Commands::New { use_existing_project, run } => deploy(config, Target::Create { use_existing_project }, run).await,
        Commands::Update { project_id, run } => deploy(config, Target::Update(project_id), run).await,
        Commands::Plan { backend, operation } => plan(backend, operation),
        Commands::Status { project_id } => status(&config, project_id.as_deref()),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn parse_preset(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("field name must not be empty".into());
    }
    Ok((name.to_string(), Value::String(value.to_string())))
}

/// First Ctrl-C cancels after the running step; a second one exits.
fn watch_interrupts(cancellation: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        cancellation.cancel();
        eprintln!("\nStopping after the current step. Press Ctrl-C again to abort immediately.");
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = crossterm::terminal::disable_raw_mode();
            std::process::exit(130);
        }
    });
}

async fn deploy(config: DeployConfig, target: Target, run: RunArgs) -> Result<ExitCode> {
    let catalog = standard_catalog()?;
    let actions = config.build_actions()?;
    let store = JsonProgressStore::new(config.progress_dir());
    debug!(directory = %store.directory().display(), "progress store");

    let mut presets = config.inputs.clone();
    presets.extend(run.presets);
    let max_attempts = config.max_prompt_attempts();
    let backend = run.backend;
    let non_interactive = run.non_interactive;

    let cancellation = CancellationToken::new();
    watch_interrupts(cancellation.clone());

    let outcome = tokio::task::spawn_blocking(move || {
        let mut prompter: Box<dyn Prompter> = if non_interactive {
            Box::new(NonInteractivePrompter::new())
        } else {
            Box::new(ConsolePrompter::new())
        };
        let mut observer = ConsoleObserver;
        let environment: HashMap<String, String> = std::env::vars().collect();
        let existing_project = matches!(target, Target::Create { use_existing_project: true });
        let mut engine = Engine::new(&catalog, &actions, &store, &mut *prompter)
            .with_presets(presets)
            .with_max_prompt_attempts(max_attempts)
            .with_environment(environment)
            .with_cancellation(cancellation)
            .with_existing_project(existing_project)
            .with_observer(&mut observer);
        match &target {
            Target::Create { .. } => engine.run_create(backend),
            Target::Update(project_id) => engine.run_update(project_id, backend),
        }
    })
    .await
    .context("deployment task ended unexpectedly")?;

    Ok(report(outcome))
}

fn report(outcome: Result<RunSummary, EngineError>) -> ExitCode {
    match outcome {
        Ok(summary) => {
            println!(
                "{} finished for {}: {} step(s) run, {} already done.",
                summary.operation,
                summary.project_id,
                summary.count(StepStatus::Succeeded),
                summary.count(StepStatus::Skipped)
            );
            if let Some(url) = summary.endpoint {
                println!("Your app is running at {url}.");
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {error}");
            if error.is_resumable() {
                eprintln!("Completed steps were saved. Run the same command again to resume from where it stopped.");
            }
            match error {
                EngineError::Cancelled { .. } => ExitCode::from(130),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn plan(backend: Backend, operation: Operation) -> Result<ExitCode> {
    let workflow = standard_catalog()?.build_workflow(backend, operation)?;
    let total = workflow.len();
    for (position, step) in workflow.steps.iter().enumerate() {
        println!("[{}/{}]: {} ({})", position + 1, total, step.label, step.key);
    }
    Ok(ExitCode::SUCCESS)
}

fn status(config: &DeployConfig, project_id: Option<&str>) -> Result<ExitCode> {
    let store = JsonProgressStore::new(config.progress_dir());
    let Some(project_id) = project_id else {
        let projects = store.list()?;
        if projects.is_empty() {
            println!("No deployments recorded in {}.", store.directory().display());
        }
        for project in projects {
            println!("{project}");
        }
        return Ok(ExitCode::SUCCESS);
    };

    match store.load(project_id)? {
        Some(record) => {
            print!("{}", describe_record(&record));
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No progress recorded for '{project_id}'.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn describe_record(record: &ProgressRecord) -> String {
    let mut out = format!("Project:  {}\nBackend:  {}\n", record.project_id, record.backend);
    if let Some(run) = &record.last_run {
        out.push_str(&format!("Last run: {} {} at {}\n", run.operation, run.status, run.at.to_rfc3339()));
        if let Some(step) = &run.failed_step {
            out.push_str(&format!("Stopped:  {step}\n"));
        }
        if let Some(endpoint) = &run.endpoint {
            out.push_str(&format!("Endpoint: {endpoint}\n"));
        }
    }
    out.push_str("Created:\n");
    for (key, step) in &record.completed {
        out.push_str(&format!("  {key} ({})\n", step.completed_at.to_rfc3339()));
    }
    if let Some(cycle) = &record.update {
        let state = if cycle.finished { "finished" } else { "in progress" };
        out.push_str(&format!("Update cycle {} ({state}):\n", cycle.cycle));
        for key in cycle.completed.keys() {
            out.push_str(&format!("  {key}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn presets_split_on_first_equals() {
        assert_eq!(
            parse_preset("database_url=postgres://u:p@h/db?x=1").expect("preset"),
            ("database_url".to_string(), json!("postgres://u:p@h/db?x=1"))
        );
        assert_eq!(parse_preset("region=").expect("preset"), ("region".to_string(), json!("")));
        assert!(parse_preset("region").is_err());
        assert!(parse_preset("=us-west1").is_err());
    }

    #[test]
    fn update_requires_project_and_backend() {
        let cli = Cli::try_parse_from(["skyward", "update", "--project-id", "my-project-42", "--backend", "gke", "--set", "app_name=blog"])
            .expect("valid arguments");
        match cli.command {
            Commands::Update { project_id, run } => {
                assert_eq!(project_id, "my-project-42");
                assert_eq!(run.backend, Backend::Cluster);
                assert_eq!(run.presets, vec![("app_name".to_string(), json!("blog"))]);
                assert!(!run.non_interactive);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["skyward", "update", "--backend", "cluster"]).is_err());
    }

    #[test]
    fn new_accepts_existing_project() {
        let cli = Cli::try_parse_from(["skyward", "new", "--backend", "serverless", "--use-existing-project"]).expect("valid arguments");
        match cli.command {
            Commands::New { use_existing_project, run } => {
                assert!(use_existing_project);
                assert_eq!(run.backend, Backend::Serverless);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["skyward", "update", "--project-id", "my-project-42", "--backend", "gae", "--use-existing-project"]).is_err());
    }

    #[test]
    fn plan_defaults_to_create() {
        let cli = Cli::try_parse_from(["skyward", "plan", "--backend", "serverless"]).expect("valid arguments");
        assert!(matches!(
            cli.command,
            Commands::Plan {
                backend: Backend::Serverless,
                operation: Operation::Create
            }
        ));
    }

    #[test]
    fn status_lists_recorded_steps() {
        let mut record = ProgressRecord::new("my-project-42", Backend::Serverless);
        record.record_completion(Operation::Create, "create_project", json!({}));
        record.mark_run(Operation::Create, skyward_types::RunStatus::Failed, Some("create_database".into()), None);

        let text = describe_record(&record);
        assert!(text.contains("Backend:  serverless"), "unexpected output: {text}");
        assert!(text.contains("Stopped:  create_database"), "unexpected output: {text}");
        assert!(text.contains("  create_project ("), "unexpected output: {text}");
    }
}
