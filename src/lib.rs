// src/lib.rs

pub mod capability;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod jobs;
pub mod logging;
pub mod manifest;
pub mod types;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::capability::Capabilities;
use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, default_config_path, load_or_builtin};
use crate::dag::{StageRegistry, execution_order};
use crate::engine::{Orchestrator, RunOptions, Shutdown, spawn_signal_listener};
use crate::errors::SubforgeError;
use crate::exec::ProcessExecutor;
use crate::jobs::{JobId, ResetOptions, allocate, job_dir, validate_owner};
use crate::manifest::ManifestStore;

/// Settings resolved from the config file with CLI overrides applied.
#[derive(Debug, Clone)]
struct Settings {
    root: PathBuf,
    owner: String,
    capabilities: Capabilities,
}

impl Settings {
    fn resolve(cfg: &ConfigFile, args: &CliArgs) -> Result<Self> {
        let owner = args
            .owner
            .clone()
            .unwrap_or_else(|| cfg.config.owner.clone());
        validate_owner(&owner)?;

        let root = args.root.clone().unwrap_or_else(|| cfg.config.root.clone());
        let root = std::path::absolute(&root)
            .with_context(|| format!("resolving job root {}", root.display()))?;

        Ok(Self {
            root,
            owner,
            capabilities: Capabilities::from_config(&cfg.capability, args.device.as_deref()),
        })
    }

    fn job_dir(&self, job: &str) -> Result<PathBuf> {
        let id = JobId::parse(job)?;
        Ok(job_dir(&self.root, &self.owner, &id))
    }
}

/// High-level entry point used by `main.rs`.
///
/// Loads the stage registry, resolves settings and dispatches the
/// subcommand. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let (config_path, explicit) = match &args.config {
        Some(path) => (path.clone(), true),
        None => (default_config_path(), false),
    };
    let cfg = load_or_builtin(&config_path, explicit)?;
    let registry = StageRegistry::from_config(&cfg);
    let settings = Settings::resolve(&cfg, &args)?;
    debug!(?settings, stages = registry.len(), "configuration resolved");

    match args.command {
        Command::Run {
            job,
            stages,
            input,
            force,
            timeout,
            keep_going,
            quarantine_corrupt,
        } => {
            let job_dir = settings.job_dir(&job)?;
            if !job_dir.is_dir() {
                return Err(SubforgeError::JobNotFound(format!(
                    "job directory {} does not exist",
                    job_dir.display()
                ))
                .into());
            }

            if quarantine_corrupt {
                if let Some(moved) = ManifestStore::quarantine_corrupt(&job_dir)? {
                    warn!(to = %moved.display(), "corrupt manifest moved aside; starting fresh");
                }
            }

            let mut store = ManifestStore::load_or_create(&job_dir)?;
            if let Some(input) = input {
                let source = std::path::absolute(&input)
                    .with_context(|| format!("resolving input path {}", input.display()))?;
                store.set_source(source);
            }

            let mut options = RunOptions::from_config(&cfg.config, settings.capabilities.clone());
            options.force = force;
            options.keep_going |= keep_going;
            if let Some(secs) = timeout {
                if secs == 0 {
                    return Err(SubforgeError::ConfigError(
                        "--timeout must be greater than zero".to_string(),
                    )
                    .into());
                }
                options.timeout_override = Some(std::time::Duration::from_secs(secs));
            }

            let (handle, mut shutdown) = Shutdown::new();
            let _signals = spawn_signal_listener(handle);

            let mut orchestrator = Orchestrator::new(&registry, ProcessExecutor::new(), options);
            let report = orchestrator.run(&mut store, &stages, &mut shutdown).await?;
            print!("{report}");
            Ok(report.exit_code())
        }

        Command::Reset {
            job,
            stages,
            dry_run,
            cascade,
        } => {
            let report = jobs::reset(
                &settings.root,
                &settings.owner,
                &job,
                &stages,
                ResetOptions { dry_run, cascade },
                Some(&registry),
            )?;
            print!("{report}");
            Ok(0)
        }

        Command::New { date, input } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let allocated = allocate(&settings.root, date, &settings.owner)?;

            if let Some(input) = input {
                let source = std::path::absolute(&input)
                    .with_context(|| format!("resolving input path {}", input.display()))?;
                let mut store = ManifestStore::load_or_create(&allocated.job_dir)?;
                store.set_source(source);
                store.persist()?;
            }

            println!("{}\t{}", allocated.job_id, allocated.job_dir.display());
            Ok(0)
        }

        Command::Status { job } => {
            let job_dir = settings.job_dir(&job)?;
            let store = ManifestStore::load(&job_dir)?;
            print_status(&store, &registry);
            Ok(0)
        }

        Command::Plan { stages } => {
            let requested: Vec<String> = if stages.is_empty() {
                registry.stages().map(str::to_string).collect()
            } else {
                stages
            };
            let order = execution_order(&registry, &requested)?;
            print_plan(&config_path, explicit, &registry, &order);
            info!(stages = order.len(), "plan printed; nothing executed");
            Ok(0)
        }
    }
}

/// Manifest summary: job status, then one line per registry stage.
fn print_status(store: &ManifestStore, registry: &StageRegistry) {
    let manifest = store.manifest();
    println!("job {} ({})", manifest.job_id, manifest.status);
    println!("  created: {}", manifest.created_at.to_rfc3339());
    if let Some(source) = &manifest.source {
        println!("  source:  {}", source.display());
    }
    println!();

    let width = registry.stages().map(str::len).max().unwrap_or(0);
    for name in registry.stages() {
        let Some(record) = store.stage(name) else {
            println!("  {name:<width$}  PENDING (not recorded)");
            continue;
        };

        print!("  {name:<width$}  {}", record.status);
        if record.attempt > 1 {
            print!(" (attempt {})", record.attempt);
        }
        if let (Some(start), Some(end)) = (record.started_at, record.ended_at) {
            let secs = (end - start).num_milliseconds() as f64 / 1000.0;
            print!(" {secs:.1}s");
        }
        println!();

        for output in &record.outputs {
            println!("  {:width$}    -> {} {}", "", output.role, output.path.display());
        }
        if let Some(err) = &record.error {
            let first_line = err.message.lines().next().unwrap_or_default();
            println!("  {:width$}    ! {}: {}", "", err.kind, first_line);
        }
    }
}

/// Simple plan output: registry, then the resolved execution order.
fn print_plan(config_path: &Path, explicit: bool, registry: &StageRegistry, order: &[String]) {
    println!("subforge plan");
    if explicit || config_path.exists() {
        println!("  config: {}", config_path.display());
    } else {
        println!("  config: built-in pipeline");
    }
    println!();

    println!("stages ({}):", registry.len());
    for name in registry.stages() {
        println!("  - {name}");
        if let Some(description) = registry.description(name) {
            println!("      {description}");
        }
        if let Some(template) = registry.template(name) {
            println!("      cmd: {} {}", template.program, template.args.join(" "));
        }
        let after = registry.predecessors(name);
        if !after.is_empty() {
            println!("      after: {after:?}");
        }
        if let Some((inputs, outputs)) = registry.declared_io(name) {
            println!("      inputs: {inputs:?} outputs: {outputs:?}");
        }
    }
    println!();

    println!("execution order:");
    for (i, name) in order.iter().enumerate() {
        println!("  {}. {name}", i + 1);
    }
}
