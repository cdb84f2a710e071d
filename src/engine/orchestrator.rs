// src/engine/orchestrator.rs

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::capability::Capabilities;
use crate::config::ConfigSection;
use crate::dag::{StageRegistry, execution_order};
use crate::engine::report::{RunReport, StageResult, StageSummary};
use crate::engine::session::StageSession;
use crate::engine::shutdown::Shutdown;
use crate::errors::{Result, SubforgeError};
use crate::exec::{ExecOutcome, InvocationContext, StageExecutor, StageReport, render};
use crate::manifest::ManifestStore;
use crate::types::{ErrorKind, StageError, StageOutcome, StageStatus};

/// Knobs for one run; CLI flags are folded in on top of `[config]`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Re-run stages that are already COMPLETED.
    pub force: bool,
    /// Continue with stages that do not depend on a failed one.
    pub keep_going: bool,
    /// Default per-stage wall-clock budget, from `[config]`.
    pub timeout: Duration,
    /// `run --timeout`: beats both `[stage.X].timeout_secs` and the default.
    pub timeout_override: Option<Duration>,
    pub kill_grace: Duration,
    pub capabilities: Capabilities,
}

impl RunOptions {
    pub fn from_config(section: &ConfigSection, capabilities: Capabilities) -> Self {
        Self {
            force: false,
            keep_going: section.keep_going,
            timeout: Duration::from_secs(section.timeout_secs),
            timeout_override: None,
            kill_grace: Duration::from_secs(section.kill_grace_secs),
            capabilities,
        }
    }
}

/// Runs requested stages of one job, in dependency order, one at a time.
///
/// Process launching is delegated to a [`StageExecutor`]; every state change
/// goes through a [`StageSession`] so the manifest on disk is always current.
pub struct Orchestrator<'r, E: StageExecutor> {
    registry: &'r StageRegistry,
    executor: E,
    options: RunOptions,
}

impl<E: StageExecutor> fmt::Debug for Orchestrator<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.registry.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'r, E: StageExecutor> Orchestrator<'r, E> {
    pub fn new(registry: &'r StageRegistry, executor: E, options: RunOptions) -> Self {
        Self {
            registry,
            executor,
            options,
        }
    }

    /// CLI override, then the stage's own budget, then the `[config]` default.
    fn stage_timeout(&self, stage: &str) -> Duration {
        self.options
            .timeout_override
            .or_else(|| self.registry.timeout(stage))
            .unwrap_or(self.options.timeout)
    }

    /// Run `requested` (every registry stage when empty) against `store`.
    ///
    /// Configuration and dependency problems are returned as errors before
    /// anything is spawned. Stage failures are recorded in the manifest and
    /// in the returned [`RunReport`].
    pub async fn run(
        &mut self,
        store: &mut ManifestStore,
        requested: &[String],
        shutdown: &mut Shutdown,
    ) -> Result<RunReport> {
        let requested: Vec<String> = if requested.is_empty() {
            self.registry.stages().map(str::to_string).collect()
        } else {
            requested.to_vec()
        };
        let order = execution_order(self.registry, &requested)?;

        self.preflight(store, &order)?;
        self.interrupt_stale(store)?;
        for stage in &order {
            store.ensure_stage(stage);
        }

        info!(job_id = %store.job_id(), ?order, "starting run");

        let mut summaries: Vec<StageSummary> = Vec::with_capacity(order.len());
        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut interrupted = false;
        let mut stopped = false;

        for stage in &order {
            if stopped {
                summaries.push(summary(stage, StageResult::NotRun));
                continue;
            }

            if shutdown.is_requested() {
                info!(stage = %stage, "shutdown requested; not starting further stages");
                interrupted = true;
                stopped = true;
                summaries.push(summary(stage, StageResult::NotRun));
                continue;
            }

            if self.registry.ancestors(stage).iter().any(|a| failed.contains(a)) {
                info!(stage = %stage, "skipping stage: an ancestor failed in this run");
                failed.insert(stage.clone());
                summaries.push(summary(stage, StageResult::Blocked));
                continue;
            }

            if store.is_complete(stage) && !self.options.force {
                info!(stage = %stage, "stage already completed; skipping");
                summaries.push(summary(stage, StageResult::Skipped));
                continue;
            }

            if let Some(previous) = store.stage(stage).map(|r| r.status) {
                if previous.is_terminal() {
                    info!(stage = %stage, from = %previous, "re-arming stage to PENDING");
                    store.reset_stage(stage);
                }
            }

            let result = match self.run_stage(store, stage, shutdown).await {
                Ok(result) => result,
                Err(err) => {
                    store.refresh_status(self.registry.stages());
                    store.persist()?;
                    return Err(err);
                }
            };

            store.refresh_status(self.registry.stages());
            store.persist()?;

            match &result {
                StageResult::Failed(_) => {
                    failed.insert(stage.clone());
                    if !self.options.keep_going {
                        stopped = true;
                    }
                }
                StageResult::Interrupted => {
                    interrupted = true;
                    stopped = true;
                }
                _ => {}
            }
            summaries.push(summary(stage, result));
        }

        store.refresh_status(self.registry.stages());
        store.persist()?;

        let report = RunReport {
            job_id: store.job_id().to_string(),
            job_status: store.manifest().status,
            stages: summaries,
            interrupted,
        };
        info!(
            job_id = %report.job_id,
            job_status = %report.job_status,
            exit_code = report.exit_code(),
            spawned = report.spawned().count(),
            "run finished"
        );
        Ok(report)
    }

    /// Every predecessor of a stage must be requested too, or already done.
    fn preflight(&self, store: &ManifestStore, order: &[String]) -> Result<()> {
        let requested: HashSet<&str> = order.iter().map(String::as_str).collect();

        for stage in order {
            for pred in self.registry.predecessors(stage) {
                if requested.contains(pred.as_str()) || store.is_complete(pred) {
                    continue;
                }
                let status = store.stage(pred).map(|r| r.status).unwrap_or_default();
                return Err(SubforgeError::DependencyError(format!(
                    "stage '{stage}' depends on '{pred}', which is {status} and was not requested"
                )));
            }
        }
        Ok(())
    }

    /// RUNNING records left behind by an orchestrator that died mid-stage.
    fn interrupt_stale(&self, store: &mut ManifestStore) -> Result<()> {
        let stale: Vec<String> = store
            .manifest()
            .stages
            .iter()
            .filter(|(_, r)| r.status == StageStatus::Running)
            .map(|(name, _)| name.clone())
            .collect();

        if stale.is_empty() {
            return Ok(());
        }

        for stage in &stale {
            warn!(stage = %stage, "found stale RUNNING record; marking INTERRUPTED");
            store.set_status(
                stage,
                StageStatus::Interrupted,
                Some(StageError::new(
                    ErrorKind::Stale,
                    "a previous orchestrator exited while the stage was running",
                )),
            )?;
        }
        store.persist()
    }

    async fn run_stage(
        &mut self,
        store: &mut ManifestStore,
        stage: &str,
        shutdown: &mut Shutdown,
    ) -> Result<StageResult> {
        let template = self
            .registry
            .template(stage)
            .cloned()
            .ok_or_else(|| SubforgeError::ConfigError(format!("unknown stage '{stage}'")))?;
        let output_roles: Vec<String> = self
            .registry
            .declared_io(stage)
            .map(|(_, outputs)| outputs.to_vec())
            .unwrap_or_default();
        let timeout = self.stage_timeout(stage);

        let mut session = StageSession::open(store, self.registry, stage)?;

        for role in &output_roles {
            if let Err(e) = fs::create_dir_all(session.job_dir().join(role)) {
                return Err(session.fail(e.into()));
            }
        }

        let rendered = {
            let ctx = InvocationContext {
                job_id: session.job_id(),
                job_dir: session.job_dir(),
                stage,
                capabilities: &self.options.capabilities,
                inputs: session.inputs(),
            };
            render(&template, &ctx, timeout, self.options.kill_grace)
        };
        let invocation = match rendered {
            Ok(inv) => inv,
            Err(e) => return Err(session.fail(e)),
        };

        let (report_tx, mut report_rx) = mpsc::channel::<StageReport>(64);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let mut cancel_tx = Some(cancel_tx);
        let mut report_error: Option<SubforgeError> = None;

        let mut exec = self.executor.execute(invocation, report_tx, cancel_rx);

        let outcome = loop {
            tokio::select! {
                outcome = &mut exec => break outcome,

                Some(report) = report_rx.recv() => {
                    if report_error.is_none() {
                        if let Err(e) = apply_report(&mut session, report) {
                            warn!(stage = %stage, error = %e, "could not record stage report; stopping stage");
                            report_error = Some(e);
                            if let Some(tx) = cancel_tx.take() {
                                let _ = tx.send(());
                            }
                        }
                    }
                }

                _ = shutdown.requested(), if cancel_tx.is_some() => {
                    info!(stage = %stage, "shutdown requested; cancelling running stage");
                    if let Some(tx) = cancel_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
        };
        drop(exec);

        // Reports sent just before the executor returned.
        while let Ok(report) = report_rx.try_recv() {
            if report_error.is_none() {
                if let Err(e) = apply_report(&mut session, report) {
                    report_error = Some(e);
                }
            }
        }

        if let Some(err) = report_error {
            return Err(session.fail(err));
        }

        let outcome = match outcome {
            ExecOutcome::Exited { code: Some(0), .. } => {
                match check_outputs(&mut session, &output_roles) {
                    Ok(outcome) => outcome,
                    Err(e) => return Err(session.fail(e)),
                }
            }
            ExecOutcome::Exited { code, diagnostics } => {
                let message = match code {
                    Some(code) => format!("exited with status {code}"),
                    None => "terminated by a signal".to_string(),
                };
                StageOutcome::Failed(StageError::new(
                    ErrorKind::ExitCode,
                    with_diagnostics(message, &diagnostics),
                ))
            }
            ExecOutcome::TimedOut { after, diagnostics } => StageOutcome::Failed(StageError::new(
                ErrorKind::Timeout,
                with_diagnostics(
                    format!("exceeded time budget of {}s", after.as_secs_f64()),
                    &diagnostics,
                ),
            )),
            ExecOutcome::SpawnFailed(message) => {
                StageOutcome::Failed(StageError::new(ErrorKind::Spawn, message))
            }
            ExecOutcome::Cancelled => StageOutcome::Interrupted,
        };

        let result = match &outcome {
            StageOutcome::Completed => StageResult::Completed,
            StageOutcome::Failed(err) => StageResult::Failed(err.clone()),
            StageOutcome::Interrupted => StageResult::Interrupted,
        };
        session.close(outcome)?;
        Ok(result)
    }
}

fn summary(stage: &str, result: StageResult) -> StageSummary {
    StageSummary {
        stage: stage.to_string(),
        result,
    }
}

fn apply_report(session: &mut StageSession<'_>, report: StageReport) -> Result<()> {
    match report {
        StageReport::Output {
            role,
            path,
            description,
        } => {
            let path = relative_to(session.job_dir(), &path);
            session.add_output(&role, path, &description)
        }
        StageReport::Metadata { key, value } => session.add_metadata(&key, value),
    }
}

/// Record files found in output role directories that the stage did not
/// report, then require at least one artifact per declared role.
fn check_outputs(session: &mut StageSession<'_>, roles: &[String]) -> Result<StageOutcome> {
    for role in roles {
        let known: HashSet<PathBuf> = session
            .outputs()
            .iter()
            .filter(|a| &a.role == role)
            .map(|a| a.path.clone())
            .collect();

        for path in discover(session.job_dir(), role)? {
            if !known.contains(&path) {
                debug!(stage = %session.stage(), role = %role, path = %path.display(), "discovered output");
                session.add_output(role, path, "")?;
            }
        }
    }

    let missing: Vec<&str> = roles
        .iter()
        .filter(|role| !session.outputs().iter().any(|a| &a.role == *role))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(StageOutcome::Completed)
    } else {
        Ok(StageOutcome::Failed(StageError::new(
            ErrorKind::MissingOutput,
            format!(
                "exited successfully but produced nothing for output role(s): {}",
                missing.join(", ")
            ),
        )))
    }
}

/// Entries of `<job_dir>/<role>/`, relative to the job directory, sorted.
fn discover(job_dir: &Path, role: &str) -> Result<Vec<PathBuf>> {
    let dir = job_dir.join(role);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        found.push(Path::new(role).join(name));
    }
    found.sort();
    Ok(found)
}

fn relative_to(job_dir: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(job_dir)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

fn with_diagnostics(message: String, diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        message
    } else {
        format!("{message}\n{diagnostics}")
    }
}
