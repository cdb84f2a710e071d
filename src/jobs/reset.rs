// src/jobs/reset.rs

//! Return selected stages of a job to PENDING so they can run again.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::dag::StageRegistry;
use crate::errors::{Result, SubforgeError};
use crate::jobs::id::{JobId, job_dir, validate_owner};
use crate::manifest::ManifestStore;
use crate::types::{JobStatus, StageStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetOptions {
    /// Compute and report, but leave `manifest.json` untouched.
    pub dry_run: bool,
    /// Also reset every recorded stage that transitively depends on a named one.
    pub cascade: bool,
}

/// Planned (or applied) change for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetAction {
    Reset { from: StageStatus },
    AlreadyPending,
    NotRecorded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetEntry {
    pub stage: String,
    pub action: ResetAction,
    /// Pulled in by `cascade` rather than named by the caller.
    pub cascaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    pub job_id: String,
    pub manifest_path: PathBuf,
    pub entries: Vec<ResetEntry>,
    pub status_before: JobStatus,
    pub status_after: JobStatus,
}

impl ResetReport {
    /// Number of stages that were (or would be) moved to PENDING.
    pub fn changed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.action, ResetAction::Reset { .. }))
            .count()
    }
}

impl fmt::Display for ResetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "job {} ({})", self.job_id, self.manifest_path.display())?;
        let width = self.entries.iter().map(|e| e.stage.len()).max().unwrap_or(0);
        for entry in &self.entries {
            write!(f, "  {:<width$}  ", entry.stage)?;
            match entry.action {
                ResetAction::Reset { from } => write!(f, "{from} -> PENDING")?,
                ResetAction::AlreadyPending => write!(f, "PENDING (unchanged)")?,
                ResetAction::NotRecorded => write!(f, "not recorded (unchanged)")?,
            }
            if entry.cascaded {
                write!(f, " [cascade]")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "job status: {} -> {}", self.status_before, self.status_after)
    }
}

/// Reset `stages` of job `job_id` under `root`/`owner`.
///
/// The job id is validated before any path is built; no directory search
/// happens. `registry` is needed only for `cascade`. Artifacts on disk are
/// never touched, only the manifest record.
pub fn reset(
    root: &Path,
    owner: &str,
    job_id: &str,
    stages: &[String],
    options: ResetOptions,
    registry: Option<&StageRegistry>,
) -> Result<ResetReport> {
    let id = JobId::parse(job_id)?;
    validate_owner(owner)?;
    if stages.is_empty() {
        return Err(SubforgeError::ConfigError(
            "reset needs at least one stage name".to_string(),
        ));
    }

    let dir = job_dir(root, owner, &id);
    let mut store = ManifestStore::load(&dir)?;
    let status_before = store.manifest().status;

    let targets = expand_targets(&store, stages, options.cascade, registry)?;

    let mut entries = Vec::with_capacity(targets.len());
    for (stage, cascaded) in targets {
        let action = match store.reset_stage(&stage) {
            Some(from) => ResetAction::Reset { from },
            None if store.stage(&stage).is_some() => ResetAction::AlreadyPending,
            None => ResetAction::NotRecorded,
        };
        entries.push(ResetEntry {
            stage,
            action,
            cascaded,
        });
    }

    let changed = entries
        .iter()
        .any(|e| matches!(e.action, ResetAction::Reset { .. }));
    if changed {
        store.demote_after_reset();
    }

    let report = ResetReport {
        job_id: id.to_string(),
        manifest_path: store.path().to_path_buf(),
        entries,
        status_before,
        status_after: store.manifest().status,
    };

    if options.dry_run {
        info!(job_id = %id, changes = report.changed(), "dry run; manifest left untouched");
    } else if changed {
        store.persist()?;
        info!(job_id = %id, changes = report.changed(), "reset applied");
    } else {
        info!(job_id = %id, "nothing to reset");
    }

    Ok(report)
}

/// Named stages first (deduplicated, in the caller's order), then cascaded
/// dependents in registry order.
fn expand_targets(
    store: &ManifestStore,
    stages: &[String],
    cascade: bool,
    registry: Option<&StageRegistry>,
) -> Result<Vec<(String, bool)>> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut targets: Vec<(String, bool)> = Vec::new();
    for stage in stages {
        if seen.insert(stage.as_str()) {
            targets.push((stage.clone(), false));
        }
    }

    if !cascade {
        return Ok(targets);
    }

    let registry = registry.ok_or_else(|| {
        SubforgeError::ConfigError("cascading reset needs the stage registry".to_string())
    })?;

    let mut dependents: BTreeSet<String> = BTreeSet::new();
    for stage in stages {
        dependents.extend(registry.descendants(stage));
    }

    for stage in registry.stages() {
        if dependents.contains(stage) && !seen.contains(stage) && store.stage(stage).is_some() {
            targets.push((stage.to_string(), true));
        }
    }
    Ok(targets)
}
