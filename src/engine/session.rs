// src/engine/session.rs

//! Scoped handle for one running stage.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::SOURCE_ROLE;
use crate::dag::StageRegistry;
use crate::errors::{Result, SubforgeError};
use crate::manifest::{ArtifactRef, ManifestStore};
use crate::types::{ErrorKind, MetaValue, StageError, StageOutcome, StageStatus};

/// A stage that has been moved to RUNNING and persisted.
///
/// The session commits exactly one terminal status: through [`close`] or
/// [`fail`], or from `Drop` when neither was called (INTERRUPTED, or FAILED
/// with kind `aborted` while a panic unwinds).
///
/// [`close`]: StageSession::close
/// [`fail`]: StageSession::fail
#[derive(Debug)]
pub struct StageSession<'a> {
    store: &'a mut ManifestStore,
    stage: String,
    closed: bool,
}

impl<'a> StageSession<'a> {
    /// Acquire `stage` for execution.
    ///
    /// Every predecessor must be COMPLETED and the stage's record PENDING.
    /// Inputs are resolved from the producers' recorded outputs (or the job
    /// source) and stored on the record before it is persisted as RUNNING.
    pub fn open(
        store: &'a mut ManifestStore,
        registry: &StageRegistry,
        stage: &str,
    ) -> Result<Self> {
        registry.require(stage)?;

        for pred in registry.predecessors(stage) {
            if !store.is_complete(pred) {
                let status = store.stage(pred).map(|r| r.status).unwrap_or_default();
                return Err(SubforgeError::DependencyError(format!(
                    "stage '{stage}' requires '{pred}' to be COMPLETED, but it is {status}"
                )));
            }
        }

        store.ensure_stage(stage);
        if let Some(record) = store.stage(stage) {
            if record.status != StageStatus::Pending {
                return Err(SubforgeError::InvalidTransition {
                    stage: stage.to_string(),
                    from: record.status,
                    to: StageStatus::Running,
                });
            }
        }

        let inputs = resolve_inputs(store, registry, stage)?;

        // A RUNNING record that never reached disk has no session to finish it.
        let pending = store.stage(stage).cloned();
        let acquired = store
            .set_status(stage, StageStatus::Running, None)
            .and_then(|()| store.set_inputs(stage, inputs))
            .and_then(|()| store.persist());
        if let Err(err) = acquired {
            if let Some(record) = pending {
                store.restore_stage(stage, record);
            }
            return Err(err);
        }

        info!(job_id = %store.job_id(), stage = %stage, "stage session opened");

        Ok(Self {
            store,
            stage: stage.to_string(),
            closed: false,
        })
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn job_id(&self) -> &str {
        self.store.job_id()
    }

    pub fn job_dir(&self) -> &Path {
        self.store.job_dir()
    }

    pub fn inputs(&self) -> &[ArtifactRef] {
        self.store
            .stage(&self.stage)
            .map(|r| r.inputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn outputs(&self) -> &[ArtifactRef] {
        self.store
            .stage(&self.stage)
            .map(|r| r.outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Record an artifact and persist.
    pub fn add_output(
        &mut self,
        role: &str,
        path: impl Into<PathBuf>,
        description: &str,
    ) -> Result<()> {
        let path = path.into();
        debug!(stage = %self.stage, role, path = %path.display(), "recording output");
        self.store.add_output(&self.stage, role, path, description)?;
        self.store.persist()
    }

    /// Record a metadata value and persist.
    pub fn add_metadata(&mut self, key: &str, value: MetaValue) -> Result<()> {
        debug!(stage = %self.stage, key, %value, "recording metadata");
        self.store.add_metadata(&self.stage, key, value)?;
        self.store.persist()
    }

    /// Commit the stage's terminal status and persist it.
    pub fn close(mut self, outcome: StageOutcome) -> Result<StageStatus> {
        self.closed = true;
        self.commit(outcome)
    }

    /// Commit FAILED from a crate error and return it as
    /// [`SubforgeError::StageExecution`] for this stage.
    pub fn fail(mut self, err: SubforgeError) -> SubforgeError {
        self.closed = true;
        let (kind, message) = match err {
            SubforgeError::StageExecution { kind, message, .. } => (kind, message),
            other => (other.kind(), other.to_string()),
        };
        let outcome = StageOutcome::Failed(StageError::new(kind, message.clone()));
        if let Err(commit_err) = self.commit(outcome) {
            error!(
                stage = %self.stage,
                error = %commit_err,
                "could not record stage failure"
            );
        }
        SubforgeError::StageExecution {
            stage: self.stage.clone(),
            kind,
            message,
        }
    }

    fn commit(&mut self, outcome: StageOutcome) -> Result<StageStatus> {
        let status = outcome.status();
        let error = match outcome {
            StageOutcome::Completed => None,
            StageOutcome::Failed(err) => Some(err),
            StageOutcome::Interrupted => Some(StageError::new(
                ErrorKind::Interrupted,
                "interrupted before the stage finished",
            )),
        };

        match &error {
            None => info!(job_id = %self.store.job_id(), stage = %self.stage, %status, "stage finished"),
            Some(err) => warn!(
                job_id = %self.store.job_id(),
                stage = %self.stage,
                %status,
                kind = %err.kind,
                message = %err.message,
                "stage finished"
            ),
        }

        self.store.set_status(&self.stage, status, error)?;
        self.store.persist()?;
        Ok(status)
    }
}

impl Drop for StageSession<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let outcome = if std::thread::panicking() {
            StageOutcome::Failed(StageError::new(
                ErrorKind::Aborted,
                "orchestrator panicked while the stage was running",
            ))
        } else {
            StageOutcome::Interrupted
        };

        if let Err(err) = self.commit(outcome) {
            error!(stage = %self.stage, error = %err, "could not finalise stage session");
        }
    }
}

/// Inputs for `stage`, one entry per recorded artifact, in declared role order.
fn resolve_inputs(
    store: &ManifestStore,
    registry: &StageRegistry,
    stage: &str,
) -> Result<Vec<ArtifactRef>> {
    let Some((roles, _)) = registry.declared_io(stage) else {
        return Ok(Vec::new());
    };

    let mut inputs = Vec::new();
    for role in roles {
        if role == SOURCE_ROLE {
            let source = store.manifest().source.clone().ok_or_else(|| {
                SubforgeError::DependencyError(format!(
                    "stage '{stage}' needs the job source, but none was recorded (use --input)"
                ))
            })?;
            inputs.push(ArtifactRef::new(SOURCE_ROLE, source, "source media"));
            continue;
        }

        let producer = registry.producer_of(role).ok_or_else(|| {
            SubforgeError::DependencyError(format!("no stage produces role '{role}'"))
        })?;
        let found: Vec<ArtifactRef> = store
            .stage(producer)
            .filter(|r| r.status == StageStatus::Completed)
            .map(|r| r.outputs.iter().filter(|a| &a.role == role).cloned().collect())
            .unwrap_or_default();

        if found.is_empty() {
            return Err(SubforgeError::DependencyError(format!(
                "stage '{stage}' needs role '{role}', but '{producer}' recorded no such output"
            )));
        }
        inputs.extend(found);
    }

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::config::defaults::builtin_pipeline;
    use std::fs;

    fn setup() -> (tempfile::TempDir, PathBuf, StageRegistry) {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("20261019-0001");
        fs::create_dir_all(&dir).unwrap();
        let reg = StageRegistry::from_config(&ConfigFile::try_from(builtin_pipeline()).unwrap());
        (root, dir, reg)
    }

    #[test]
    fn open_persists_running_with_inputs() {
        let (_root, dir, reg) = setup();
        let mut store = ManifestStore::load_or_create(&dir).unwrap();
        store.set_source(PathBuf::from("/media/film.mkv"));

        let session = StageSession::open(&mut store, &reg, "demux").unwrap();
        assert_eq!(session.inputs()[0].path, PathBuf::from("/media/film.mkv"));
        session.close(StageOutcome::Completed).unwrap();

        let on_disk = ManifestStore::load(&dir).unwrap();
        let record = on_disk.stage("demux").unwrap();
        assert_eq!(record.status, StageStatus::Completed);
        assert_eq!(record.inputs[0].role, "source");
    }

    #[test]
    fn open_refuses_incomplete_predecessor() {
        let (_root, dir, reg) = setup();
        let mut store = ManifestStore::load_or_create(&dir).unwrap();

        let err = StageSession::open(&mut store, &reg, "separate").unwrap_err();
        assert!(matches!(err, SubforgeError::DependencyError(_)));
        assert!(store.stage("separate").is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn missing_source_is_dependency_error() {
        let (_root, dir, reg) = setup();
        let mut store = ManifestStore::load_or_create(&dir).unwrap();

        let err = StageSession::open(&mut store, &reg, "demux").unwrap_err();
        assert!(matches!(err, SubforgeError::DependencyError(_)));
        assert_eq!(store.stage("demux").unwrap().status, StageStatus::Pending);
    }

    #[test]
    fn dropped_session_commits_interrupted() {
        let (_root, dir, reg) = setup();
        let mut store = ManifestStore::load_or_create(&dir).unwrap();
        store.set_source(PathBuf::from("/media/film.mkv"));

        {
            let mut session = StageSession::open(&mut store, &reg, "demux").unwrap();
            session.add_output("audio", "audio/a.wav", "").unwrap();
        }

        let on_disk = ManifestStore::load(&dir).unwrap();
        let record = on_disk.stage("demux").unwrap();
        assert_eq!(record.status, StageStatus::Interrupted);
        assert!(record.outputs.is_empty());
        assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Interrupted);
    }

    #[test]
    fn fail_records_kind_and_returns_error() {
        let (_root, dir, reg) = setup();
        let mut store = ManifestStore::load_or_create(&dir).unwrap();
        store.set_source(PathBuf::from("/media/film.mkv"));

        let session = StageSession::open(&mut store, &reg, "demux").unwrap();
        let err = session.fail(SubforgeError::DependencyError("gone".into()));
        assert!(matches!(
            &err,
            SubforgeError::StageExecution { stage, kind: ErrorKind::Dependency, .. } if stage == "demux"
        ));
        assert_eq!(err.kind(), ErrorKind::Dependency);

        let record = store.stage("demux").unwrap();
        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Dependency);
    }

    #[test]
    fn completed_stage_cannot_reopen_without_reset() {
        let (_root, dir, reg) = setup();
        let mut store = ManifestStore::load_or_create(&dir).unwrap();
        store.set_source(PathBuf::from("/media/film.mkv"));

        StageSession::open(&mut store, &reg, "demux")
            .unwrap()
            .close(StageOutcome::Completed)
            .unwrap();
        let err = StageSession::open(&mut store, &reg, "demux").unwrap_err();
        assert!(matches!(err, SubforgeError::InvalidTransition { .. }));
    }

    #[test]
    fn failed_persist_on_open_leaves_record_pending() {
        let (_root, dir, reg) = setup();
        let mut store = ManifestStore::load_or_create(&dir).unwrap();
        store.set_source(PathBuf::from("/media/film.mkv"));

        // A directory in the manifest's place makes the atomic rename fail.
        fs::create_dir_all(store.path().join("blocker")).unwrap();

        let err = StageSession::open(&mut store, &reg, "demux").unwrap_err();
        assert!(matches!(err, SubforgeError::IoError(_)), "{err}");

        let record = store.stage("demux").unwrap();
        assert_eq!(record.status, StageStatus::Pending);
        assert_eq!(record.attempt, 0);
        assert!(record.inputs.is_empty() && record.started_at.is_none());
    }
}
