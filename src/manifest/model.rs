// src/manifest/model.rs

//! Serialized form of a job: the manifest and its per-stage records.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, SubforgeError};
use crate::types::{ErrorKind, JobStatus, MetaValue, StageError, StageStatus};

/// A file a stage consumed or produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub role: String,
    /// Relative to the job directory when the file lives inside it.
    pub path: PathBuf,
    #[serde(default)]
    pub description: String,
}

impl ArtifactRef {
    pub fn new(role: impl Into<String>, path: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            path: path.into(),
            description: description.into(),
        }
    }
}

/// Bookkeeping for one stage of a job. The stage name is the key in
/// [`Manifest::stages`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Number of times the stage has entered RUNNING.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub inputs: Vec<ArtifactRef>,
    #[serde(default)]
    pub outputs: Vec<ArtifactRef>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetaValue>,
    #[serde(default)]
    pub error: Option<StageError>,
}

impl StageRecord {
    fn clear_run_state(&mut self) {
        self.started_at = None;
        self.ended_at = None;
        self.inputs.clear();
        self.outputs.clear();
        self.metadata.clear();
        self.error = None;
    }
}

/// The persisted record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Source media the pipeline was started with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,
}

impl Manifest {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Running,
            created_at: Utc::now(),
            source: None,
            stages: BTreeMap::new(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.get(name)
    }

    /// Insert a PENDING record for `name` if none exists. Returns `true` when
    /// a record was created.
    pub fn ensure_stage(&mut self, name: &str) -> bool {
        if self.stages.contains_key(name) {
            return false;
        }
        self.stages.insert(name.to_string(), StageRecord::default());
        true
    }

    pub fn is_complete(&self, name: &str) -> bool {
        self.stage(name)
            .is_some_and(|r| r.status == StageStatus::Completed)
    }

    fn record_mut(&mut self, name: &str) -> Result<&mut StageRecord> {
        self.stages.get_mut(name).ok_or_else(|| {
            SubforgeError::ConfigError(format!("stage '{}' is not recorded in the manifest", name))
        })
    }

    fn running_record_mut(&mut self, name: &str, attempted: StageStatus) -> Result<&mut StageRecord> {
        let record = self.record_mut(name)?;
        if record.status != StageStatus::Running {
            return Err(SubforgeError::InvalidTransition {
                stage: name.to_string(),
                from: record.status,
                to: attempted,
            });
        }
        Ok(record)
    }

    /// Move a stage along `PENDING -> RUNNING -> terminal`.
    ///
    /// Leaving RUNNING for FAILED or INTERRUPTED drops the output list from
    /// the record; the files themselves are not touched.
    pub fn transition(
        &mut self,
        name: &str,
        next: StageStatus,
        error: Option<StageError>,
    ) -> Result<()> {
        let record = self.record_mut(name)?;

        if !record.status.can_transition_to(next) {
            return Err(SubforgeError::InvalidTransition {
                stage: name.to_string(),
                from: record.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            StageStatus::Running => {
                record.clear_run_state();
                record.started_at = Some(now);
                record.attempt += 1;
            }
            StageStatus::Completed => {
                record.ended_at = Some(now);
                record.error = None;
            }
            StageStatus::Failed | StageStatus::Interrupted => {
                record.ended_at = Some(now);
                if !record.outputs.is_empty() {
                    debug!(
                        stage = %name,
                        dropped = record.outputs.len(),
                        "dropping outputs from non-completed stage record"
                    );
                    record.outputs.clear();
                }
                record.error = Some(error.unwrap_or_else(|| default_error(next)));
            }
            StageStatus::Pending => unreachable!("can_transition_to rejects Pending"),
        }
        record.status = next;

        Ok(())
    }

    pub fn set_inputs(&mut self, name: &str, inputs: Vec<ArtifactRef>) -> Result<()> {
        self.running_record_mut(name, StageStatus::Running)?.inputs = inputs;
        Ok(())
    }

    pub fn add_output(&mut self, name: &str, artifact: ArtifactRef) -> Result<()> {
        self.running_record_mut(name, StageStatus::Completed)?
            .outputs
            .push(artifact);
        Ok(())
    }

    pub fn add_metadata(&mut self, name: &str, key: &str, value: MetaValue) -> Result<()> {
        self.running_record_mut(name, StageStatus::Completed)?
            .metadata
            .insert(key.to_string(), value);
        Ok(())
    }

    /// Return a stage to PENDING, clearing everything recorded about its last
    /// run. Returns the previous status when something changed.
    pub fn reset_stage(&mut self, name: &str) -> Option<StageStatus> {
        let record = self.stages.get_mut(name)?;
        if record.status == StageStatus::Pending {
            return None;
        }
        let previous = record.status;
        record.status = StageStatus::Pending;
        record.clear_run_state();
        Some(previous)
    }

    /// Recompute the job status against the full set of pipeline stages.
    pub fn refresh_status<'a>(&mut self, pipeline: impl IntoIterator<Item = &'a str>) {
        self.status = if self.stages.values().any(|r| r.status == StageStatus::Failed) {
            JobStatus::Failed
        } else if pipeline.into_iter().all(|name| self.is_complete(name)) {
            JobStatus::Completed
        } else {
            JobStatus::Running
        };
    }

    /// Job status after one or more stages were reset: a COMPLETED job is
    /// running again, and a FAILED job is too once no failed stage remains.
    pub fn demote_after_reset(&mut self) {
        let any_failed = self.stages.values().any(|r| r.status == StageStatus::Failed);
        match self.status {
            JobStatus::Completed => self.status = JobStatus::Running,
            JobStatus::Failed if !any_failed => self.status = JobStatus::Running,
            _ => {}
        }
    }
}

fn default_error(status: StageStatus) -> StageError {
    match status {
        StageStatus::Interrupted => StageError::new(ErrorKind::Interrupted, "interrupted"),
        _ => StageError::new(ErrorKind::Internal, "stage failed without a recorded error"),
    }
}
