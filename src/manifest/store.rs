// src/manifest/store.rs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::{Result, SubforgeError};
use crate::manifest::atomic::write_atomic_with;
use crate::manifest::model::{ArtifactRef, Manifest, StageRecord};
use crate::types::{MetaValue, StageError, StageStatus};

/// File name of the manifest inside a job directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Owner of one job's manifest: loads it, applies mutations in memory and
/// writes it back atomically on [`ManifestStore::persist`].
#[derive(Debug)]
pub struct ManifestStore {
    job_dir: PathBuf,
    path: PathBuf,
    manifest: Manifest,
}

impl ManifestStore {
    pub fn manifest_path(job_dir: &Path) -> PathBuf {
        job_dir.join(MANIFEST_FILE)
    }

    /// Load the job's manifest, or start a fresh one (not yet written) when
    /// the job has none. A manifest that exists but cannot be parsed is an
    /// error, never a fresh start.
    ///
    /// The job directory is kept as an absolute path: stage processes run
    /// with it as their working directory and receive it in arguments.
    pub fn load_or_create(job_dir: impl AsRef<Path>) -> Result<Self> {
        let job_dir = &std::path::absolute(job_dir.as_ref())?;
        let path = Self::manifest_path(job_dir);

        match read_manifest(&path, job_dir)? {
            Some(manifest) => Ok(Self::from_parts(job_dir, path, manifest)),
            None => {
                let job_id = job_id_from_dir(job_dir)?;
                info!(job_id = %job_id, path = %path.display(), "starting new manifest");
                Ok(Self::from_parts(job_dir, path, Manifest::new(job_id)))
            }
        }
    }

    /// Load an existing manifest; a missing one is [`SubforgeError::JobNotFound`].
    pub fn load(job_dir: impl AsRef<Path>) -> Result<Self> {
        let job_dir = &std::path::absolute(job_dir.as_ref())?;
        let path = Self::manifest_path(job_dir);

        match read_manifest(&path, job_dir)? {
            Some(manifest) => Ok(Self::from_parts(job_dir, path, manifest)),
            None => Err(SubforgeError::JobNotFound(format!(
                "no manifest at {}",
                path.display()
            ))),
        }
    }

    /// Move a corrupt manifest aside as `manifest.json.corrupt-<timestamp>`.
    ///
    /// Returns the new path, or `None` when the manifest is absent or parses
    /// fine (nothing to acknowledge).
    pub fn quarantine_corrupt(job_dir: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        let job_dir = job_dir.as_ref();
        let path = Self::manifest_path(job_dir);

        match read_manifest(&path, job_dir) {
            Err(SubforgeError::ManifestCorruption { reason, .. }) => {
                let target = job_dir.join(format!(
                    "{}.corrupt-{}",
                    MANIFEST_FILE,
                    Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
                ));
                fs::rename(&path, &target)?;
                warn!(
                    from = %path.display(),
                    to = %target.display(),
                    reason = %reason,
                    "quarantined corrupt manifest"
                );
                Ok(Some(target))
            }
            Err(e) => Err(e),
            Ok(_) => Ok(None),
        }
    }

    fn from_parts(job_dir: &Path, path: PathBuf, manifest: Manifest) -> Self {
        Self {
            job_dir: job_dir.to_path_buf(),
            path,
            manifest,
        }
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn job_id(&self) -> &str {
        &self.manifest.job_id
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.manifest.stage(name)
    }

    pub fn ensure_stage(&mut self, name: &str) -> bool {
        self.manifest.ensure_stage(name)
    }

    pub fn is_complete(&self, name: &str) -> bool {
        self.manifest.is_complete(name)
    }

    pub fn set_status(
        &mut self,
        name: &str,
        status: StageStatus,
        error: Option<StageError>,
    ) -> Result<()> {
        self.manifest.transition(name, status, error)?;
        debug!(job_id = %self.manifest.job_id, stage = %name, %status, "stage status updated");
        Ok(())
    }

    pub fn set_inputs(&mut self, name: &str, inputs: Vec<ArtifactRef>) -> Result<()> {
        self.manifest.set_inputs(name, inputs)
    }

    pub fn add_output(
        &mut self,
        name: &str,
        role: &str,
        path: impl Into<PathBuf>,
        description: &str,
    ) -> Result<()> {
        self.manifest
            .add_output(name, ArtifactRef::new(role, path, description))
    }

    pub fn add_metadata(&mut self, name: &str, key: &str, value: MetaValue) -> Result<()> {
        self.manifest.add_metadata(name, key, value)
    }

    pub fn reset_stage(&mut self, name: &str) -> Option<StageStatus> {
        self.manifest.reset_stage(name)
    }

    /// Put back a record captured before changes that could not be persisted.
    pub(crate) fn restore_stage(&mut self, name: &str, record: StageRecord) {
        self.manifest.stages.insert(name.to_string(), record);
    }

    pub fn set_source(&mut self, source: PathBuf) {
        self.manifest.source = Some(source);
    }

    pub fn refresh_status<'a>(&mut self, pipeline: impl IntoIterator<Item = &'a str>) {
        self.manifest.refresh_status(pipeline);
    }

    pub fn demote_after_reset(&mut self) {
        self.manifest.demote_after_reset();
    }

    /// Write the whole manifest atomically.
    pub fn persist(&self) -> Result<()> {
        self.persist_with_hook(|_| Ok(()))
    }

    pub(crate) fn persist_with_hook<F>(&self, before_rename: F) -> Result<()>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let mut bytes = serde_json::to_vec_pretty(&self.manifest)?;
        bytes.push(b'\n');
        fs::create_dir_all(&self.job_dir)?;
        write_atomic_with(&self.path, &bytes, before_rename)?;
        debug!(path = %self.path.display(), "manifest persisted");
        Ok(())
    }
}

fn read_manifest(path: &Path, job_dir: &Path) -> Result<Option<Manifest>> {
    let contents = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(corruption(path, format!("not valid UTF-8: {e}")));
        }
        Err(e) => return Err(e.into()),
    };

    let manifest: Manifest =
        serde_json::from_str(&contents).map_err(|e| corruption(path, e.to_string()))?;

    if let Some(dir_name) = job_dir.file_name().and_then(|n| n.to_str()) {
        if manifest.job_id != dir_name {
            return Err(corruption(
                path,
                format!(
                    "job_id '{}' does not match job directory '{}'",
                    manifest.job_id, dir_name
                ),
            ));
        }
    }

    Ok(Some(manifest))
}

fn corruption(path: &Path, reason: String) -> SubforgeError {
    SubforgeError::ManifestCorruption {
        path: path.to_path_buf(),
        reason,
    }
}

fn job_id_from_dir(job_dir: &Path) -> Result<String> {
    job_dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            SubforgeError::ConfigError(format!(
                "cannot derive a job id from {}",
                job_dir.display()
            ))
        })
}
