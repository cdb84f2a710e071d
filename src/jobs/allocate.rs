// src/jobs/allocate.rs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::errors::{Result, SubforgeError};
use crate::jobs::id::{JobId, MAX_SEQUENCE, owner_dir, validate_owner};

/// A freshly created, empty job directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedJob {
    pub job_id: JobId,
    pub job_dir: PathBuf,
}

/// Allocate the next job id for `owner` on `date` and create its directory.
///
/// The directory is created with `create_dir`, so two allocators racing for
/// the same sequence number cannot both win; the loser moves on to the next.
pub fn allocate(root: &Path, date: NaiveDate, owner: &str) -> Result<AllocatedJob> {
    validate_owner(owner)?;

    let parent = owner_dir(root, date, owner);
    fs::create_dir_all(&parent).map_err(|e| {
        SubforgeError::ConfigError(format!(
            "cannot create job directory parent {}: {e}",
            parent.display()
        ))
    })?;

    let mut sequence = highest_sequence(&parent, date)? + 1;
    loop {
        if sequence > MAX_SEQUENCE {
            return Err(SubforgeError::ConfigError(format!(
                "no job ids left for owner '{owner}' on {date}"
            )));
        }

        let job_id = JobId::new(date, sequence);
        let job_dir = parent.join(job_id.as_str());
        match fs::create_dir(&job_dir) {
            Ok(()) => {
                info!(job_id = %job_id, job_dir = %job_dir.display(), "allocated job");
                return Ok(AllocatedJob { job_id, job_dir });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(job_id = %job_id, "job id taken concurrently; trying next");
                sequence += 1;
            }
            Err(e) => {
                return Err(SubforgeError::ConfigError(format!(
                    "cannot create job directory {}: {e}",
                    job_dir.display()
                )));
            }
        }
    }
}

/// Highest sequence among existing job directories for `date`, or 0.
fn highest_sequence(parent: &Path, date: NaiveDate) -> Result<u32> {
    let mut highest = 0;
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        match JobId::parse(&name) {
            Ok(id) if id.date() == date => highest = highest.max(id.sequence()),
            _ => debug!(entry = %name, "ignoring non-job entry"),
        }
    }
    Ok(highest)
}
