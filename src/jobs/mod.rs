// src/jobs/mod.rs

//! Job identity, allocation and reset.
//!
//! - [`id`] parses and formats `YYYYMMDD-NNNN` ids and maps them to
//!   directories.
//! - [`allocate`] creates the next job directory for an owner and date.
//! - [`reset`] moves recorded stages back to PENDING.

pub mod allocate;
pub mod id;
pub mod reset;

pub use allocate::{AllocatedJob, allocate};
pub use id::{JobId, job_dir, owner_dir, validate_owner};
pub use reset::{ResetAction, ResetEntry, ResetOptions, ResetReport, reset};
