// src/manifest/mod.rs

//! Durable per-job record of stage statuses and artifacts.
//!
//! - [`model`] defines the serialized `Manifest` / `StageRecord` shapes and
//!   the stage state machine.
//! - [`store`] owns loading and atomic persistence of `manifest.json`.
//! - [`atomic`] is the temp-file-and-rename primitive the store writes through.

pub mod atomic;
pub mod model;
pub mod store;

pub use model::{ArtifactRef, Manifest, StageRecord};
pub use store::{MANIFEST_FILE, ManifestStore};
