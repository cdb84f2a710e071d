// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ErrorKind, StageStatus};

#[derive(Error, Debug)]
pub enum SubforgeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in stage registry: {0}")]
    DagCycle(String),

    #[error("Dependency error: {0}")]
    DependencyError(String),

    #[error("Stage '{stage}' failed ({kind}): {message}")]
    StageExecution {
        stage: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("Manifest at {path:?} is corrupt: {reason}")]
    ManifestCorruption { path: PathBuf, reason: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Stage '{stage}' cannot move from {from} to {to}")]
    InvalidTransition {
        stage: String,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SubforgeError {
    /// Error kind recorded in the manifest when this error ends a stage.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubforgeError::StageExecution { kind, .. } => *kind,
            SubforgeError::DependencyError(_) => ErrorKind::Dependency,
            SubforgeError::ConfigError(_) | SubforgeError::DagCycle(_) => ErrorKind::Config,
            _ => ErrorKind::Internal,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SubforgeError>;
