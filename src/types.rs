use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of one stage within a job.
///
/// Allowed transitions:
/// `Pending -> Running -> {Completed | Failed | Interrupted}`, and any
/// non-pending state back to `Pending` through an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl Default for StageStatus {
    fn default() -> Self {
        StageStatus::Pending
    }
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Interrupted
        )
    }

    /// Whether the session/store may move a record from `self` to `next`.
    ///
    /// Resets (`* -> Pending`) are not covered here; they go through
    /// `Manifest::reset_stage`.
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        match (self, next) {
            (StageStatus::Pending, StageStatus::Running) => true,
            (StageStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Running => "RUNNING",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Failed => "FAILED",
            StageStatus::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Machine-readable classification of a stage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The stage process exited with a non-zero status.
    ExitCode,
    /// The per-stage wall-clock budget expired.
    Timeout,
    /// The stage process could not be started.
    Spawn,
    /// The process exited 0 but a declared output role has no artifact.
    MissingOutput,
    /// A predecessor or required input was unavailable.
    Dependency,
    /// Interrupted by an operator signal.
    Interrupted,
    /// A previous orchestrator exited while the stage was running.
    Stale,
    /// The orchestrating code unwound without closing the session.
    Aborted,
    Config,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ExitCode => "exit_code",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Spawn => "spawn",
            ErrorKind::MissingOutput => "missing_output",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Stale => "stale",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Error attached to a stage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// How a stage session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed,
    Failed(StageError),
    Interrupted,
}

impl StageOutcome {
    pub fn status(&self) -> StageStatus {
        match self {
            StageOutcome::Completed => StageStatus::Completed,
            StageOutcome::Failed(_) => StageStatus::Failed,
            StageOutcome::Interrupted => StageStatus::Interrupted,
        }
    }
}

/// Scalar metadata value reported by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(b) => write!(f, "{b}"),
            MetaValue::Int(i) => write!(f, "{i}"),
            MetaValue::Float(x) => write!(f, "{x}"),
            MetaValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

impl From<f64> for MetaValue {
    fn from(x: f64) -> Self {
        MetaValue::Float(x)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}
