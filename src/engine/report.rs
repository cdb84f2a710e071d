// src/engine/report.rs

use std::fmt;

use crate::types::{JobStatus, StageError};

/// What happened to one requested stage during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    Completed,
    /// Already COMPLETED; nothing was spawned.
    Skipped,
    Failed(StageError),
    Interrupted,
    /// Not run because an ancestor failed in this run (`keep_going`).
    Blocked,
    /// Not reached: the run stopped earlier.
    NotRun,
}

impl StageResult {
    fn label(&self) -> &'static str {
        match self {
            StageResult::Completed => "completed",
            StageResult::Skipped => "skipped (already completed)",
            StageResult::Failed(_) => "FAILED",
            StageResult::Interrupted => "INTERRUPTED",
            StageResult::Blocked => "blocked by failed dependency",
            StageResult::NotRun => "not run",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageSummary {
    pub stage: String,
    pub result: StageResult,
}

/// Outcome of one orchestrator run, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub job_id: String,
    pub job_status: JobStatus,
    pub stages: Vec<StageSummary>,
    pub interrupted: bool,
}

impl RunReport {
    pub fn result(&self, stage: &str) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| &s.result)
    }

    /// Names of stages that were actually launched.
    pub fn spawned(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .filter(|s| {
                matches!(
                    s.result,
                    StageResult::Completed | StageResult::Failed(_) | StageResult::Interrupted
                )
            })
            .map(|s| s.stage.as_str())
    }

    /// Process exit code: 0 when every requested stage is COMPLETED, 130 when
    /// the run was interrupted, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            return 130;
        }
        let all_done = self
            .stages
            .iter()
            .all(|s| matches!(s.result, StageResult::Completed | StageResult::Skipped));
        if all_done { 0 } else { 1 }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "job {} ({})", self.job_id, self.job_status)?;
        let width = self.stages.iter().map(|s| s.stage.len()).max().unwrap_or(0);
        for s in &self.stages {
            write!(f, "  {:<width$}  {}", s.stage, s.result.label())?;
            if let StageResult::Failed(err) = &s.result {
                let first_line = err.message.lines().next().unwrap_or_default();
                write!(f, " [{}] {}", err.kind, first_line)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
